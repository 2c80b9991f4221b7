#![warn(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
#![allow(
    clippy::cast_possible_truncation, // Durations and counters stay well below u64::MAX
    clippy::missing_errors_doc,       // Error enums document themselves
    clippy::module_name_repetitions,  // e.g. ClientError in client module
    clippy::must_use_candidate,
    clippy::doc_markdown
)]

//! Convenience wrappers around the Azure Machine Learning management plane.
//!
//! - [`auth`]: credential strategies and the fallback [`auth::Connector`]
//! - [`logging`]: idempotent attachment of Application Insights and console
//!   handlers to package loggers, bridged to `tracing`
//! - [`sender`]: the Application Insights telemetry exporter
//! - [`client`]: REST client for workspaces, environments and jobs
//! - [`app`]: settings and the [`app::AmlInterface`] façade

pub mod app;
pub mod auth;
pub mod client;
pub mod domain;
pub mod logging;
pub mod reliability;
pub mod sender;

pub use app::{AmlInterface, Settings};
pub use auth::{Connector, Credential};
pub use domain::AmlError;
pub use logging::{LoggingConfig, attach};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
