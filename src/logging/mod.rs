//! Package-scoped logging bridged to `tracing`.
//!
//! Each configured package gets a [`registry::PackageLogger`] holding at most
//! one handler per [`HandlerKind`]. [`attach`] adds the Application Insights
//! handler (and optionally a console handler) and installs [`RoutingLayer`]
//! as the global subscriber, so `tracing` events whose target falls under a
//! configured package reach those handlers.

pub mod attacher;
pub mod config;
pub mod connection_string;
pub mod handler;
pub mod layer;
pub mod record;
pub mod registry;

use crate::app::config::ConfigError;
use thiserror::Error;

pub use attacher::{AttachReport, LoggingAttacher, attach, flush};
pub use config::{BasicConfig, LoggingConfig};
pub use connection_string::ConnectionString;
pub use handler::{ConsoleHandler, Handler, HandlerKind};
pub use layer::RoutingLayer;
pub use record::{LogRecord, RecordFormatter};
pub use registry::{LoggerRegistry, PackageLogger};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid Application Insights connection string: {0}")]
    InvalidConnectionString(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}
