//! Settings and the workspace façade.

pub mod config;
pub mod interface;
pub mod staging;

pub use config::{AuthSettings, ClientSettings, ConfigError, Settings};
pub use interface::{AmlInterface, EnvironmentRequest};
pub use staging::{StagingError, delete_file};
