use crate::app::config::ConfigError;
use crate::app::staging::StagingError;
use crate::auth::CredentialError;
use crate::client::ClientError;
use crate::logging::LoggingError;
use thiserror::Error;

/// Top-level error type returned by the [`crate::AmlInterface`] façade.
#[derive(Error, Debug)]
pub enum AmlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}
