//! REST client for the Azure Machine Learning management plane.

pub mod entities;
pub mod rest;
pub mod upload;
pub mod workspace;

use crate::app::config::ConfigError;
use crate::auth::CredentialError;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

pub use entities::{
    AssetType, BuildContext, CommandJob, Environment, IdentityConfiguration, Job, JobInput,
    JobOutput, JobSpec, JobStatus, PipelineJob, PipelineSettings, Workspace,
};
pub use rest::RestMlClient;
pub use workspace::WorkspaceConfig;

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid client configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Job {name} finished with status {status}")]
    JobFailed { name: String, status: JobStatus },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to read build context '{}': {source}", .path.display())]
    BuildContext {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Operations on one workspace.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MlWorkspaceClient: Send + Sync {
    fn workspace(&self) -> &WorkspaceConfig;

    async fn get_workspace(&self) -> Result<Workspace, ClientError>;

    /// Sets the compute cluster used to build environment images.
    async fn set_image_build_compute(&self, compute: &str) -> Result<Workspace, ClientError>;

    async fn create_or_update_environment(
        &self,
        environment: &Environment,
    ) -> Result<Environment, ClientError>;

    async fn create_or_update_job(&self, job: &Job) -> Result<Job, ClientError>;

    async fn get_job(&self, name: &str) -> Result<Job, ClientError>;
}
