use super::config::Settings;
use super::staging::stage_files;
use crate::auth::Connector;
use crate::client::{
    BuildContext, ClientError, Environment, IdentityConfiguration, Job, JobSpec, JobStatus,
    MlWorkspaceClient, RestMlClient, WorkspaceConfig,
};
use crate::client::upload::is_remote_uri;
use crate::domain::AmlError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BUILD_CLUSTER: &str = "defaultBuildClusterCvt";
pub const DEFAULT_BUILD_CONTEXT_FILES: [&str; 2] = ["poetry.lock", "pyproject.toml"];

/// Arguments of [`AmlInterface::create_aml_environment`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentRequest {
    pub name: String,
    /// Directory holding the Dockerfile.
    pub build_context_path: PathBuf,
    /// Dockerfile location inside the build context.
    pub dockerfile_path: String,
    /// Compute cluster that builds the image.
    pub build_cluster: String,
    /// Local files copied into the build context for the duration of the call.
    pub build_context_files: Vec<PathBuf>,
    pub version: Option<String>,
    pub description: Option<String>,
}

impl EnvironmentRequest {
    pub fn new(
        name: impl Into<String>,
        build_context_path: impl Into<PathBuf>,
        dockerfile_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            build_context_path: build_context_path.into(),
            dockerfile_path: dockerfile_path.into(),
            build_cluster: DEFAULT_BUILD_CLUSTER.to_string(),
            build_context_files: DEFAULT_BUILD_CONTEXT_FILES
                .iter()
                .map(PathBuf::from)
                .collect(),
            version: None,
            description: None,
        }
    }

    pub fn with_build_cluster(mut self, build_cluster: impl Into<String>) -> Self {
        self.build_cluster = build_cluster.into();
        self
    }

    pub fn with_build_context_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.build_context_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    fn environment(&self) -> Environment {
        let mut environment = Environment::new(&self.name).with_build(BuildContext::new(
            self.build_context_path.to_string_lossy(),
            &self.dockerfile_path,
        ));
        environment.version = self.version.clone();
        environment.description = self.description.clone();
        environment
    }
}

/// Entry point for working with one Azure ML workspace.
pub struct AmlInterface<C = RestMlClient> {
    client: C,
    poll_interval: Duration,
}

impl AmlInterface<RestMlClient> {
    /// Resolves a credential through the default connector, then opens the
    /// workspace named by `settings`.
    pub async fn connect(settings: &Settings) -> Result<Self, AmlError> {
        let connector = Connector::from_settings(&settings.auth)?;
        Self::connect_with(settings, &connector).await
    }

    pub async fn connect_with(settings: &Settings, connector: &Connector) -> Result<Self, AmlError> {
        let workspace = settings.resolve_workspace()?;
        let credential = connector.acquire_credential().await?;
        let client = RestMlClient::new(credential, workspace, &settings.client)?;

        let retrieved = client.get_workspace().await?;
        let name = if retrieved.name.is_empty() {
            client.workspace().workspace_name.clone()
        } else {
            retrieved.name
        };
        info!("Retrieved the following workspace: {name}");

        Ok(Self::with_client(client, settings.client.job_poll_interval()))
    }
}

impl<C: MlWorkspaceClient> AmlInterface<C> {
    pub fn with_client(client: C, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn workspace(&self) -> &WorkspaceConfig {
        self.client.workspace()
    }

    pub fn get_datastore_full_path(&self, datastore: &str) -> String {
        self.workspace().datastore_uri(datastore)
    }

    /// Sets the image build compute, stages the build-context files, registers
    /// the environment and removes the staged copies again.
    ///
    /// A local build context is uploaded to the workspace datastore during
    /// registration, while the staged files are in place. Files cannot be
    /// staged into a context that already lives in remote storage.
    ///
    /// The staged copies are removed even when registration fails; the
    /// registration error is then returned in preference to a cleanup error.
    pub async fn create_aml_environment(
        &self,
        request: &EnvironmentRequest,
    ) -> Result<Environment, AmlError> {
        let context = request.build_context_path.to_string_lossy();
        if is_remote_uri(&context) && !request.build_context_files.is_empty() {
            return Err(ClientError::InvalidConfiguration(format!(
                "cannot stage files into remote build context '{context}'"
            ))
            .into());
        }

        self.client
            .set_image_build_compute(&request.build_cluster)
            .await?;

        let staged = stage_files(&request.build_context_files, &request.build_context_path)?;
        let registered = self
            .client
            .create_or_update_environment(&request.environment())
            .await;
        let cleanup = staged.cleanup();

        let environment = registered?;
        cleanup?;
        Ok(environment)
    }

    pub async fn submit_command_job(&self, job: &Job) -> Result<Job, AmlError> {
        if !matches!(job.properties.spec, JobSpec::Command(_)) {
            return Err(ClientError::InvalidConfiguration(
                "submit_command_job expects a command job".to_string(),
            )
            .into());
        }
        Ok(self.client.create_or_update_job(job).await?)
    }

    pub async fn submit_pipeline_job(
        &self,
        job: &Job,
        experiment_name: &str,
    ) -> Result<Job, AmlError> {
        if !matches!(job.properties.spec, JobSpec::Pipeline(_)) {
            return Err(ClientError::InvalidConfiguration(
                "submit_pipeline_job expects a pipeline job".to_string(),
            )
            .into());
        }
        let job = job.clone().with_experiment(experiment_name);
        Ok(self.client.create_or_update_job(&job).await?)
    }

    /// Builds a pipeline with `build`, runs it under the compute's managed
    /// identity on `default_compute` and waits for it to finish.
    pub async fn submit_pipeline_experiment<F>(
        &self,
        build: F,
        experiment_name: &str,
        default_compute: &str,
    ) -> Result<JobStatus, AmlError>
    where
        F: FnOnce() -> Job,
    {
        let mut job = build().with_identity(IdentityConfiguration::managed());
        let pipeline = job.pipeline_spec_mut().ok_or_else(|| {
            ClientError::InvalidConfiguration("pipeline builder returned a non-pipeline job".to_string())
        })?;
        pipeline.settings.default_compute = Some(default_compute.to_string());

        let submitted = self.submit_pipeline_job(&job, experiment_name).await?;
        self.wait_until_job_completes(&submitted.name).await
    }

    /// Polls `name` until it reaches a terminal status.
    ///
    /// `Failed`, `Canceled` and `NotResponding` are returned as
    /// [`ClientError::JobFailed`].
    pub async fn wait_until_job_completes(&self, name: &str) -> Result<JobStatus, AmlError> {
        let mut last_status = None;
        loop {
            let job = self.client.get_job(name).await?;
            let status = job.status();

            if last_status.is_none() {
                let url = job
                    .studio_url()
                    .map_or_else(|| self.workspace().studio_run_url(name), str::to_string);
                info!("RunId: {name}");
                info!("Web View: {url}");
            }
            if last_status != Some(status) {
                info!("Job {name} status: {status}");
                last_status = Some(status);
            }

            if status.is_terminal() {
                if status.is_failure() {
                    return Err(ClientError::JobFailed {
                        name: name.to_string(),
                        status,
                    }
                    .into());
                }
                info!("Execution Summary: {name} finished with status {status}");
                return Ok(status);
            }

            debug!("Job {name} not finished, polling again in {:?}", self.poll_interval);
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
