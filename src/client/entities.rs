//! Resource shapes of the Machine Learning Services ARM API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub properties: WorkspaceProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_build_compute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_url: Option<String>,
}

/// Docker build context of an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildContext {
    /// Directory or storage URI holding the Dockerfile and its inputs.
    #[serde(rename = "contextUri")]
    pub path: String,
    /// Dockerfile location relative to `path`.
    pub dockerfile_path: String,
}

impl BuildContext {
    pub fn new(path: impl Into<String>, dockerfile_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            dockerfile_path: dockerfile_path.into(),
        }
    }
}

/// A named, versioned environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    pub name: String,
    /// Assigned from the latest registered version when `None`.
    pub version: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub build: Option<BuildContext>,
    pub tags: BTreeMap<String, String>,
    /// ARM id, filled in by the service.
    pub id: Option<String>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_build(mut self, build: BuildContext) -> Self {
        self.build = Some(build);
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub(crate) fn to_resource(&self) -> EnvironmentVersionResource {
        EnvironmentVersionResource {
            id: None,
            name: self.version.clone(),
            properties: EnvironmentVersionProperties {
                description: self.description.clone(),
                image: self.image.clone(),
                build: self.build.clone(),
                tags: self.tags.clone(),
                is_anonymous: false,
                os_type: "Linux".to_string(),
            },
        }
    }

    pub(crate) fn from_resource(name: &str, resource: EnvironmentVersionResource) -> Self {
        Self {
            name: name.to_string(),
            version: resource.name,
            description: resource.properties.description,
            image: resource.properties.image,
            build: resource.properties.build,
            tags: resource.properties.tags,
            id: resource.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EnvironmentVersionResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub properties: EnvironmentVersionProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EnvironmentVersionProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildContext>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default = "default_os_type")]
    pub os_type: String,
}

fn default_os_type() -> String {
    "Linux".to_string()
}

/// One page of a list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Page<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(default)]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    UriFile,
    UriFolder,
    Mltable,
    CustomModel,
    MlflowModel,
    Literal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInput {
    pub job_input_type: AssetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl JobInput {
    pub fn uri_file(uri: impl Into<String>) -> Self {
        Self::asset(AssetType::UriFile, uri)
    }

    pub fn uri_folder(uri: impl Into<String>) -> Self {
        Self::asset(AssetType::UriFolder, uri)
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            job_input_type: AssetType::Literal,
            uri: None,
            value: Some(value.into()),
            mode: None,
        }
    }

    fn asset(job_input_type: AssetType, uri: impl Into<String>) -> Self {
        Self {
            job_input_type,
            uri: Some(uri.into()),
            value: None,
            mode: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutput {
    pub job_output_type: AssetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl JobOutput {
    pub fn uri_file(uri: impl Into<String>) -> Self {
        Self {
            job_output_type: AssetType::UriFile,
            uri: Some(uri.into()),
            mode: None,
        }
    }

    pub fn uri_folder(uri: impl Into<String>) -> Self {
        Self {
            job_output_type: AssetType::UriFolder,
            uri: Some(uri.into()),
            mode: None,
        }
    }
}

/// Identity a job runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "identityType")]
pub enum IdentityConfiguration {
    /// The compute's managed identity.
    #[serde(rename_all = "camelCase")]
    Managed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
    },
    UserIdentity,
    #[serde(rename = "AMLToken")]
    AmlToken,
}

impl IdentityConfiguration {
    /// System-assigned managed identity.
    pub fn managed() -> Self {
        IdentityConfiguration::Managed {
            client_id: None,
            resource_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandJob {
    pub command: String,
    /// Code asset id or `azureml://` URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_id: Option<String>,
    /// ARM id, `azureml:name:version`, `name:version`, or a bare name (latest version).
    pub environment_id: String,
    /// ARM id or compute name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, JobInput>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, JobOutput>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_compute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_step_failure: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineJob {
    /// Child jobs keyed by step name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub jobs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, JobInput>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, JobOutput>,
    #[serde(default)]
    pub settings: PipelineSettings,
}

impl PipelineJob {
    /// Adds a command step.
    pub fn add_command_step(
        &mut self,
        name: impl Into<String>,
        step: &CommandJob,
    ) -> Result<(), serde_json::Error> {
        let name = name.into();
        let mut value = serde_json::to_value(step)?;
        if let Value::Object(map) = &mut value {
            map.insert("type".to_string(), Value::String("command".to_string()));
            map.insert("name".to_string(), Value::String(name.clone()));
        }
        self.jobs.insert(name, value);
        Ok(())
    }
}

/// What a job runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "jobType")]
pub enum JobSpec {
    Command(CommandJob),
    Pipeline(PipelineJob),
    /// Job types this crate does not model (sweep, AutoML, ...).
    #[serde(other, skip_serializing)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    NotStarted,
    Starting,
    Provisioning,
    Preparing,
    Queued,
    Running,
    Finalizing,
    CancelRequested,
    Completed,
    Failed,
    Canceled,
    NotResponding,
    Paused,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Canceled
                | JobStatus::NotResponding
                | JobStatus::Paused
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Canceled | JobStatus::NotResponding
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_service_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProperties {
    #[serde(flatten)]
    pub spec: JobSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityConfiguration>,
    /// Output only.
    #[serde(default, skip_serializing)]
    pub status: Option<JobStatus>,
    /// Output only.
    #[serde(default, skip_serializing)]
    pub services: BTreeMap<String, JobService>,
}

/// A job resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Generated when empty at submission.
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub properties: JobProperties,
}

impl Job {
    fn from_spec(spec: JobSpec) -> Self {
        Self {
            name: String::new(),
            id: None,
            properties: JobProperties {
                spec,
                display_name: None,
                experiment_name: None,
                description: None,
                tags: BTreeMap::new(),
                identity: None,
                status: None,
                services: BTreeMap::new(),
            },
        }
    }

    pub fn command(spec: CommandJob) -> Self {
        Self::from_spec(JobSpec::Command(spec))
    }

    pub fn pipeline(spec: PipelineJob) -> Self {
        Self::from_spec(JobSpec::Pipeline(spec))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.properties.display_name = Some(display_name.into());
        self
    }

    pub fn with_experiment(mut self, experiment_name: impl Into<String>) -> Self {
        self.properties.experiment_name = Some(experiment_name.into());
        self
    }

    pub fn with_identity(mut self, identity: IdentityConfiguration) -> Self {
        self.properties.identity = Some(identity);
        self
    }

    pub fn status(&self) -> JobStatus {
        self.properties.status.unwrap_or(JobStatus::Unknown)
    }

    /// Link to the run in Azure ML studio, when the service returned one.
    pub fn studio_url(&self) -> Option<&str> {
        self.properties
            .services
            .get("Studio")
            .and_then(|service| service.endpoint.as_deref())
    }

    pub fn pipeline_spec_mut(&mut self) -> Option<&mut PipelineJob> {
        match &mut self.properties.spec {
            JobSpec::Pipeline(pipeline) => Some(pipeline),
            _ => None,
        }
    }
}
