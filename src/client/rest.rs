use super::entities::{
    Environment, EnvironmentVersionResource, Job, JobSpec, Page, Workspace,
};
use super::upload::{
    BLOB_API_VERSION, DEFAULT_DATASTORE, DatastoreResource, STORAGE_SCOPE, blob_url,
    collect_context, content_hash, is_remote_uri,
};
use super::{ClientError, MlWorkspaceClient, WorkspaceConfig};
use crate::app::config::ClientSettings;
use crate::auth::{AccessToken, Credential, MANAGEMENT_SCOPE, TokenCredential};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// [`MlWorkspaceClient`] over the Azure Resource Manager REST API.
pub struct RestMlClient {
    http: reqwest::Client,
    credential: Credential,
    workspace: WorkspaceConfig,
    base: Url,
    api_version: String,
    blob_endpoint: Option<String>,
    token: Mutex<Option<AccessToken>>,
    storage_token: Mutex<Option<AccessToken>>,
}

#[derive(Deserialize)]
struct ArmErrorBody {
    error: ArmError,
}

#[derive(Deserialize)]
struct ArmError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl RestMlClient {
    pub fn new(
        credential: Credential,
        workspace: WorkspaceConfig,
        settings: &ClientSettings,
    ) -> Result<Self, ClientError> {
        workspace.validate()?;
        let base = Url::parse(&settings.management_endpoint).map_err(|e| {
            ClientError::InvalidConfiguration(format!(
                "invalid management endpoint '{}': {e}",
                settings.management_endpoint
            ))
        })?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidConfiguration(format!(
                "management endpoint '{base}' cannot be a base URL"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(settings.user_agent.as_str())
            .build()?;

        Ok(Self {
            http,
            credential,
            workspace,
            base,
            api_version: settings.api_version.clone(),
            blob_endpoint: settings.blob_endpoint.clone(),
            token: Mutex::new(None),
            storage_token: Mutex::new(None),
        })
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// `{endpoint}/subscriptions/.../workspaces/{ws}/{segments..}?api-version=...`
    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let ws = &self.workspace;
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                ClientError::InvalidConfiguration(format!("{} cannot be a base URL", self.base))
            })?;
            path.pop_if_empty()
                .extend([
                    "subscriptions",
                    ws.subscription_id.as_str(),
                    "resourceGroups",
                    ws.resource_group.as_str(),
                    "providers",
                    "Microsoft.MachineLearningServices",
                    "workspaces",
                    ws.workspace_name.as_str(),
                ])
                .extend(segments);
        }
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    async fn bearer_token(&self) -> Result<String, ClientError> {
        self.cached_token(&self.token, MANAGEMENT_SCOPE).await
    }

    async fn cached_token(
        &self,
        cache: &Mutex<Option<AccessToken>>,
        scope: &str,
    ) -> Result<String, ClientError> {
        let mut cached = cache.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| !token.is_stale()) {
            return Ok(token.token.clone());
        }
        debug!("Requesting token for {scope} from {}", self.credential.source());
        let token = self.credential.get_token(&[scope]).await?;
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let token = self.bearer_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                message: arm_error_message(status, &body),
            });
        }
        Ok(response.json().await?)
    }

    /// Highest numeric version registered for `name`, `None` when there is none.
    async fn latest_environment_version(&self, name: &str) -> Result<Option<u64>, ClientError> {
        let mut next = Some(self.url(&["environments", name, "versions"])?);
        let mut latest = None;

        while let Some(url) = next.take() {
            let page: Page<EnvironmentVersionResource> = match self.execute(self.http.get(url)).await {
                Ok(page) => page,
                Err(ClientError::Http { status: 404, .. }) => return Ok(None),
                Err(e) => return Err(e),
            };
            latest = page
                .value
                .iter()
                .filter_map(|resource| resource.name.as_deref()?.parse::<u64>().ok())
                .chain(latest)
                .max();
            next = page
                .next_link
                .as_deref()
                .map(Url::parse)
                .transpose()
                .map_err(|e| ClientError::InvalidConfiguration(format!("invalid nextLink: {e}")))?;
        }

        Ok(latest)
    }

    /// Uploads every file below `context` to the default blob datastore and
    /// returns the URI of the uploaded directory.
    ///
    /// Files land under `LocalUpload/{content hash}/`, so an unchanged context
    /// maps to the same URI.
    pub async fn upload_build_context(&self, context: &Path) -> Result<String, ClientError> {
        let files = collect_context(context)?;
        if files.is_empty() {
            return Err(ClientError::InvalidConfiguration(format!(
                "build context '{}' contains no files",
                context.display()
            )));
        }

        let url = self.url(&["datastores", DEFAULT_DATASTORE])?;
        let datastore: DatastoreResource = self.execute(self.http.get(url)).await?;
        let properties = datastore.properties;
        let service = properties.blob_service(self.blob_endpoint.as_deref())?;
        let hash = content_hash(&files);
        let token = self.cached_token(&self.storage_token, STORAGE_SCOPE).await?;

        for file in &files {
            let url = blob_url(&service, &properties.container_name, &hash, &file.relative)?;
            let response = self
                .http
                .put(url)
                .bearer_auth(&token)
                .header("x-ms-version", BLOB_API_VERSION)
                .header("x-ms-blob-type", "BlockBlob")
                .body(file.contents.clone())
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::Http {
                    status: status.as_u16(),
                    message: format!("upload of {} failed: {}", file.relative, body.trim()),
                });
            }
            debug!("Uploaded {} ({} bytes)", file.relative, file.contents.len());
        }

        let mut uri = blob_url(&service, &properties.container_name, &hash, "")?.to_string();
        uri.push('/');
        info!(
            "Uploaded build context {} ({} files) to {uri}",
            context.display(),
            files.len()
        );
        Ok(uri)
    }

    /// Compute name (optionally `azureml:` prefixed) to ARM id.
    pub fn compute_id(&self, compute: &str) -> String {
        if compute.starts_with('/') {
            return compute.to_string();
        }
        let name = compute.strip_prefix("azureml:").unwrap_or(compute);
        format!("{}/computes/{name}", self.workspace.resource_id())
    }

    /// Environment reference to ARM id. A reference without a version, or
    /// with `@latest`, resolves to the latest registered version.
    pub async fn environment_id(&self, reference: &str) -> Result<String, ClientError> {
        if reference.starts_with('/') || reference.starts_with("azureml://") {
            return Ok(reference.to_string());
        }
        let reference = reference.strip_prefix("azureml:").unwrap_or(reference);
        let (name, version) = match reference.split_once(':') {
            Some((name, version)) => (name, Some(version.to_string())),
            None => (reference.trim_end_matches("@latest"), None),
        };
        let version = match version {
            Some(version) => version,
            None => self
                .latest_environment_version(name)
                .await?
                .ok_or_else(|| {
                    ClientError::InvalidConfiguration(format!(
                        "environment '{name}' has no registered versions"
                    ))
                })?
                .to_string(),
        };
        Ok(format!(
            "{}/environments/{name}/versions/{version}",
            self.workspace.resource_id()
        ))
    }

    async fn resolve_job_references(&self, job: &mut Job) -> Result<(), ClientError> {
        match &mut job.properties.spec {
            JobSpec::Command(command) => {
                command.environment_id = self.environment_id(&command.environment_id).await?;
                if let Some(compute) = &command.compute_id {
                    command.compute_id = Some(self.compute_id(compute));
                }
            }
            JobSpec::Pipeline(pipeline) => {
                if let Some(compute) = &pipeline.settings.default_compute {
                    pipeline.settings.default_compute = Some(self.compute_id(compute));
                }
                for step in pipeline.jobs.values_mut() {
                    let Value::Object(step) = step else { continue };
                    if let Some(Value::String(compute)) = step.get("computeId") {
                        let resolved = self.compute_id(compute);
                        step.insert("computeId".to_string(), Value::String(resolved));
                    }
                    if let Some(Value::String(environment)) = step.get("environmentId") {
                        let resolved = self.environment_id(environment).await?;
                        step.insert("environmentId".to_string(), Value::String(resolved));
                    }
                }
            }
            JobSpec::Other => {}
        }
        Ok(())
    }
}

#[async_trait]
impl MlWorkspaceClient for RestMlClient {
    fn workspace(&self) -> &WorkspaceConfig {
        &self.workspace
    }

    async fn get_workspace(&self) -> Result<Workspace, ClientError> {
        let url = self.url(&[])?;
        self.execute(self.http.get(url)).await
    }

    async fn set_image_build_compute(&self, compute: &str) -> Result<Workspace, ClientError> {
        let url = self.url(&[])?;
        let body = json!({ "properties": { "imageBuildCompute": compute } });
        let workspace: Workspace = self.execute(self.http.patch(url).json(&body)).await?;
        info!(
            "Image build compute of {} set to {compute}",
            self.workspace.workspace_name
        );
        Ok(workspace)
    }

    async fn create_or_update_environment(
        &self,
        environment: &Environment,
    ) -> Result<Environment, ClientError> {
        let version = match &environment.version {
            Some(version) => version.clone(),
            None => self
                .latest_environment_version(&environment.name)
                .await?
                .map_or(1, |latest| latest + 1)
                .to_string(),
        };
        let mut versioned = environment.clone();
        versioned.version = Some(version.clone());
        if let Some(build) = versioned.build.as_mut()
            && !is_remote_uri(&build.path)
        {
            build.path = self.upload_build_context(Path::new(&build.path)).await?;
        }

        let url = self.url(&["environments", &environment.name, "versions", &version])?;
        let body = serde_json::to_value(versioned.to_resource())?;
        let resource: EnvironmentVersionResource = self.execute(self.http.put(url).json(&body)).await?;
        info!("Registered environment {}:{version}", environment.name);
        Ok(Environment::from_resource(&environment.name, resource))
    }

    async fn create_or_update_job(&self, job: &Job) -> Result<Job, ClientError> {
        let mut job = job.clone();
        if job.name.is_empty() {
            job.name = Uuid::new_v4().to_string();
        }
        self.resolve_job_references(&mut job).await?;

        let url = self.url(&["jobs", &job.name])?;
        let body = serde_json::to_value(&job)?;
        let created: Job = self.execute(self.http.put(url).json(&body)).await?;
        info!("Submitted job {}", created.name);
        Ok(created)
    }

    async fn get_job(&self, name: &str) -> Result<Job, ClientError> {
        let url = self.url(&["jobs", name])?;
        self.execute(self.http.get(url)).await
    }
}

fn arm_error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ArmErrorBody>(body) {
        Ok(ArmErrorBody { error }) if !error.message.is_empty() => {
            if error.code.is_empty() {
                error.message
            } else {
                format!("{}: {}", error.code, error.message)
            }
        }
        _ if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        _ => body.trim().to_string(),
    }
}
