use crate::client::WorkspaceConfig;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
    #[error("Workspace config.json not found (searched upwards from {})", .0.display())]
    WorkspaceConfigNotFound(PathBuf),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Settings for the ARM REST client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub management_endpoint: String,
    pub api_version: String,
    pub request_timeout_secs: u64,
    pub job_poll_interval_secs: u64,
    pub user_agent: String,
    /// Blob service used for build-context uploads instead of the one
    /// derived from the workspace datastore.
    pub blob_endpoint: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            management_endpoint: "https://management.azure.com".to_string(),
            api_version: "2023-10-01".to_string(),
            request_timeout_secs: 60,
            job_poll_interval_secs: 10,
            user_agent: format!("aml-interface/{}", env!("CARGO_PKG_VERSION")),
            blob_endpoint: None,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_secs(self.job_poll_interval_secs)
    }
}

/// Settings for the credential strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub authority_host: String,
    /// Tenant used by the interactive login; `organizations` when unset.
    pub tenant_id: Option<String>,
    pub interactive_client_id: String,
    pub redirect_timeout_secs: u64,
    pub managed_identity_probe_timeout_ms: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            authority_host: "https://login.microsoftonline.com".to_string(),
            tenant_id: None,
            interactive_client_id: "04b07795-8ddb-461a-bbee-02f9e1bf7b46".to_string(),
            redirect_timeout_secs: 300,
            managed_identity_probe_timeout_ms: 1000,
        }
    }
}

/// Everything the façade needs, normally read from one TOML file:
///
/// ```toml
/// [logging]
/// loglevel_own = "INFO"
/// own_packages = ["__main__", "my_pipeline"]
/// ai_instrumentation_key = "InstrumentationKey=...;IngestionEndpoint=https://..."
///
/// [logging.basic_config]
/// level = "INFO"
/// format = "%(asctime)s|||%(levelname)-8s|%(name)s|%(message)s"
/// datefmt = "%Y-%m-%d %H:%M:%S"
///
/// [client]
/// job_poll_interval_secs = 5
/// ```
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub logging: Option<LoggingConfig>,
    /// Inline workspace coordinates; when absent `config.json` is discovered.
    pub workspace: Option<WorkspaceConfig>,
    pub workspace_config_path: Option<PathBuf>,
    pub client: ClientSettings,
    pub auth: AuthSettings,
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(content)?;
        let mut settings = Settings::default();

        if let Some(value) = table.get("logging") {
            let logging = value
                .as_table()
                .ok_or_else(|| ConfigError::invalid("logging", "expected a table"))?;
            settings.logging = Some(LoggingConfig::from_table(logging)?);
        }
        if let Some(value) = table.get("workspace") {
            settings.workspace = Some(value.clone().try_into()?);
        }
        if let Some(value) = table.get("workspace_config_path") {
            let path = value
                .as_str()
                .ok_or_else(|| ConfigError::invalid("workspace_config_path", "expected a string"))?;
            settings.workspace_config_path = Some(PathBuf::from(path));
        }
        if let Some(value) = table.get("client") {
            settings.client = value.clone().try_into()?;
        }
        if let Some(value) = table.get("auth") {
            settings.auth = value.clone().try_into()?;
        }

        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Settings::default();
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        load_env_string("AML_MANAGEMENT_ENDPOINT", &mut self.client.management_endpoint);
        load_env_string("AML_API_VERSION", &mut self.client.api_version);
        load_env_var("AML_REQUEST_TIMEOUT_SECS", &mut self.client.request_timeout_secs)?;
        load_env_var("AML_JOB_POLL_INTERVAL_SECS", &mut self.client.job_poll_interval_secs)?;
        load_env_string("AZURE_AUTHORITY_HOST", &mut self.auth.authority_host);
        load_env_string_opt("AZURE_TENANT_ID", &mut self.auth.tenant_id);
        load_env_path_opt("AML_CONFIG_PATH", &mut self.workspace_config_path);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.client.management_endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!(
                "Invalid management endpoint '{}': {}",
                self.client.management_endpoint, e
            ))
        })?;
        Url::parse(&self.auth.authority_host).map_err(|e| {
            ConfigError::InvalidUrl(format!(
                "Invalid authority host '{}': {}",
                self.auth.authority_host, e
            ))
        })?;

        if self.client.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "client.request_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.client.job_poll_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "client.job_poll_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.client.api_version.trim().is_empty() {
            return Err(ConfigError::invalid("client.api_version", "must not be empty"));
        }

        Ok(())
    }

    /// Inline `[workspace]` table first, then `config.json` at the configured
    /// path, then discovery from the current directory.
    pub fn resolve_workspace(&self) -> Result<WorkspaceConfig, ConfigError> {
        if let Some(workspace) = &self.workspace {
            return Ok(workspace.clone());
        }
        if let Some(path) = &self.workspace_config_path {
            return WorkspaceConfig::from_file(path);
        }
        let cwd = std::env::current_dir()?;
        WorkspaceConfig::discover(&cwd)
    }
}

/// Helper function to load and parse an environment variable.
/// Returns Ok(()) if the variable doesn't exist (keeps default).
fn load_env_var<T>(name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        *target = value
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

fn load_env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

fn load_env_string_opt(name: &str, target: &mut Option<String>) {
    if let Ok(value) = std::env::var(name) {
        *target = Some(value);
    }
}

fn load_env_path_opt(name: &str, target: &mut Option<PathBuf>) {
    if let Ok(value) = std::env::var(name) {
        *target = Some(PathBuf::from(value));
    }
}

// Durations are written as milliseconds in settings files.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
