use crate::app::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name written by the Azure ML studio "Download config file" action.
pub const WORKSPACE_CONFIG_FILE: &str = "config.json";

/// Identifies one Azure ML workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(alias = "subscriptionId")]
    pub subscription_id: String,
    #[serde(alias = "resourceGroup", alias = "resource_group_name")]
    pub resource_group: String,
    #[serde(alias = "workspaceName")]
    pub workspace_name: String,
}

impl WorkspaceConfig {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        workspace_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            workspace_name: workspace_name.into(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: WorkspaceConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Looks for `config.json` in `start`, its `.azureml/` folder and then in
    /// every parent directory.
    pub fn discover<P: AsRef<Path>>(start: P) -> Result<Self, ConfigError> {
        let start = start.as_ref();
        for dir in start.ancestors() {
            for candidate in [
                dir.join(WORKSPACE_CONFIG_FILE),
                dir.join(".azureml").join(WORKSPACE_CONFIG_FILE),
            ] {
                if candidate.is_file() {
                    return Self::from_file(candidate);
                }
            }
        }
        Err(ConfigError::WorkspaceConfigNotFound(PathBuf::from(start)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("subscription_id", &self.subscription_id),
            ("resource_group", &self.resource_group),
            ("workspace_name", &self.workspace_name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(key, "must not be empty"));
            }
        }
        Ok(())
    }

    /// ARM resource id of the workspace.
    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.MachineLearningServices/workspaces/{}",
            self.subscription_id, self.resource_group, self.workspace_name
        )
    }

    /// `azureml://` URI of a path prefix inside `datastore`.
    pub fn datastore_uri(&self, datastore: &str) -> String {
        format!(
            "azureml://subscriptions/{}/resourcegroups/{}/workspaces/{}/datastores/{}/paths/",
            self.subscription_id, self.resource_group, self.workspace_name, datastore
        )
    }

    /// Azure ML studio link for a run, used when the service returns none.
    pub fn studio_run_url(&self, job_name: &str) -> String {
        format!("https://ml.azure.com/runs/{job_name}?wsid={}", self.resource_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"{
        "subscription_id": "sub-1",
        "resource_group": "rg-1",
        "workspace_name": "ws-1"
    }"#;

    #[test]
    fn test_discover_walks_up_and_into_azureml_folder() {
        let root = TempDir::new().unwrap();
        let azureml = root.path().join(".azureml");
        std::fs::create_dir(&azureml).unwrap();
        std::fs::write(azureml.join(WORKSPACE_CONFIG_FILE), CONFIG).unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let config = WorkspaceConfig::discover(&nested).unwrap();
        assert_eq!(config, WorkspaceConfig::new("sub-1", "rg-1", "ws-1"));
    }

    #[test]
    fn test_discover_reports_start_directory() {
        let root = TempDir::new().unwrap();
        match WorkspaceConfig::discover(root.path()) {
            Err(ConfigError::WorkspaceConfigNotFound(path)) => assert_eq!(path, root.path()),
            // A config.json higher up the real filesystem is also acceptable.
            Ok(_) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_camel_case_keys_are_accepted() {
        let config: WorkspaceConfig = serde_json::from_str(
            r#"{"subscriptionId": "s", "resourceGroup": "r", "workspaceName": "w"}"#,
        )
        .unwrap();
        assert_eq!(config.workspace_name, "w");
    }

    #[test]
    fn test_empty_field_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(WORKSPACE_CONFIG_FILE);
        std::fs::write(&path, CONFIG.replace("ws-1", " ")).unwrap();
        assert!(WorkspaceConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_uris() {
        let config = WorkspaceConfig::new("sub", "rg", "ws");
        assert_eq!(
            config.resource_id(),
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/ws"
        );
        assert_eq!(
            config.datastore_uri("workspaceblobstore"),
            "azureml://subscriptions/sub/resourcegroups/rg/workspaces/ws/datastores/workspaceblobstore/paths/"
        );
    }
}
