// End-to-end use of the façade against a mocked management endpoint.
use aml_interface::auth::{AccessToken, Connector, CredentialError, TokenCredential};
use aml_interface::client::{ClientError, Job, JobStatus, PipelineJob};
use aml_interface::{AmlError, AmlInterface, Settings};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WS_PATH: &str = "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.MachineLearningServices/workspaces/ws-1";

struct Unavailable;

#[async_trait]
impl TokenCredential for Unavailable {
    fn name(&self) -> &str {
        "DefaultAzureCredential"
    }

    async fn get_token(&self, _scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        Err(CredentialError::unavailable(self.name(), "no environment credential"))
    }
}

struct Static;

#[async_trait]
impl TokenCredential for Static {
    fn name(&self) -> &str {
        "InteractiveBrowserCredential"
    }

    async fn get_token(&self, _scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        Ok(AccessToken::new("static-token", Utc::now() + Duration::hours(1)))
    }
}

fn settings(server: &MockServer) -> Settings {
    Settings::from_toml_str(&format!(
        r#"
        [workspace]
        subscription_id = "sub-1"
        resource_group = "rg-1"
        workspace_name = "ws-1"

        [client]
        management_endpoint = "{}"
        job_poll_interval_secs = 1
        "#,
        server.uri()
    ))
    .unwrap()
}

async fn mount_workspace(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(WS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": WS_PATH,
            "name": "ws-1",
            "properties": {}
        })))
        .mount(server)
        .await;
}

fn connector() -> Connector {
    Connector::new(vec![Arc::new(Unavailable), Arc::new(Static)])
}

#[tokio::test]
async fn test_connect_falls_back_and_opens_workspace() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_workspace(&server).await;

    let aml = AmlInterface::connect_with(&settings(&server), &connector()).await?;

    assert_eq!(aml.workspace().workspace_name, "ws-1");
    assert_eq!(
        aml.get_datastore_full_path("workspaceblobstore"),
        "azureml://subscriptions/sub-1/resourcegroups/rg-1/workspaces/ws-1/datastores/workspaceblobstore/paths/"
    );
    Ok(())
}

#[tokio::test]
async fn test_connect_surfaces_workspace_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WS_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "ResourceNotFound", "message": "Workspace not found"}
        })))
        .mount(&server)
        .await;

    match AmlInterface::connect_with(&settings(&server), &connector()).await {
        Err(AmlError::Client(ClientError::Http { status, message })) => {
            assert_eq!(status, 404);
            assert!(message.contains("ResourceNotFound"));
        }
        Err(other) => panic!("Expected an HTTP error, got {other:?}"),
        Ok(_) => panic!("Expected an HTTP error"),
    }
}

#[tokio::test]
async fn test_pipeline_experiment_runs_to_completion() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_workspace(&server).await;
    Mock::given(method("PUT"))
        .and(path_regex(format!("^{WS_PATH}/jobs/[0-9a-f-]+$")))
        .and(body_partial_json(json!({
            "properties": {
                "jobType": "Pipeline",
                "experimentName": "nightly",
                "identity": {"identityType": "Managed"},
                "settings": {"default_compute": format!("{WS_PATH}/computes/cpu-cluster")}
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "name": "pipeline-run",
            "properties": {"jobType": "Pipeline", "status": "NotStarted"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{WS_PATH}/jobs/pipeline-run")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "pipeline-run",
            "properties": {"jobType": "Pipeline", "status": "Completed"}
        })))
        .mount(&server)
        .await;

    let aml = AmlInterface::connect_with(&settings(&server), &connector()).await?;
    let status = aml
        .submit_pipeline_experiment(
            || Job::pipeline(PipelineJob::default()),
            "nightly",
            "cpu-cluster",
        )
        .await?;

    assert_eq!(status, JobStatus::Completed);
    Ok(())
}
