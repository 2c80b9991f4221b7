use super::credential::{
    AccessToken, CredentialError, TokenCredential, read_token_response, single_resource,
};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

const NAME: &str = "ManagedIdentityCredential";

pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// Where the managed identity token comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagedIdentitySource {
    /// `IDENTITY_ENDPOINT` + `IDENTITY_HEADER` (App Service, AML compute).
    IdentityEndpoint { endpoint: String, header: String },
    /// Instance metadata service of a VM.
    Imds { endpoint: String },
}

impl ManagedIdentitySource {
    pub fn from_env() -> Self {
        match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(endpoint), Ok(header)) => ManagedIdentitySource::IdentityEndpoint { endpoint, header },
            _ => ManagedIdentitySource::Imds {
                endpoint: IMDS_ENDPOINT.to_string(),
            },
        }
    }
}

pub struct ManagedIdentityCredential {
    http: Client,
    source: ManagedIdentitySource,
    /// Client id of a user-assigned identity.
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    pub fn new(http: Client, source: ManagedIdentitySource, client_id: Option<String>) -> Self {
        Self {
            http,
            source,
            client_id,
        }
    }

    /// Uses a dedicated client whose connect timeout bounds the IMDS probe,
    /// so machines without an identity endpoint fail fast.
    pub fn from_env(probe_timeout: Duration) -> Result<Self, CredentialError> {
        let http = Client::builder().connect_timeout(probe_timeout).build()?;
        Ok(Self::new(
            http,
            ManagedIdentitySource::from_env(),
            std::env::var("AZURE_CLIENT_ID").ok(),
        ))
    }

    fn request_url(&self, resource: &str) -> Result<(Url, &'static str, String), CredentialError> {
        let (endpoint, api_version, header_name, header_value) = match &self.source {
            ManagedIdentitySource::IdentityEndpoint { endpoint, header } => (
                endpoint.as_str(),
                APP_SERVICE_API_VERSION,
                "X-IDENTITY-HEADER",
                header.clone(),
            ),
            ManagedIdentitySource::Imds { endpoint } => {
                (endpoint.as_str(), IMDS_API_VERSION, "Metadata", "true".to_string())
            }
        };

        let mut url = Url::parse(endpoint).map_err(|e| {
            CredentialError::unavailable(NAME, format!("invalid endpoint '{endpoint}': {e}"))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", api_version);
            query.append_pair("resource", resource);
            if let Some(client_id) = &self.client_id {
                query.append_pair("client_id", client_id);
            }
        }
        Ok((url, header_name, header_value))
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let resource = single_resource(NAME, scopes)?;
        let (url, header_name, header_value) = self.request_url(resource)?;

        debug!("Requesting managed identity token from {}", url.host_str().unwrap_or(""));
        let response = self
            .http
            .get(url)
            .header(header_name, header_value)
            .send()
            .await
            .map_err(|e| {
                CredentialError::unavailable(NAME, format!("no managed identity endpoint found: {e}"))
            })?;

        // IMDS answers 400 when the VM has no identity assigned.
        if response.status() == reqwest::StatusCode::BAD_REQUEST
            && matches!(self.source, ManagedIdentitySource::Imds { .. })
        {
            return Err(CredentialError::unavailable(
                NAME,
                "no managed identity assigned to this host",
            ));
        }

        let token = read_token_response(NAME, response).await?;
        Ok(token.access_token())
    }
}
