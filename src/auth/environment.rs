use super::credential::{
    AccessToken, CredentialError, TokenCredential, form_body, read_token_response,
};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

const NAME: &str = "EnvironmentCredential";

/// Service principal secret taken from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`
/// and `AZURE_CLIENT_SECRET`.
pub struct EnvironmentCredential {
    http: Client,
    authority_host: String,
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl EnvironmentCredential {
    pub fn new(
        http: Client,
        authority_host: impl Into<String>,
        tenant_id: Option<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            http,
            authority_host: authority_host.into(),
            tenant_id,
            client_id,
            client_secret,
        }
    }

    pub fn from_env(http: Client, authority_host: impl Into<String>) -> Self {
        Self::new(
            http,
            authority_host,
            std::env::var("AZURE_TENANT_ID").ok(),
            std::env::var("AZURE_CLIENT_ID").ok(),
            std::env::var("AZURE_CLIENT_SECRET").ok(),
        )
    }

    fn token_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            tenant_id
        )
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let (Some(tenant_id), Some(client_id), Some(client_secret)) =
            (&self.tenant_id, &self.client_id, &self.client_secret)
        else {
            return Err(CredentialError::unavailable(
                NAME,
                "environment variables are not fully configured \
                 (AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET are required)",
            ));
        };

        let scope = scopes.join(" ");
        let body = form_body(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", &scope),
        ]);

        debug!("Requesting client credentials token for tenant {}", tenant_id);
        let response = self
            .http
            .post(self.token_url(tenant_id))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let token = read_token_response(NAME, response).await?;
        Ok(token.access_token())
    }
}
