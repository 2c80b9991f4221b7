use super::azure_cli::AzureCliCredential;
use super::credential::{AccessToken, CredentialError, TokenCredential};
use super::environment::EnvironmentCredential;
use super::managed_identity::ManagedIdentityCredential;
use crate::app::config::AuthSettings;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Tries each source in order.
///
/// Sources reporting [`CredentialError::Unavailable`] are skipped; any other
/// error stops the chain, since it means the source applies but is broken.
/// The first source that produces a token is remembered and used exclusively
/// afterwards.
pub struct ChainedTokenCredential {
    name: String,
    sources: Vec<Arc<dyn TokenCredential>>,
    selected: Mutex<Option<usize>>,
}

impl ChainedTokenCredential {
    pub fn new(name: impl Into<String>, sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self {
            name: name.into(),
            sources,
            selected: Mutex::new(None),
        }
    }

    /// Environment service principal, then managed identity, then Azure CLI.
    pub fn default_chain(settings: &AuthSettings) -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let probe_timeout = Duration::from_millis(settings.managed_identity_probe_timeout_ms);

        let sources: Vec<Arc<dyn TokenCredential>> = vec![
            Arc::new(EnvironmentCredential::from_env(http, &settings.authority_host)),
            Arc::new(ManagedIdentityCredential::from_env(probe_timeout)?),
            Arc::new(AzureCliCredential::default()),
        ];
        Ok(Self::new("DefaultAzureCredential", sources))
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.name()).collect()
    }

    /// Name of the source that produced the last token, if any.
    pub fn selected_source(&self) -> Option<&str> {
        let selected = *self.selected.lock();
        selected.and_then(|index| self.sources.get(index)).map(|source| source.name())
    }
}

#[async_trait]
impl TokenCredential for ChainedTokenCredential {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let selected = *self.selected.lock();
        if let Some(source) = selected.and_then(|index| self.sources.get(index)) {
            return source.get_token(scopes).await;
        }

        let mut attempts = Vec::with_capacity(self.sources.len());
        for (index, source) in self.sources.iter().enumerate() {
            match source.get_token(scopes).await {
                Ok(token) => {
                    info!("{} acquired a token via {}", self.name, source.name());
                    *self.selected.lock() = Some(index);
                    return Ok(token);
                }
                Err(e) if e.is_unavailable() => {
                    debug!("{}: skipping {}: {}", self.name, source.name(), e);
                    attempts.push(e.to_string());
                }
                Err(e) => {
                    debug!("{}: {} failed: {}", self.name, source.name(), e);
                    attempts.push(e.to_string());
                    break;
                }
            }
        }

        Err(CredentialError::ChainExhausted { attempts })
    }
}
