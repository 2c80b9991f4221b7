use super::chain::ChainedTokenCredential;
use super::credential::{AccessToken, CredentialError, MANAGEMENT_SCOPE, TokenCredential};
use super::interactive::InteractiveBrowserCredential;
use crate::app::config::AuthSettings;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// The credential a [`Connector`] settled on.
#[derive(Clone)]
pub struct Credential {
    inner: Arc<dyn TokenCredential>,
}

impl Credential {
    pub fn new(inner: Arc<dyn TokenCredential>) -> Self {
        Self { inner }
    }

    /// Name of the strategy that produced this credential.
    pub fn source(&self) -> &str {
        self.inner.name()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("source", &self.source())
            .finish()
    }
}

#[async_trait]
impl TokenCredential for Credential {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        self.inner.get_token(scopes).await
    }
}

/// Resolves a working credential by walking an ordered list of strategies.
///
/// Each strategy is validated by requesting a token for the management scope.
/// The first one that succeeds is returned; there is no retry and no backoff.
/// When the last strategy fails its error is returned as is.
pub struct Connector {
    strategies: Vec<Arc<dyn TokenCredential>>,
    scopes: Vec<String>,
}

impl Connector {
    pub fn new(strategies: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self {
            strategies,
            scopes: vec![MANAGEMENT_SCOPE.to_string()],
        }
    }

    /// Non-interactive chain first, then the browser login.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, CredentialError> {
        Ok(Self::new(vec![
            Arc::new(ChainedTokenCredential::default_chain(settings)?),
            Arc::new(InteractiveBrowserCredential::new(settings)?),
        ]))
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn acquire_credential(&self) -> Result<Credential, CredentialError> {
        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        let mut last_error = None;

        for (index, strategy) in self.strategies.iter().enumerate() {
            match strategy.get_token(&scopes).await {
                Ok(_) => {
                    info!("Connected using {}", strategy.name());
                    return Ok(Credential::new(Arc::clone(strategy)));
                }
                Err(e) => {
                    if let Some(next) = self.strategies.get(index + 1) {
                        info!("{} failed ({}). Using {} login...", strategy.name(), e, next.name());
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(CredentialError::NoStrategies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_connector_fails() {
        let connector = Connector::new(Vec::new());
        assert!(matches!(
            connector.acquire_credential().await,
            Err(CredentialError::NoStrategies)
        ));
    }

    #[test]
    fn test_default_strategy_order() {
        let connector = Connector::from_settings(&AuthSettings::default()).unwrap();
        assert_eq!(
            connector.strategy_names(),
            vec!["DefaultAzureCredential", "InteractiveBrowserCredential"]
        );
    }
}
