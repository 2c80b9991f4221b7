//! Credential strategies and the fallback connector.

pub mod azure_cli;
pub mod chain;
pub mod connector;
pub mod credential;
pub mod environment;
pub mod interactive;
pub mod managed_identity;

pub use azure_cli::AzureCliCredential;
pub use chain::ChainedTokenCredential;
pub use connector::{Connector, Credential};
pub use credential::{AccessToken, CredentialError, MANAGEMENT_SCOPE, TokenCredential};
pub use environment::EnvironmentCredential;
pub use interactive::{BrowserLauncher, InteractiveBrowserCredential, SystemBrowser};
pub use managed_identity::{ManagedIdentityCredential, ManagedIdentitySource};
