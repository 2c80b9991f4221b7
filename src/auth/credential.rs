use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Scope of the Azure Resource Manager API used to validate credentials.
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Tokens are renewed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("{credential} unavailable: {message}")]
    Unavailable { credential: String, message: String },
    #[error("{credential} authentication failed: {message}")]
    AuthenticationFailed { credential: String, message: String },
    #[error("{credential} timed out: {message}")]
    Timeout { credential: String, message: String },
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No credential in the chain succeeded: {}", .attempts.join("; "))]
    ChainExhausted { attempts: Vec<String> },
    #[error("No credential strategies configured")]
    NoStrategies,
}

impl CredentialError {
    pub fn unavailable(credential: &str, message: impl Into<String>) -> Self {
        CredentialError::Unavailable {
            credential: credential.to_string(),
            message: message.into(),
        }
    }

    pub fn authentication_failed(credential: &str, message: impl Into<String>) -> Self {
        CredentialError::AuthenticationFailed {
            credential: credential.to_string(),
            message: message.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, CredentialError::Unavailable { .. })
    }
}

/// A bearer token and its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }

    /// True once the token is within the refresh margin of its expiry.
    pub fn is_stale(&self) -> bool {
        Utc::now() + ChronoDuration::seconds(REFRESH_MARGIN_SECS) >= self.expires_on
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Anything that can produce a token for the management API.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    fn name(&self) -> &str;

    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError>;
}

/// `https://management.azure.com/.default` -> `https://management.azure.com`
pub fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

/// Single-resource credentials (managed identity, CLI) accept one scope only.
pub(crate) fn single_resource<'a>(credential: &str, scopes: &[&'a str]) -> Result<&'a str, CredentialError> {
    match scopes {
        [scope] => Ok(scope_to_resource(*scope)),
        _ => Err(CredentialError::authentication_failed(
            credential,
            format!("expected exactly one scope, got {}", scopes.len()),
        )),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum NumberOrString {
    Number(i64),
    String(String),
}

impl NumberOrString {
    fn as_i64(&self) -> Option<i64> {
        match self {
            NumberOrString::Number(n) => Some(*n),
            NumberOrString::String(s) => s.trim().parse().ok(),
        }
    }
}

/// Body of an OAuth2 token endpoint or managed identity endpoint response.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<NumberOrString>,
    #[serde(default)]
    pub expires_on: Option<NumberOrString>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    pub fn access_token(&self) -> AccessToken {
        let now = Utc::now();
        let expires_on = self
            .expires_on
            .as_ref()
            .and_then(NumberOrString::as_i64)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                self.expires_in
                    .as_ref()
                    .and_then(NumberOrString::as_i64)
                    .map(|secs| now + ChronoDuration::seconds(secs))
            })
            .unwrap_or_else(|| now + ChronoDuration::hours(1));
        AccessToken::new(self.access_token.clone(), expires_on)
    }
}

#[derive(Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Reads a token endpoint response, turning OAuth error bodies into
/// `AuthenticationFailed`.
pub(crate) async fn read_token_response(
    credential: &str,
    response: reqwest::Response,
) -> Result<TokenResponse, CredentialError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = match serde_json::from_str::<OAuthErrorResponse>(&body) {
            Ok(err) => match err.error_description {
                Some(description) => format!("{}: {}", err.error, description),
                None => err.error,
            },
            Err(_) => format!("HTTP {status}: {body}"),
        };
        return Err(CredentialError::authentication_failed(credential, message));
    }

    serde_json::from_str(&body).map_err(|e| {
        CredentialError::authentication_failed(credential, format!("invalid token response: {e}"))
    })
}

/// `application/x-www-form-urlencoded` body for token requests.
pub(crate) fn form_body(pairs: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}
