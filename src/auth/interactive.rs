use super::credential::{
    AccessToken, CredentialError, TokenCredential, TokenResponse, form_body, read_token_response,
};
use crate::app::config::AuthSettings;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

const NAME: &str = "InteractiveBrowserCredential";
const MAX_REQUEST_HEAD: usize = 8 * 1024;
/// Browsers open speculative connections that never send a request.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);

const SUCCESS_PAGE: &str = "<html><body><h3>Authentication complete.</h3>\
    <p>You can close this window.</p></body></html>";

/// Opens the authorization URL for the user.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &Url) -> std::io::Result<()>;
}

impl<F> BrowserLauncher for F
where
    F: Fn(&Url) -> std::io::Result<()> + Send + Sync,
{
    fn open(&self, url: &Url) -> std::io::Result<()> {
        self(url)
    }
}

/// The platform's default browser.
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> std::io::Result<()> {
        let mut command = if cfg!(target_os = "windows") {
            let mut command = std::process::Command::new("cmd");
            command.args(["/C", "start", ""]);
            command
        } else if cfg!(target_os = "macos") {
            std::process::Command::new("open")
        } else {
            std::process::Command::new("xdg-open")
        };
        command.arg(url.as_str()).spawn().map(|_| ())
    }
}

struct CachedLogin {
    scopes: Vec<String>,
    token: AccessToken,
    refresh_token: Option<String>,
}

/// Authorization code flow with PKCE against a loopback redirect.
///
/// The first `get_token` opens a browser window; later calls are served from
/// the in-memory cache or renewed with the refresh token.
pub struct InteractiveBrowserCredential {
    http: Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    redirect_timeout: Duration,
    launcher: Arc<dyn BrowserLauncher>,
    cache: Mutex<Option<CachedLogin>>,
}

impl InteractiveBrowserCredential {
    pub fn new(settings: &AuthSettings) -> Result<Self, CredentialError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            authority_host: settings.authority_host.trim_end_matches('/').to_string(),
            tenant_id: settings
                .tenant_id
                .clone()
                .unwrap_or_else(|| "organizations".to_string()),
            client_id: settings.interactive_client_id.clone(),
            redirect_timeout: Duration::from_secs(settings.redirect_timeout_secs),
            launcher: Arc::new(SystemBrowser),
            cache: Mutex::new(None),
        })
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/oauth2/v2.0/{}", self.authority_host, self.tenant_id, path)
    }

    /// Resource scopes plus what is needed for a refresh token.
    fn login_scopes(scopes: &[&str]) -> String {
        let mut all: Vec<&str> = scopes.to_vec();
        for extra in ["offline_access", "openid", "profile"] {
            if !all.contains(&extra) {
                all.push(extra);
            }
        }
        all.join(" ")
    }

    pub fn authorization_url(
        &self,
        scopes: &[&str],
        redirect_uri: &str,
        code_challenge: &str,
        state: &str,
    ) -> Result<Url, CredentialError> {
        let mut url = Url::parse(&self.endpoint("authorize")).map_err(|e| {
            CredentialError::authentication_failed(NAME, format!("invalid authority host: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &Self::login_scopes(scopes))
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", state)
            .append_pair("prompt", "select_account");
        Ok(url)
    }

    async fn redeem(&self, pairs: &[(&str, &str)]) -> Result<TokenResponse, CredentialError> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form_body(pairs))
            .send()
            .await?;
        read_token_response(NAME, response).await
    }

    async fn refresh(&self, refresh_token: &str, scopes: &[&str]) -> Result<TokenResponse, CredentialError> {
        let scope = Self::login_scopes(scopes);
        self.redeem(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.client_id),
            ("refresh_token", refresh_token),
            ("scope", &scope),
        ])
        .await
    }

    async fn login(&self, scopes: &[&str]) -> Result<TokenResponse, CredentialError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://localhost:{port}");

        let verifier = code_verifier();
        let challenge = code_challenge(&verifier);
        let state = uuid::Uuid::new_v4().to_string();
        let url = self.authorization_url(scopes, &redirect_uri, &challenge, &state)?;

        self.launcher.open(&url).map_err(|e| {
            CredentialError::authentication_failed(NAME, format!("failed to open a browser: {e}"))
        })?;
        info!("A browser window has been opened to sign in. Waiting for the redirect on port {}", port);

        let code = timeout(self.redirect_timeout, receive_authorization_code(&listener, &state))
            .await
            .map_err(|_| CredentialError::Timeout {
                credential: NAME.to_string(),
                message: format!("no redirect received within {:?}", self.redirect_timeout),
            })??;

        let scope = Self::login_scopes(scopes);
        self.redeem(&[
            ("grant_type", "authorization_code"),
            ("client_id", &self.client_id),
            ("code", &code),
            ("redirect_uri", &redirect_uri),
            ("code_verifier", &verifier),
            ("scope", &scope),
        ])
        .await
    }
}

#[async_trait]
impl TokenCredential for InteractiveBrowserCredential {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let mut cache = self.cache.lock().await;
        let requested: Vec<String> = scopes.iter().map(|s| (*s).to_string()).collect();

        let mut refresh_token = None;
        if let Some(cached) = cache.as_ref()
            && cached.scopes == requested
        {
            if !cached.token.is_stale() {
                return Ok(cached.token.clone());
            }
            refresh_token = cached.refresh_token.clone();
        }

        let response = match refresh_token {
            Some(refresh_token) => match self.refresh(&refresh_token, scopes).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Token refresh failed, signing in again: {}", e);
                    self.login(scopes).await?
                }
            },
            None => self.login(scopes).await?,
        };

        let token = response.access_token();
        *cache = Some(CachedLogin {
            scopes: requested,
            token: token.clone(),
            refresh_token: response.refresh_token,
        });
        Ok(token)
    }
}

fn code_verifier() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Accepts loopback connections until one carries the authorization code.
async fn receive_authorization_code(
    listener: &TcpListener,
    expected_state: &str,
) -> Result<String, CredentialError> {
    loop {
        let (mut stream, _) = listener.accept().await?;
        let target = match timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut stream)).await {
            Ok(Ok(target)) => target,
            Ok(Err(e)) => {
                debug!("Ignoring malformed redirect request: {}", e);
                continue;
            }
            Err(_) => {
                debug!("Ignoring idle connection on the redirect listener");
                continue;
            }
        };

        match parse_redirect_target(&target, expected_state) {
            Ok(Some(code)) => {
                respond(&mut stream, "200 OK", SUCCESS_PAGE).await;
                return Ok(code);
            }
            Ok(None) => respond(&mut stream, "404 Not Found", "").await,
            Err(e) => {
                respond(&mut stream, "400 Bad Request", "<html><body>Sign-in failed.</body></html>").await;
                return Err(e);
            }
        }
    }
}

async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") && head.len() < MAX_REQUEST_HEAD {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..read]);
    }

    let head = String::from_utf8_lossy(&head);
    let request_line = head.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Ok(target.to_string()),
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unexpected request line '{request_line}'"),
        )),
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("Failed to answer redirect request: {}", e);
    }
    let _ = stream.shutdown().await;
}

/// Extracts the authorization code from a redirect request target such as
/// `/?code=...&state=...`.
///
/// `Ok(None)` means the request is unrelated (e.g. `/favicon.ico`).
pub(crate) fn parse_redirect_target(
    target: &str,
    expected_state: &str,
) -> Result<Option<String>, CredentialError> {
    let url = Url::parse(&format!("http://localhost{target}")).map_err(|e| {
        CredentialError::authentication_failed(NAME, format!("invalid redirect: {e}"))
    })?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        let message = match error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        return Err(CredentialError::authentication_failed(NAME, message));
    }

    let Some(code) = code else {
        return Ok(None);
    };
    if state.as_deref() != Some(expected_state) {
        return Err(CredentialError::authentication_failed(
            NAME,
            "state mismatch in redirect",
        ));
    }
    Ok(Some(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credential::MANAGEMENT_SCOPE;

    #[test]
    fn test_code_challenge_matches_rfc7636_example() {
        // Appendix B of RFC 7636.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_code_verifier_is_url_safe() {
        let verifier = code_verifier();
        assert_eq!(verifier.len(), 43);
        assert!(verifier.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_redirect() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = tokio::spawn(async move {
            let idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            let mut redirect = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            redirect
                .write_all(b"GET /?code=abc&state=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut response = String::new();
            redirect.read_to_string(&mut response).await.unwrap();
            drop(idle);
            response
        });

        let code = timeout(
            Duration::from_secs(10),
            receive_authorization_code(&listener, "xyz"),
        )
        .await
        .expect("redirect should be handled before the outer timeout")
        .unwrap();

        assert_eq!(code, "abc");
        assert!(client.await.unwrap().starts_with("HTTP/1.1 200 OK"));
    }

    #[test]
    fn test_parse_redirect_with_code() {
        let code = parse_redirect_target("/?code=abc123&state=xyz", "xyz").unwrap();
        assert_eq!(code.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_parse_redirect_ignores_unrelated_requests() {
        assert_eq!(parse_redirect_target("/favicon.ico", "xyz").unwrap(), None);
    }

    #[test]
    fn test_parse_redirect_rejects_state_mismatch() {
        assert!(parse_redirect_target("/?code=abc&state=other", "xyz").is_err());
    }

    #[test]
    fn test_parse_redirect_surfaces_error() {
        let err = parse_redirect_target(
            "/?error=access_denied&error_description=User+cancelled&state=xyz",
            "xyz",
        )
        .unwrap_err();
        assert!(err.to_string().contains("access_denied: User cancelled"));
    }

    #[test]
    fn test_authorization_url_contains_pkce_parameters() {
        let credential = InteractiveBrowserCredential::new(&AuthSettings::default()).unwrap();
        let url = credential
            .authorization_url(&[MANAGEMENT_SCOPE], "http://localhost:1234", "challenge", "state")
            .unwrap();

        assert!(url
            .as_str()
            .starts_with("https://login.microsoftonline.com/organizations/oauth2/v2.0/authorize"));
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["code_challenge"], "challenge");
        assert_eq!(pairs["redirect_uri"], "http://localhost:1234");
        assert_eq!(
            pairs["scope"],
            "https://management.azure.com/.default offline_access openid profile"
        );
    }
}
