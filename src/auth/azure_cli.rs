use super::credential::{AccessToken, CredentialError, TokenCredential, single_resource};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

const NAME: &str = "AzureCliCredential";

/// Token from the signed-in Azure CLI (`az account get-access-token`).
pub struct AzureCliCredential {
    program: String,
    timeout: Duration,
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self {
            program: "az".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl AzureCliCredential {
    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn command(&self, resource: &str) -> Command {
        let args = [
            "account",
            "get-access-token",
            "--output",
            "json",
            "--resource",
            resource,
        ];
        let mut command = if cfg!(windows) {
            let mut command = Command::new("cmd");
            command.arg("/C").arg(&self.program);
            command
        } else {
            Command::new(&self.program)
        };
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

/// Parses the JSON printed by `az account get-access-token`.
///
/// Newer CLI versions include `expires_on` (epoch seconds); older ones only
/// `expiresOn` as local time.
pub fn parse_cli_output(stdout: &str) -> Result<AccessToken, CredentialError> {
    let token: CliToken = serde_json::from_str(stdout).map_err(|e| {
        CredentialError::authentication_failed(NAME, format!("unexpected CLI output: {e}"))
    })?;

    let expires_on = match (token.expires_on_epoch, token.expires_on.as_deref()) {
        (Some(epoch), _) => DateTime::from_timestamp(epoch, 0),
        (None, Some(local)) => parse_local_timestamp(local),
        (None, None) => None,
    }
    .ok_or_else(|| CredentialError::authentication_failed(NAME, "token has no valid expiry"))?;

    Ok(AccessToken::new(token.access_token, expires_on))
}

fn parse_local_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let resource = single_resource(NAME, scopes)?;
        debug!("Requesting token from Azure CLI for {}", resource);

        let output = match timeout(self.timeout, self.command(resource).output()).await {
            Err(_) => {
                return Err(CredentialError::Timeout {
                    credential: NAME.to_string(),
                    message: format!("Azure CLI did not answer within {:?}", self.timeout),
                });
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::unavailable(NAME, "Azure CLI not found on path"));
            }
            Ok(result) => result?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("az login") || stderr.contains("not recognized") {
                return Err(CredentialError::unavailable(
                    NAME,
                    "please run 'az login' to set up an account",
                ));
            }
            return Err(CredentialError::authentication_failed(NAME, stderr.trim()));
        }

        parse_cli_output(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cli_output_with_epoch() {
        let token = parse_cli_output(
            r#"{
                "accessToken": "cli-token",
                "expiresOn": "2023-11-14 22:13:20.000000",
                "expires_on": 1700000000,
                "subscription": "sub",
                "tenant": "tenant",
                "tokenType": "Bearer"
            }"#,
        )
        .unwrap();
        assert_eq!(token.token, "cli-token");
        assert_eq!(token.expires_on.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_cli_output_with_local_time_only() {
        let token = parse_cli_output(
            r#"{"accessToken": "cli-token", "expiresOn": "2030-01-01 12:00:00.123456"}"#,
        )
        .unwrap();
        assert_eq!(token.token, "cli-token");
        assert!(token.expires_on > Utc::now());
    }

    #[test]
    fn test_parse_cli_output_rejects_garbage() {
        assert!(parse_cli_output("ERROR: something").is_err());
        assert!(parse_cli_output(r#"{"accessToken": "x"}"#).is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let credential = AzureCliCredential::with_program(
            "definitely-not-an-installed-az-binary",
            Duration::from_secs(5),
        );
        if cfg!(windows) {
            return;
        }
        let err = credential
            .get_token(&[super::super::credential::MANAGEMENT_SCOPE])
            .await
            .unwrap_err();
        assert!(err.is_unavailable(), "unexpected error: {err:?}");
    }
}
