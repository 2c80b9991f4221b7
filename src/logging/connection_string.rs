use super::LoggingError;
use std::str::FromStr;
use url::Url;

pub const DEFAULT_INGESTION_ENDPOINT: &str = "https://dc.services.visualstudio.com/";

/// Application Insights connection string.
///
/// Accepts `InstrumentationKey=...;IngestionEndpoint=...` (keys are
/// case-insensitive, `EndpointSuffix`/`Location` are understood) or a bare
/// instrumentation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub instrumentation_key: String,
    pub ingestion_endpoint: Url,
}

impl ConnectionString {
    pub fn parse(value: &str) -> Result<Self, LoggingError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(LoggingError::InvalidConnectionString(
                "connection string is empty".to_string(),
            ));
        }

        if !value.contains('=') {
            return Ok(Self {
                instrumentation_key: value.to_string(),
                ingestion_endpoint: default_endpoint()?,
            });
        }

        let mut instrumentation_key = None;
        let mut ingestion_endpoint = None;
        let mut endpoint_suffix = None;
        let mut location = None;

        for pair in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, val)) = pair.split_once('=') else {
                return Err(LoggingError::InvalidConnectionString(format!(
                    "malformed segment '{pair}'"
                )));
            };
            let val = val.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "instrumentationkey" => instrumentation_key = Some(val.to_string()),
                "ingestionendpoint" => ingestion_endpoint = Some(val.to_string()),
                "endpointsuffix" => endpoint_suffix = Some(val.trim_matches('.').to_string()),
                "location" => location = Some(val.trim_matches('.').to_string()),
                _ => {}
            }
        }

        let instrumentation_key = instrumentation_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                LoggingError::InvalidConnectionString("InstrumentationKey is missing".to_string())
            })?;

        let endpoint = match (ingestion_endpoint, endpoint_suffix) {
            (Some(endpoint), _) => endpoint,
            (None, Some(suffix)) => match location {
                Some(location) => format!("https://{location}.dc.{suffix}"),
                None => format!("https://dc.{suffix}"),
            },
            (None, None) => DEFAULT_INGESTION_ENDPOINT.to_string(),
        };

        Ok(Self {
            instrumentation_key,
            ingestion_endpoint: normalize_endpoint(&endpoint)?,
        })
    }

    /// `{endpoint}/v2.1/track`
    pub fn track_url(&self) -> Result<Url, LoggingError> {
        self.ingestion_endpoint.join("v2.1/track").map_err(|e| {
            LoggingError::InvalidConnectionString(format!("invalid ingestion endpoint: {e}"))
        })
    }
}

impl FromStr for ConnectionString {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn default_endpoint() -> Result<Url, LoggingError> {
    normalize_endpoint(DEFAULT_INGESTION_ENDPOINT)
}

fn normalize_endpoint(endpoint: &str) -> Result<Url, LoggingError> {
    let mut url = Url::parse(endpoint).map_err(|e| {
        LoggingError::InvalidConnectionString(format!("invalid endpoint '{endpoint}': {e}"))
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_instrumentation_key() {
        let cs = ConnectionString::parse("00000000-0000-0000-0000-000000000000").unwrap();
        assert_eq!(cs.instrumentation_key, "00000000-0000-0000-0000-000000000000");
        assert_eq!(
            cs.track_url().unwrap().as_str(),
            "https://dc.services.visualstudio.com/v2.1/track"
        );
    }

    #[test]
    fn test_full_connection_string() {
        let cs = ConnectionString::parse(
            "InstrumentationKey=abc;IngestionEndpoint=https://westeurope-5.in.applicationinsights.azure.com/;LiveEndpoint=https://westeurope.livediagnostics.monitor.azure.com/",
        )
        .unwrap();
        assert_eq!(cs.instrumentation_key, "abc");
        assert_eq!(
            cs.track_url().unwrap().as_str(),
            "https://westeurope-5.in.applicationinsights.azure.com/v2.1/track"
        );
    }

    #[test]
    fn test_keys_are_case_insensitive_and_endpoint_is_normalized() {
        let cs =
            ConnectionString::parse("instrumentationkey=abc; ingestionendpoint=http://localhost:8080/ingest")
                .unwrap();
        assert_eq!(
            cs.track_url().unwrap().as_str(),
            "http://localhost:8080/ingest/v2.1/track"
        );
    }

    #[test]
    fn test_endpoint_suffix_and_location() {
        let cs = ConnectionString::parse(
            "InstrumentationKey=abc;EndpointSuffix=applicationinsights.azure.cn;Location=chinaeast2",
        )
        .unwrap();
        assert_eq!(
            cs.ingestion_endpoint.as_str(),
            "https://chinaeast2.dc.applicationinsights.azure.cn/"
        );
    }

    #[test]
    fn test_missing_key_is_rejected() {
        assert!(ConnectionString::parse("IngestionEndpoint=https://example.com/").is_err());
        assert!(ConnectionString::parse("InstrumentationKey=").is_err());
        assert!(ConnectionString::parse("   ").is_err());
    }
}
