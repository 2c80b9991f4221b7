use super::envelope::Envelope;
use super::stats::ExporterStats;
use crate::reliability::RetryPolicy;
use flate2::{Compression, write::GzEncoder};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderValue};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum TransmissionError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),
    #[error("Ingestion rejected batch: HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("Gave up after {attempts} attempts, {remaining} items not delivered")]
    RetriesExhausted { attempts: u32, remaining: usize },
}

/// Response body of `v2.1/track`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackResponse {
    pub items_received: usize,
    pub items_accepted: usize,
    pub errors: Vec<TrackError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackError {
    pub index: usize,
    pub status_code: u16,
    #[serde(default)]
    pub message: String,
}

enum Outcome {
    Accepted,
    Partial { accepted: usize, retry: Vec<Envelope> },
    Retryable(String),
    Rejected { status: u16, message: String },
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 439 | 500 | 502 | 503 | 504)
}

/// Per-item statuses of a 206 response that are worth resending.
pub fn is_retryable_item_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 503)
}

/// Posts batches of envelopes to the ingestion endpoint with retries.
#[derive(Clone)]
pub struct Transmitter {
    http: reqwest::Client,
    url: Url,
    retry: RetryPolicy,
    compress: bool,
    stats: Arc<ExporterStats>,
}

impl Transmitter {
    pub fn new(
        http: reqwest::Client,
        url: Url,
        retry: RetryPolicy,
        compress: bool,
        stats: Arc<ExporterStats>,
    ) -> Self {
        Self {
            http,
            url,
            retry,
            compress,
            stats,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends `batch`, retrying whole-batch failures and the retryable items of
    /// partial successes. Returns the number of accepted items.
    pub async fn send(&self, batch: Vec<Envelope>) -> Result<usize, TransmissionError> {
        let mut pending = batch;
        let mut accepted = 0;
        let mut attempts = 0;

        while !pending.is_empty() {
            attempts += 1;
            let outcome = match self.post(&pending).await {
                Ok(outcome) => outcome,
                Err(TransmissionError::Request(e)) => Outcome::Retryable(e.to_string()),
                Err(e) => {
                    self.stats.record_dropped(pending.len());
                    return Err(e);
                }
            };

            match outcome {
                Outcome::Accepted => {
                    accepted += pending.len();
                    self.stats.record_sent(pending.len());
                    return Ok(accepted);
                }
                Outcome::Partial { accepted: n, retry } => {
                    accepted += n;
                    self.stats.record_sent(n);
                    let rejected = pending.len().saturating_sub(n + retry.len());
                    if rejected > 0 {
                        self.stats.record_dropped(rejected);
                    }
                    pending = retry;
                    if pending.is_empty() {
                        return Ok(accepted);
                    }
                }
                Outcome::Retryable(reason) => {
                    tracing::debug!("Telemetry batch attempt {attempts} failed: {reason}");
                }
                Outcome::Rejected { status, message } => {
                    self.stats.record_dropped(pending.len());
                    return Err(TransmissionError::Rejected { status, message });
                }
            }

            if !self.retry.should_retry(attempts) {
                self.stats.record_dropped(pending.len());
                return Err(TransmissionError::RetriesExhausted {
                    attempts,
                    remaining: pending.len(),
                });
            }
            self.stats.record_retry();
            tokio::time::sleep(self.retry.calculate_delay(attempts - 1)).await;
        }

        Ok(accepted)
    }

    async fn post(&self, batch: &[Envelope]) -> Result<Outcome, TransmissionError> {
        let body = serde_json::to_vec(batch)?;
        let body = if self.compress { gzip(&body)? } else { body };
        let bytes = body.len();

        let mut request = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if self.compress {
            request = request.header(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_request(false, bytes);
                return Err(e.into());
            }
        };
        let status = response.status();
        self.stats.record_request(status == StatusCode::OK, bytes);

        match status.as_u16() {
            200 => Ok(Outcome::Accepted),
            206 => {
                let parsed: TrackResponse = response.json().await.unwrap_or_default();
                Ok(partial_outcome(batch, &parsed))
            }
            code if is_retryable_status(code) => {
                Ok(Outcome::Retryable(format!("HTTP {code}")))
            }
            code => {
                let message = response.text().await.unwrap_or_default();
                Ok(Outcome::Rejected {
                    status: code,
                    message,
                })
            }
        }
    }
}

fn partial_outcome(batch: &[Envelope], response: &TrackResponse) -> Outcome {
    let indices: BTreeSet<usize> = response
        .errors
        .iter()
        .filter(|error| is_retryable_item_status(error.status_code))
        .map(|error| error.index)
        .filter(|index| *index < batch.len())
        .collect();
    let retry: Vec<Envelope> = indices.into_iter().map(|index| batch[index].clone()).collect();
    Outcome::Partial {
        accepted: response
            .items_accepted
            .min(batch.len().saturating_sub(retry.len())),
        retry,
    }
}

fn gzip(body: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(body)?;
    encoder.finish()
}

/// Client used by the exporter; `timeout` bounds each request.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LogLevel;
    use crate::logging::record::LogRecord;
    use std::collections::BTreeMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn envelopes(count: usize) -> Vec<Envelope> {
        (0..count)
            .map(|i| {
                let record = LogRecord::new(LogLevel::Info, "pkg_a", format!("message {i}"));
                Envelope::message("key", &BTreeMap::new(), &record)
            })
            .collect()
    }

    fn transmitter(server: &MockServer, compress: bool) -> (Transmitter, Arc<ExporterStats>) {
        let stats = Arc::new(ExporterStats::new());
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
            ..RetryPolicy::default()
        };
        let url = Url::parse(&format!("{}/v2.1/track", server.uri())).unwrap();
        let http = build_http_client(Duration::from_secs(5)).unwrap();
        (
            Transmitter::new(http, url, retry, compress, stats.clone()),
            stats,
        )
    }

    #[tokio::test]
    async fn test_accepted_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2.1/track"))
            .and(header("content-encoding", "gzip"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (transmitter, stats) = transmitter(&server, true);
        assert_eq!(transmitter.send(envelopes(3)).await.unwrap(), 3);
        assert_eq!(stats.snapshot().sent, 3);
    }

    #[tokio::test]
    async fn test_partial_success_retries_only_retryable_items() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(206).set_body_json(serde_json::json!({
                "itemsReceived": 3,
                "itemsAccepted": 1,
                "errors": [
                    {"index": 1, "statusCode": 500, "message": "busy"},
                    {"index": 2, "statusCode": 400, "message": "bad item"}
                ]
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (transmitter, stats) = transmitter(&server, false);
        assert_eq!(transmitter.send(envelopes(3)).await.unwrap(), 2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sent, 2);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.retries, 1);

        let requests = server.received_requests().await.unwrap();
        let retried: Vec<Envelope> = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].data.base_data.message, "message 1");
    }

    fn track_response(errors: serde_json::Value, accepted: usize) -> TrackResponse {
        serde_json::from_value(serde_json::json!({
            "itemsReceived": 1,
            "itemsAccepted": accepted,
            "errors": errors
        }))
        .unwrap()
    }

    #[test]
    fn test_partial_response_with_duplicate_indices() {
        let batch = envelopes(1);
        let response = track_response(
            serde_json::json!([
                {"index": 0, "statusCode": 500},
                {"index": 0, "statusCode": 500},
                {"index": 7, "statusCode": 503}
            ]),
            1,
        );

        match partial_outcome(&batch, &response) {
            Outcome::Partial { accepted, retry } => {
                assert_eq!(accepted, 0);
                assert_eq!(retry.len(), 1);
            }
            _ => panic!("Expected a partial outcome"),
        }
    }

    #[test]
    fn test_partial_response_item_statuses() {
        let batch = envelopes(4);
        let response = track_response(
            serde_json::json!([
                {"index": 0, "statusCode": 408},
                {"index": 1, "statusCode": 502},
                {"index": 2, "statusCode": 439},
                {"index": 3, "statusCode": 429}
            ]),
            0,
        );

        match partial_outcome(&batch, &response) {
            Outcome::Partial { retry, .. } => {
                let messages: Vec<&str> =
                    retry.iter().map(|e| e.data.base_data.message.as_str()).collect();
                assert_eq!(messages, vec!["message 0", "message 3"]);
            }
            _ => panic!("Expected a partial outcome"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_partial_errors_do_not_stop_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(206).set_body_json(serde_json::json!({
                "itemsReceived": 1,
                "itemsAccepted": 0,
                "errors": [
                    {"index": 0, "statusCode": 500},
                    {"index": 0, "statusCode": 500}
                ]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (transmitter, stats) = transmitter(&server, false);
        assert_eq!(transmitter.send(envelopes(1)).await.unwrap(), 1);
        assert_eq!(stats.snapshot().dropped, 0);
    }

    #[tokio::test]
    async fn test_retryable_status_exhausts_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let (transmitter, stats) = transmitter(&server, false);
        let err = transmitter.send(envelopes(2)).await.unwrap_err();
        assert!(matches!(
            err,
            TransmissionError::RetriesExhausted {
                attempts: 3,
                remaining: 2
            }
        ));
        assert_eq!(stats.snapshot().dropped, 2);
    }

    #[tokio::test]
    async fn test_non_retryable_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid ikey"))
            .expect(1)
            .mount(&server)
            .await;

        let (transmitter, _) = transmitter(&server, false);
        match transmitter.send(envelopes(1)).await {
            Err(TransmissionError::Rejected { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "invalid ikey");
            }
            other => panic!("Expected rejection, got {other:?}"),
        }
    }
}
