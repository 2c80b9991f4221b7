use super::envelope::{Envelope, default_tags};
use super::stats::{ExporterStats, StatsSnapshot};
use super::transmission::{Transmitter, build_http_client};
use crate::app::config::ConfigError;
use crate::domain::LogLevel;
use crate::logging::connection_string::ConnectionString;
use crate::logging::handler::{Handler, HandlerKind};
use crate::logging::layer::suppress_current_thread;
use crate::logging::record::LogRecord;
use crate::logging::LoggingError;
use crate::reliability::RetryPolicy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;

/// Batching and delivery settings for the telemetry exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub max_batch_size: usize,
    pub queue_capacity: usize,
    #[serde(rename = "export_interval_ms", with = "crate::app::config::duration_serde")]
    pub export_interval: Duration,
    #[serde(rename = "request_timeout_ms", with = "crate::app::config::duration_serde")]
    pub request_timeout: Duration,
    #[serde(rename = "flush_timeout_ms", with = "crate::app::config::duration_serde")]
    pub flush_timeout: Duration,
    pub enable_compression: bool,
    pub retry: RetryPolicy,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            queue_capacity: 8192,
            export_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
            flush_timeout: Duration::from_secs(5),
            enable_compression: true,
            retry: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
        }
    }
}

impl ExporterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::invalid("exporter.max_batch_size", "must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("exporter.queue_capacity", "must be greater than 0"));
        }
        if self.export_interval.is_zero() {
            return Err(ConfigError::invalid("exporter.export_interval_ms", "must be greater than 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("exporter.request_timeout_ms", "must be greater than 0"));
        }
        self.retry
            .validate()
            .map_err(|e| ConfigError::invalid("exporter.retry", e.to_string()))
    }
}

enum Command {
    Record(Box<Envelope>),
    Flush(std::sync::mpsc::Sender<()>),
}

struct ExporterThread {
    sender: Option<mpsc::Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for ExporterThread {
    fn drop(&mut self) {
        // Closing the queue makes the export loop send what is left and exit.
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Handler that ships records to Application Insights.
///
/// The background exporter starts on the first emitted record and runs on
/// its own thread with a single-threaded tokio runtime, so emitting never
/// blocks on the network.
pub struct AppInsightsHandler {
    level: LogLevel,
    connection: ConnectionString,
    config: ExporterConfig,
    tags: BTreeMap<String, String>,
    transmitter: Transmitter,
    stats: Arc<ExporterStats>,
    exporter: OnceLock<Option<Mutex<ExporterThread>>>,
}

impl AppInsightsHandler {
    pub fn new(
        connection_string: &str,
        level: LogLevel,
        config: ExporterConfig,
    ) -> Result<Self, LoggingError> {
        config.validate()?;
        let connection = ConnectionString::parse(connection_string)?;
        let http = build_http_client(config.request_timeout)?;
        let stats = Arc::new(ExporterStats::new());
        let transmitter = Transmitter::new(
            http,
            connection.track_url()?,
            config.retry.clone(),
            config.enable_compression,
            stats.clone(),
        );

        Ok(Self {
            level,
            connection,
            config,
            tags: default_tags(),
            transmitter,
            stats,
            exporter: OnceLock::new(),
        })
    }

    pub fn connection(&self) -> &ConnectionString {
        &self.connection
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the background exporter has been started.
    pub fn is_running(&self) -> bool {
        matches!(self.exporter.get(), Some(Some(_)))
    }

    fn exporter(&self) -> Option<&Mutex<ExporterThread>> {
        self.exporter
            .get_or_init(|| match self.spawn_exporter() {
                Ok(exporter) => Some(Mutex::new(exporter)),
                Err(e) => {
                    eprintln!("Failed to start telemetry exporter: {e}");
                    None
                }
            })
            .as_ref()
    }

    fn spawn_exporter(&self) -> std::io::Result<ExporterThread> {
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        let transmitter = self.transmitter.clone();
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name("appinsights-exporter".to_string())
            .spawn(move || {
                suppress_current_thread();
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        eprintln!("Failed to build exporter runtime: {e}");
                        return;
                    }
                };
                runtime.block_on(export_loop(transmitter, config, receiver));
            })?;

        Ok(ExporterThread {
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    fn try_send(&self, command: Command) -> Result<(), TrySendError<Command>> {
        let Some(exporter) = self.exporter() else {
            return Err(TrySendError::Closed(command));
        };
        let guard = exporter.lock();
        match guard.sender.as_ref() {
            Some(sender) => sender.try_send(command),
            None => Err(TrySendError::Closed(command)),
        }
    }
}

impl Handler for AppInsightsHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::RemoteSink
    }

    fn level(&self) -> LogLevel {
        self.level
    }

    fn emit(&self, record: &LogRecord) {
        let envelope = Envelope::message(&self.connection.instrumentation_key, &self.tags, record);
        match self.try_send(Command::Record(Box::new(envelope))) {
            Ok(()) => self.stats.record_queued(),
            Err(_) => self.stats.record_dropped(1),
        }
    }

    /// Blocks until queued records have been handed to the ingestion
    /// endpoint or `flush_timeout` elapses.
    fn flush(&self) {
        if !self.is_running() {
            return;
        }
        let deadline = Instant::now() + self.config.flush_timeout;
        let (ack_sender, ack_receiver) = std::sync::mpsc::channel();
        let mut command = Command::Flush(ack_sender);
        loop {
            match self.try_send(command) {
                Ok(()) => break,
                Err(TrySendError::Full(returned)) if Instant::now() < deadline => {
                    command = returned;
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(_) => return,
            }
        }
        let _ = ack_receiver.recv_timeout(deadline.saturating_duration_since(Instant::now()));
    }
}

async fn export_loop(
    transmitter: Transmitter,
    config: ExporterConfig,
    mut receiver: mpsc::Receiver<Command>,
) {
    let max_batch_size = config.max_batch_size.max(1);
    let mut batch: Vec<Envelope> = Vec::with_capacity(max_batch_size);
    let mut ticker = tokio::time::interval(config.export_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = receiver.recv() => match command {
                Some(Command::Record(envelope)) => {
                    batch.push(*envelope);
                    if batch.len() >= max_batch_size {
                        send_batch(&transmitter, &mut batch).await;
                    }
                }
                Some(Command::Flush(ack)) => {
                    send_batch(&transmitter, &mut batch).await;
                    let _ = ack.send(());
                }
                None => {
                    send_batch(&transmitter, &mut batch).await;
                    break;
                }
            },
            _ = ticker.tick() => send_batch(&transmitter, &mut batch).await,
        }
    }
}

async fn send_batch(transmitter: &Transmitter, batch: &mut Vec<Envelope>) {
    if batch.is_empty() {
        return;
    }
    let items = std::mem::take(batch);
    let count = items.len();
    if let Err(e) = transmitter.send(items).await {
        eprintln!(
            "Failed to export {count} log records to {}: {e}",
            transmitter.url()
        );
    }
}
