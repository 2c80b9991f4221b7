//! Application Insights telemetry export.

pub mod envelope;
pub mod exporter;
pub mod stats;
pub mod transmission;

pub use envelope::Envelope;
pub use exporter::{AppInsightsHandler, ExporterConfig};
pub use stats::{ExporterStats, StatsSnapshot};
pub use transmission::{TransmissionError, Transmitter};
