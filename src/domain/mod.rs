//! Types shared by every layer of the crate:
//! - `LogLevel`: severity used by loggers, handlers and the telemetry sink
//! - `AmlError`: top-level error type

pub mod error;
pub mod log_level;

pub use error::AmlError;
pub use log_level::LogLevel;
