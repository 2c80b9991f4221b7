use std::fmt;
use std::str::FromStr;

/// Severity of a log record, ordered from least to most severe.
///
/// Names follow the conventions of the logging configuration files this crate
/// reads (`INFO`, `WARNING`, ...), so `Display` renders `Warn` as `WARNING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Returned when a level name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError {
    pub input: String,
}

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid log level '{}'. Valid levels: {:?}",
            self.input,
            LogLevel::VALID_NAMES
        )
    }
}

impl std::error::Error for ParseLevelError {}

impl LogLevel {
    pub const VALID_NAMES: [&'static str; 8] = [
        "TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR", "CRITICAL", "FATAL",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    /// Application Insights `severityLevel` (Verbose = 0 .. Error = 3).
    pub fn severity_level(&self) -> u8 {
        match self {
            LogLevel::Trace | LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
        }
    }

    /// Whether a record at `level` passes a threshold of `self`.
    pub fn admits(&self, level: LogLevel) -> bool {
        level >= *self
    }
}

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" | "CRITICAL" | "FATAL" => Ok(LogLevel::Error),
            _ => Err(ParseLevelError {
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("Warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
    }

    #[test]
    fn test_critical_folds_into_error() {
        assert_eq!("CRITICAL".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("fatal".parse::<LogLevel>().unwrap(), LogLevel::Error);
    }

    #[test]
    fn test_invalid_level_lists_valid_names() {
        let err = "verbose".parse::<LogLevel>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("verbose"));
        assert!(msg.contains("WARNING"));
    }

    #[test]
    fn test_threshold_ordering() {
        assert!(LogLevel::Info.admits(LogLevel::Info));
        assert!(LogLevel::Info.admits(LogLevel::Error));
        assert!(!LogLevel::Info.admits(LogLevel::Debug));
        assert!(LogLevel::Trace.admits(LogLevel::Trace));
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(LogLevel::Debug.severity_level(), 0);
        assert_eq!(LogLevel::Info.severity_level(), 1);
        assert_eq!(LogLevel::Warn.severity_level(), 2);
        assert_eq!(LogLevel::Error.severity_level(), 3);
    }

    #[test]
    fn test_tracing_level_conversion() {
        assert_eq!(LogLevel::from(&tracing::Level::WARN), LogLevel::Warn);
        assert_eq!(tracing::Level::from(LogLevel::Debug), tracing::Level::DEBUG);
    }
}
