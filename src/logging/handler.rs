use super::record::{LogRecord, RecordFormatter};
use crate::domain::LogLevel;
use parking_lot::Mutex;
use std::io::Write;

#[cfg(test)]
use mockall::automock;

/// What a handler does; a package logger holds at most one handler per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    RemoteSink,
    Console,
    Custom(String),
}

/// Receives records routed to a package logger.
#[cfg_attr(test, automock)]
pub trait Handler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    /// Records below this level are not passed to `emit`.
    fn level(&self) -> LogLevel;

    fn emit(&self, record: &LogRecord);

    fn flush(&self) {}
}

/// Writes formatted records to stderr (or any writer).
pub struct ConsoleHandler {
    level: LogLevel,
    formatter: RecordFormatter,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleHandler {
    pub fn stderr(level: LogLevel, formatter: RecordFormatter) -> Self {
        Self::with_writer(level, formatter, Box::new(std::io::stderr()))
    }

    pub fn with_writer(
        level: LogLevel,
        formatter: RecordFormatter,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            level,
            formatter,
            writer: Mutex::new(writer),
        }
    }
}

impl Handler for ConsoleHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Console
    }

    fn level(&self) -> LogLevel {
        self.level
    }

    fn emit(&self, record: &LogRecord) {
        let line = self.formatter.format(record);
        let mut writer = self.writer.lock();
        let _ = writeln!(writer, "{line}");
    }

    fn flush(&self) {
        let _ = self.writer.lock().flush();
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::SharedBuffer;
    use super::*;

    #[test]
    fn test_console_handler_writes_formatted_line() {
        let buffer = SharedBuffer::default();
        let formatter = RecordFormatter::new("%(levelname)s|%(name)s|%(message)s", None).unwrap();
        let handler = ConsoleHandler::with_writer(LogLevel::Info, formatter, Box::new(buffer.clone()));

        handler.emit(&LogRecord::new(LogLevel::Warn, "pkgA", "disk almost full"));
        handler.flush();

        assert_eq!(buffer.contents(), "WARNING|pkgA|disk almost full\n");
        assert_eq!(handler.kind(), HandlerKind::Console);
        assert_eq!(handler.level(), LogLevel::Info);
    }
}
