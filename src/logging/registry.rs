use super::handler::{Handler, HandlerKind};
use super::record::{LogRecord, RecordFormatter};
use crate::domain::LogLevel;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<Arc<LoggerRegistry>> = OnceLock::new();

/// A named logger owning its handler list.
pub struct PackageLogger {
    name: String,
    level: RwLock<Option<LogLevel>>,
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
}

impl PackageLogger {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            level: RwLock::new(None),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Explicit level, `None` until set (the baseline level then applies).
    pub fn level(&self) -> Option<LogLevel> {
        *self.level.read()
    }

    pub fn set_level(&self, level: LogLevel) {
        *self.level.write() = Some(level);
    }

    /// Attaches `handler` unless a handler of the same kind is already present.
    ///
    /// Returns `true` when the handler was attached.
    pub fn add_handler(&self, handler: Arc<dyn Handler>) -> bool {
        let kind = handler.kind();
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|existing| existing.kind() == kind) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Removes every handler of `kind`, returning how many were removed.
    pub fn remove_handlers(&self, kind: &HandlerKind) -> usize {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|handler| handler.kind() != *kind);
        before - handlers.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn handler_kinds(&self) -> Vec<HandlerKind> {
        self.handlers.read().iter().map(|h| h.kind()).collect()
    }

    pub fn has_handler(&self, kind: &HandlerKind) -> bool {
        self.handlers.read().iter().any(|h| h.kind() == *kind)
    }

    fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        self.handlers.read().clone()
    }
}

impl std::fmt::Debug for PackageLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageLogger")
            .field("name", &self.name)
            .field("level", &self.level())
            .field("handlers", &self.handler_kinds())
            .finish()
    }
}

struct Baseline {
    level: LogLevel,
    formatter: RecordFormatter,
}

/// Process-wide table of package loggers plus the baseline (root) output.
///
/// Records are routed to the most specific package logger whose name is a
/// prefix of the record's target on a `::` or `.` boundary. Records that
/// match no package logger, or whose logger has no handlers, go to the
/// baseline output.
pub struct LoggerRegistry {
    loggers: RwLock<HashMap<String, Arc<PackageLogger>>>,
    baseline: RwLock<Baseline>,
    root_writer: Mutex<Box<dyn Write + Send>>,
}

impl Default for LoggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggerRegistry {
    pub fn new() -> Self {
        Self::with_root_writer(Box::new(std::io::stderr()))
    }

    pub fn with_root_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            loggers: RwLock::new(HashMap::new()),
            baseline: RwLock::new(Baseline {
                level: LogLevel::Warn,
                formatter: RecordFormatter::default(),
            }),
            root_writer: Mutex::new(writer),
        }
    }

    /// Registry shared by the whole process.
    pub fn global() -> Arc<LoggerRegistry> {
        GLOBAL.get_or_init(|| Arc::new(LoggerRegistry::new())).clone()
    }

    /// Returns the logger for `name`, creating it on first use.
    pub fn get_logger(&self, name: &str) -> Arc<PackageLogger> {
        if let Some(logger) = self.loggers.read().get(name) {
            return logger.clone();
        }
        self.loggers
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(PackageLogger::new(name)))
            .clone()
    }

    /// Existing logger for exactly `name`.
    pub fn logger(&self, name: &str) -> Option<Arc<PackageLogger>> {
        self.loggers.read().get(name).cloned()
    }

    pub fn package_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loggers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Most specific logger responsible for `target`.
    pub fn resolve(&self, target: &str) -> Option<Arc<PackageLogger>> {
        let loggers = self.loggers.read();
        let mut candidate = target;
        loop {
            if let Some(logger) = loggers.get(candidate) {
                return Some(logger.clone());
            }
            candidate = parent_name(candidate)?;
        }
    }

    /// Replaces the baseline level and format. The last call wins.
    pub fn set_baseline(&self, level: LogLevel, formatter: RecordFormatter) {
        let mut baseline = self.baseline.write();
        baseline.level = level;
        baseline.formatter = formatter;
    }

    pub fn baseline_level(&self) -> LogLevel {
        self.baseline.read().level
    }

    /// Whether a record for `target` at `level` would produce any output.
    pub fn enabled(&self, target: &str, level: LogLevel) -> bool {
        let baseline = self.baseline_level();
        match self.resolve(target) {
            Some(logger) => logger.level().unwrap_or(baseline).admits(level),
            None => baseline.admits(level),
        }
    }

    /// Routes one record to its package logger's handlers or to the baseline output.
    pub fn dispatch(&self, record: &LogRecord) {
        let baseline = self.baseline_level();
        let Some(logger) = self.resolve(&record.name) else {
            if baseline.admits(record.level) {
                self.emit_root(record);
            }
            return;
        };

        if !logger.level().unwrap_or(baseline).admits(record.level) {
            return;
        }

        let handlers = logger.handlers();
        if handlers.is_empty() {
            self.emit_root(record);
            return;
        }
        for handler in handlers {
            if handler.level().admits(record.level) {
                handler.emit(record);
            }
        }
    }

    /// Flushes every handler of every package logger.
    pub fn flush_all(&self) {
        let loggers: Vec<Arc<PackageLogger>> = self.loggers.read().values().cloned().collect();
        for logger in loggers {
            for handler in logger.handlers() {
                handler.flush();
            }
        }
        let _ = self.root_writer.lock().flush();
    }

    fn emit_root(&self, record: &LogRecord) {
        let line = self.baseline.read().formatter.format(record);
        let mut writer = self.root_writer.lock();
        let _ = writeln!(writer, "{line}");
    }
}

fn parent_name(name: &str) -> Option<&str> {
    let colons = name.rfind("::");
    let dot = name.rfind('.');
    let cut = match (colons, dot) {
        (Some(c), Some(d)) => c.max(d),
        (Some(c), None) => c,
        (None, Some(d)) => d,
        (None, None) => return None,
    };
    Some(&name[..cut])
}
