use crate::app::config::ConfigError;
use crate::domain::LogLevel;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::OnceLock;
use tracing::field::{Field, Visit};

/// Format used by `basic_config` when none is given.
pub const DEFAULT_FORMAT: &str = "%(levelname)s:%(name)s:%(message)s";

const PLACEHOLDER_PATTERN: &str = r"%%|%\((\w+)\)(-)?(\d+)?(?:\.\d+)?([sdfr])";

static PLACEHOLDER: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// One log event as handlers see it.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Logger name; the `tracing` target for bridged events.
    pub name: String,
    pub message: String,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub thread_id: String,
    pub thread_name: Option<String>,
    /// Structured fields other than `message`.
    pub fields: BTreeMap<String, String>,
}

impl LogRecord {
    pub fn new(level: LogLevel, name: impl Into<String>, message: impl Into<String>) -> Self {
        let thread = std::thread::current();
        Self {
            timestamp: Utc::now(),
            level,
            name: name.into(),
            message: message.into(),
            module_path: None,
            file: None,
            line: None,
            thread_id: thread_id_digits(&thread),
            thread_name: thread.name().map(str::to_string),
            fields: BTreeMap::new(),
        }
    }

    pub fn from_event(event: &tracing::Event<'_>) -> Self {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut record = LogRecord::new(
            LogLevel::from(metadata.level()),
            metadata.target(),
            visitor.message,
        );
        record.module_path = metadata.module_path().map(str::to_string);
        record.file = metadata.file().map(str::to_string);
        record.line = metadata.line();
        record.fields = visitor.fields;
        record
    }

    /// Last path segment of the module, used for `%(module)s`.
    pub fn module(&self) -> &str {
        let path = self.module_path.as_deref().unwrap_or(&self.name);
        path.rsplit("::").next().unwrap_or(path)
    }

    pub fn file_name(&self) -> &str {
        let file = self.file.as_deref().unwrap_or_default();
        file.rsplit(['/', '\\']).next().unwrap_or(file)
    }
}

// "ThreadId(7)" -> "7"
fn thread_id_digits(thread: &std::thread::Thread) -> String {
    format!("{:?}", thread.id())
        .chars()
        .filter(char::is_ascii_digit)
        .collect()
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attribute {
    AscTime,
    Created,
    LevelName,
    LevelNo,
    Name,
    Message,
    Module,
    FileName,
    PathName,
    LineNo,
    Process,
    Thread,
    ThreadName,
}

impl Attribute {
    fn parse(key: &str) -> Option<Self> {
        Some(match key {
            "asctime" => Attribute::AscTime,
            "created" => Attribute::Created,
            "levelname" => Attribute::LevelName,
            "levelno" => Attribute::LevelNo,
            "name" => Attribute::Name,
            "message" => Attribute::Message,
            "module" => Attribute::Module,
            "filename" => Attribute::FileName,
            "pathname" => Attribute::PathName,
            "lineno" => Attribute::LineNo,
            "process" => Attribute::Process,
            "thread" => Attribute::Thread,
            "threadName" => Attribute::ThreadName,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Placeholder {
        attribute: Attribute,
        width: usize,
        left_align: bool,
    },
}

/// Renders records with `%(name)s`-style format strings.
#[derive(Debug, Clone)]
pub struct RecordFormatter {
    segments: Vec<Segment>,
    datefmt: Option<String>,
}

impl Default for RecordFormatter {
    fn default() -> Self {
        Self {
            segments: vec![
                Segment::Placeholder {
                    attribute: Attribute::LevelName,
                    width: 0,
                    left_align: false,
                },
                Segment::Literal(":".to_string()),
                Segment::Placeholder {
                    attribute: Attribute::Name,
                    width: 0,
                    left_align: false,
                },
                Segment::Literal(":".to_string()),
                Segment::Placeholder {
                    attribute: Attribute::Message,
                    width: 0,
                    left_align: false,
                },
            ],
            datefmt: None,
        }
    }
}

impl RecordFormatter {
    pub fn new(format: &str, datefmt: Option<&str>) -> Result<Self, ConfigError> {
        let placeholder = PLACEHOLDER
            .get_or_init(|| Regex::new(PLACEHOLDER_PATTERN))
            .as_ref()
            .map_err(|e| ConfigError::invalid("basic_config.format", e.to_string()))?;

        if let Some(datefmt) = datefmt
            && StrftimeItems::new(datefmt).any(|item| matches!(item, Item::Error))
        {
            return Err(ConfigError::invalid(
                "basic_config.datefmt",
                format!("invalid strftime format '{datefmt}'"),
            ));
        }

        let mut segments = Vec::new();
        let mut last = 0;
        for captures in placeholder.captures_iter(format) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Literal(format[last..whole.start()].to_string()));
            }
            last = whole.end();

            let Some(key) = captures.get(1) else {
                segments.push(Segment::Literal("%".to_string()));
                continue;
            };
            let attribute = Attribute::parse(key.as_str()).ok_or_else(|| {
                ConfigError::invalid(
                    "basic_config.format",
                    format!("unknown placeholder '%({})'", key.as_str()),
                )
            })?;
            let width = captures
                .get(3)
                .and_then(|w| w.as_str().parse().ok())
                .unwrap_or(0);
            segments.push(Segment::Placeholder {
                attribute,
                width,
                left_align: captures.get(2).is_some(),
            });
        }
        if last < format.len() {
            segments.push(Segment::Literal(format[last..].to_string()));
        }

        Ok(Self {
            segments,
            datefmt: datefmt.map(str::to_string),
        })
    }

    pub fn format(&self, record: &LogRecord) -> String {
        let mut out = String::with_capacity(128);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder {
                    attribute,
                    width,
                    left_align,
                } => {
                    let value = self.attribute_value(*attribute, record);
                    let width = *width;
                    let _ = if *left_align {
                        write!(out, "{value:<width$}")
                    } else {
                        write!(out, "{value:>width$}")
                    };
                }
            }
        }
        out
    }

    fn attribute_value(&self, attribute: Attribute, record: &LogRecord) -> String {
        match attribute {
            Attribute::AscTime => self.asctime(record),
            Attribute::Created => format!(
                "{:.6}",
                record.timestamp.timestamp_micros() as f64 / 1_000_000.0
            ),
            Attribute::LevelName => record.level.as_str().to_string(),
            Attribute::LevelNo => level_number(record.level).to_string(),
            Attribute::Name => record.name.clone(),
            Attribute::Message => record.message.clone(),
            Attribute::Module => record.module().to_string(),
            Attribute::FileName => record.file_name().to_string(),
            Attribute::PathName => record.file.clone().unwrap_or_default(),
            Attribute::LineNo => record.line.unwrap_or(0).to_string(),
            Attribute::Process => std::process::id().to_string(),
            Attribute::Thread => record.thread_id.clone(),
            Attribute::ThreadName => record
                .thread_name
                .clone()
                .unwrap_or_else(|| "unnamed".to_string()),
        }
    }

    fn asctime(&self, record: &LogRecord) -> String {
        let local = record.timestamp.with_timezone(&Local);
        let mut out = String::new();
        match &self.datefmt {
            Some(datefmt) => {
                let _ = write!(out, "{}", local.format(datefmt));
            }
            None => {
                let _ = write!(
                    out,
                    "{},{:03}",
                    local.format("%Y-%m-%d %H:%M:%S"),
                    local.timestamp_subsec_millis()
                );
            }
        }
        out
    }
}

fn level_number(level: LogLevel) -> u8 {
    match level {
        LogLevel::Trace => 5,
        LogLevel::Debug => 10,
        LogLevel::Info => 20,
        LogLevel::Warn => 30,
        LogLevel::Error => 40,
    }
}
