use super::record::{DEFAULT_FORMAT, RecordFormatter};
use crate::app::config::ConfigError;
use crate::domain::LogLevel;
use crate::sender::ExporterConfig;
use std::path::Path;

/// Keys every logging configuration must define.
pub const REQUIRED_KEYS: [&str; 4] = [
    "loglevel_own",
    "own_packages",
    "basic_config",
    "ai_instrumentation_key",
];

/// Baseline (root) output settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicConfig {
    pub level: LogLevel,
    pub format: String,
    pub datefmt: Option<String>,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            format: DEFAULT_FORMAT.to_string(),
            datefmt: None,
        }
    }
}

impl BasicConfig {
    pub fn formatter(&self) -> Result<RecordFormatter, ConfigError> {
        RecordFormatter::new(&self.format, self.datefmt.as_deref())
    }

    fn from_table(table: &toml::Table) -> Result<Self, ConfigError> {
        let mut config = BasicConfig::default();
        if let Some(value) = table.get("level") {
            config.level = parse_level("basic_config.level", value)?;
        }
        if let Some(value) = table.get("format") {
            config.format = expect_str("basic_config.format", value)?.to_string();
        }
        if let Some(value) = table.get("datefmt") {
            config.datefmt = Some(expect_str("basic_config.datefmt", value)?.to_string());
        }
        config.formatter()?;
        Ok(config)
    }
}

/// Logging section of the settings file.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level applied to every package logger and to the handlers attached to them.
    pub loglevel_own: LogLevel,
    pub own_packages: Vec<String>,
    pub basic_config: BasicConfig,
    /// Application Insights connection string or bare instrumentation key.
    pub ai_instrumentation_key: String,
    /// Optional `[exporter]` sub-table.
    pub exporter: ExporterConfig,
}

impl LoggingConfig {
    pub fn from_table(table: &toml::Table) -> Result<Self, ConfigError> {
        for key in REQUIRED_KEYS {
            if !table.contains_key(key) {
                return Err(ConfigError::MissingKey(key.to_string()));
            }
        }

        let loglevel_own = parse_level("loglevel_own", &table["loglevel_own"])?;

        let own_packages = table["own_packages"]
            .as_array()
            .ok_or_else(|| ConfigError::invalid("own_packages", "expected an array of strings"))?
            .iter()
            .map(|value| expect_str("own_packages", value).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;

        let basic_config = table["basic_config"]
            .as_table()
            .ok_or_else(|| ConfigError::invalid("basic_config", "expected a table"))
            .and_then(BasicConfig::from_table)?;

        let ai_instrumentation_key =
            expect_str("ai_instrumentation_key", &table["ai_instrumentation_key"])?.to_string();

        let exporter: ExporterConfig = match table.get("exporter") {
            Some(value) => value.clone().try_into()?,
            None => ExporterConfig::default(),
        };
        exporter.validate()?;

        Ok(Self {
            loglevel_own,
            own_packages,
            basic_config,
            ai_instrumentation_key,
            exporter,
        })
    }

    /// Accepts either a bare logging table or a document with a `[logging]` table.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(content)?;
        match table.get("logging").and_then(toml::Value::as_table) {
            Some(logging) => Self::from_table(logging),
            None => Self::from_table(&table),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Configured packages followed by the optional extra one.
    pub fn packages(&self, extra_package: Option<&str>) -> Vec<String> {
        let mut packages = self.own_packages.clone();
        if let Some(extra) = extra_package.filter(|name| !name.is_empty()) {
            packages.push(extra.to_string());
        }
        packages
    }
}

fn expect_str<'a>(key: &str, value: &'a toml::Value) -> Result<&'a str, ConfigError> {
    value
        .as_str()
        .ok_or_else(|| ConfigError::invalid(key, format!("expected a string, got {}", value.type_str())))
}

fn parse_level(key: &str, value: &toml::Value) -> Result<LogLevel, ConfigError> {
    expect_str(key, value)?
        .parse()
        .map_err(|e: crate::domain::log_level::ParseLevelError| ConfigError::invalid(key, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        loglevel_own = "INFO"
        own_packages = ["__main__", "pkgA"]
        ai_instrumentation_key = "InstrumentationKey=KEY"

        [basic_config]
        level = "WARNING"
        format = "%(asctime)s|||%(levelname)-8s|%(name)s|%(message)s"
        datefmt = "%Y-%m-%d %H:%M:%S"
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = LoggingConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.loglevel_own, LogLevel::Info);
        assert_eq!(config.own_packages, vec!["__main__", "pkgA"]);
        assert_eq!(config.basic_config.level, LogLevel::Warn);
        assert_eq!(config.basic_config.datefmt.as_deref(), Some("%Y-%m-%d %H:%M:%S"));
        assert_eq!(config.ai_instrumentation_key, "InstrumentationKey=KEY");
    }

    #[test]
    fn test_nested_logging_table() {
        let nested = format!("[logging]\n{}", FULL.replace("[basic_config]", "[logging.basic_config]"));
        let config = LoggingConfig::from_toml_str(&nested).unwrap();
        assert_eq!(config.own_packages.len(), 2);
    }

    #[test]
    fn test_each_required_key_is_enforced() {
        let table: toml::Table = toml::from_str(FULL).unwrap();
        for key in REQUIRED_KEYS {
            let mut partial = table.clone();
            partial.remove(key);
            match LoggingConfig::from_table(&partial) {
                Err(ConfigError::MissingKey(missing)) => assert_eq!(missing, key),
                other => panic!("Expected MissingKey({key}), got {other:?}"),
            }
        }
    }

    #[test]
    fn test_basic_config_fields_are_optional() {
        let content = r#"
            loglevel_own = "DEBUG"
            own_packages = []
            ai_instrumentation_key = "KEY"
            basic_config = {}
        "#;
        let config = LoggingConfig::from_toml_str(content).unwrap();
        assert_eq!(config.basic_config, BasicConfig::default());
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let content = FULL.replace("loglevel_own = \"INFO\"", "loglevel_own = \"LOUD\"");
        let err = LoggingConfig::from_toml_str(&content).unwrap_err();
        assert!(err.to_string().contains("loglevel_own"));
    }

    #[test]
    fn test_non_string_package_is_rejected() {
        let content = FULL.replace("[\"__main__\", \"pkgA\"]", "[\"__main__\", 3]");
        assert!(LoggingConfig::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_packages_appends_extra() {
        let config = LoggingConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.packages(Some("extra")), vec!["__main__", "pkgA", "extra"]);
        assert_eq!(config.packages(None), vec!["__main__", "pkgA"]);
    }

    #[test]
    fn test_exporter_table_is_optional() {
        let content = format!("{FULL}\n[exporter]\nmax_batch_size = 10\n");
        let config = LoggingConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.exporter.max_batch_size, 10);
    }

    #[test]
    fn test_invalid_exporter_settings_are_rejected() {
        let content = format!("{FULL}\n[exporter]\nmax_batch_size = 0\n");
        let err = LoggingConfig::from_toml_str(&content).unwrap_err();
        assert!(err.to_string().contains("exporter.max_batch_size"));

        let content = format!("{FULL}\n[exporter.retry]\nmax_attempts = 0\n");
        assert!(LoggingConfig::from_toml_str(&content).is_err());
    }
}
