use super::config::LoggingConfig;
use super::handler::{ConsoleHandler, Handler, HandlerKind};
use super::layer::RoutingLayer;
use super::registry::LoggerRegistry;
use super::LoggingError;
use crate::sender::AppInsightsHandler;
use std::sync::{Arc, OnceLock};
use tracing::debug;
use tracing_subscriber::prelude::*;

static SUBSCRIBER_INSTALLED: OnceLock<bool> = OnceLock::new();

/// What one `attach` call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachReport {
    /// Packages configured by this call, in order.
    pub packages: Vec<String>,
    /// Handlers actually added; already-present kinds are skipped.
    pub attached: Vec<(String, HandlerKind)>,
    /// Whether the routing layer is the process-wide `tracing` subscriber.
    pub subscriber_installed: bool,
}

impl AttachReport {
    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }
}

/// Wires configured package loggers to the remote sink and, optionally, the console.
pub struct LoggingAttacher {
    registry: Arc<LoggerRegistry>,
    install_subscriber: bool,
}

impl LoggingAttacher {
    /// Attacher over a private registry; no global subscriber is installed.
    pub fn new(registry: Arc<LoggerRegistry>) -> Self {
        Self {
            registry,
            install_subscriber: false,
        }
    }

    /// Attacher over the process-wide registry.
    pub fn global() -> Self {
        Self {
            registry: LoggerRegistry::global(),
            install_subscriber: true,
        }
    }

    pub fn registry(&self) -> &Arc<LoggerRegistry> {
        &self.registry
    }

    /// Configures the baseline output, then gives every configured package
    /// (plus `extra_package`) one remote-sink handler and, when
    /// `include_console` is set, one console handler.
    ///
    /// Calling this repeatedly never duplicates a handler kind on a logger.
    pub fn attach(
        &self,
        config: &LoggingConfig,
        extra_package: Option<&str>,
        include_console: bool,
    ) -> Result<AttachReport, LoggingError> {
        let remote: Arc<dyn Handler> = Arc::new(AppInsightsHandler::new(
            &config.ai_instrumentation_key,
            config.loglevel_own,
            config.exporter.clone(),
        )?);
        self.attach_with_remote(config, extra_package, include_console, remote)
    }

    /// Same as [`attach`](Self::attach) with a caller-supplied remote handler.
    pub fn attach_with_remote(
        &self,
        config: &LoggingConfig,
        extra_package: Option<&str>,
        include_console: bool,
        remote: Arc<dyn Handler>,
    ) -> Result<AttachReport, LoggingError> {
        let formatter = config.basic_config.formatter()?;
        self.registry
            .set_baseline(config.basic_config.level, formatter.clone());

        let subscriber_installed = self.install_subscriber && install_global_subscriber(&self.registry);

        let console: Option<Arc<dyn Handler>> = include_console
            .then(|| Arc::new(ConsoleHandler::stderr(config.loglevel_own, formatter)) as Arc<dyn Handler>);

        let packages = config.packages(extra_package);
        let mut attached = Vec::new();
        for package in &packages {
            let logger = self.registry.get_logger(package);
            logger.set_level(config.loglevel_own);

            if logger.add_handler(remote.clone()) {
                attached.push((package.clone(), HandlerKind::RemoteSink));
            } else {
                debug!("Handler for {package} has been set already.");
            }

            if let Some(console) = &console {
                if logger.add_handler(console.clone()) {
                    attached.push((package.clone(), HandlerKind::Console));
                } else {
                    debug!("Console handler for {package} has been set already.");
                }
            }
        }

        Ok(AttachReport {
            packages,
            attached,
            subscriber_installed,
        })
    }
}

fn install_global_subscriber(registry: &Arc<LoggerRegistry>) -> bool {
    *SUBSCRIBER_INSTALLED.get_or_init(|| {
        let subscriber = tracing_subscriber::registry().with(RoutingLayer::new(registry.clone()));
        match tracing::subscriber::set_global_default(subscriber) {
            Ok(()) => true,
            Err(e) => {
                eprintln!(
                    "Warning: {e}; add logging::RoutingLayer to the existing subscriber to route package logs"
                );
                false
            }
        }
    })
}

/// Attaches handlers on the process-wide registry and installs the routing
/// subscriber on first use.
///
/// Remote handlers on the global registry live for the whole process and
/// their exporter threads are never joined. Call [`flush`] before the process
/// exits, otherwise records still buffered for the next export are lost.
pub fn attach(
    config: &LoggingConfig,
    extra_package: Option<&str>,
    include_console: bool,
) -> Result<AttachReport, LoggingError> {
    LoggingAttacher::global().attach(config, extra_package, include_console)
}

/// Flushes every handler on the process-wide registry, blocking until each
/// remote handler has delivered its buffered records or its flush timeout
/// passes.
pub fn flush() {
    LoggerRegistry::global().flush_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LogLevel;
    use crate::logging::handler::MockHandler;

    fn config() -> LoggingConfig {
        LoggingConfig::from_toml_str(
            r#"
            loglevel_own = "INFO"
            own_packages = ["pkg_a", "pkg_b"]
            ai_instrumentation_key = "InstrumentationKey=key"
            [basic_config]
            level = "WARNING"
            "#,
        )
        .unwrap()
    }

    fn remote() -> Arc<dyn Handler> {
        let mut handler = MockHandler::new();
        handler.expect_kind().return_const(HandlerKind::RemoteSink);
        handler.expect_level().return_const(LogLevel::Info);
        Arc::new(handler)
    }

    #[test]
    fn test_repeated_attach_is_idempotent() {
        let attacher = LoggingAttacher::new(Arc::new(LoggerRegistry::new()));
        let config = config();

        let first = attacher.attach_with_remote(&config, None, false, remote()).unwrap();
        let second = attacher.attach_with_remote(&config, None, false, remote()).unwrap();

        assert_eq!(first.attached_count(), 2);
        assert_eq!(second.attached_count(), 0);
        for package in ["pkg_a", "pkg_b"] {
            let logger = attacher.registry().logger(package).unwrap();
            assert_eq!(logger.handler_count(), 1);
            assert_eq!(logger.level(), Some(LogLevel::Info));
        }
        assert!(!first.subscriber_installed);
    }

    #[test]
    fn test_console_is_added_alongside_remote() {
        let attacher = LoggingAttacher::new(Arc::new(LoggerRegistry::new()));
        let config = config();

        attacher.attach_with_remote(&config, None, false, remote()).unwrap();
        let report = attacher.attach_with_remote(&config, None, true, remote()).unwrap();

        assert_eq!(
            report.attached,
            vec![
                ("pkg_a".to_string(), HandlerKind::Console),
                ("pkg_b".to_string(), HandlerKind::Console),
            ]
        );
        let logger = attacher.registry().logger("pkg_a").unwrap();
        assert_eq!(logger.handler_kinds(), vec![HandlerKind::RemoteSink, HandlerKind::Console]);
    }

    #[test]
    fn test_extra_package_is_configured() {
        let attacher = LoggingAttacher::new(Arc::new(LoggerRegistry::new()));
        let report = attacher
            .attach_with_remote(&config(), Some("my_app"), false, remote())
            .unwrap();
        assert_eq!(report.packages, vec!["pkg_a", "pkg_b", "my_app"]);
        assert!(attacher.registry().logger("my_app").unwrap().has_handler(&HandlerKind::RemoteSink));
    }

    #[test]
    fn test_foreign_handler_does_not_block_remote_sink() {
        let registry = Arc::new(LoggerRegistry::new());
        let mut foreign = MockHandler::new();
        foreign
            .expect_kind()
            .return_const(HandlerKind::Custom("file".to_string()));
        foreign.expect_level().return_const(LogLevel::Debug);
        registry.get_logger("pkg_a").add_handler(Arc::new(foreign));

        let attacher = LoggingAttacher::new(registry.clone());
        attacher.attach_with_remote(&config(), None, false, remote()).unwrap();

        let logger = registry.logger("pkg_a").unwrap();
        assert_eq!(logger.handler_count(), 2);
        assert!(logger.has_handler(&HandlerKind::RemoteSink));
    }

    #[test]
    fn test_baseline_follows_last_call() {
        let registry = Arc::new(LoggerRegistry::new());
        let attacher = LoggingAttacher::new(registry.clone());
        attacher.attach_with_remote(&config(), None, false, remote()).unwrap();
        assert_eq!(registry.baseline_level(), LogLevel::Warn);

        let mut quieter = config();
        quieter.basic_config.level = LogLevel::Error;
        attacher.attach_with_remote(&quieter, None, false, remote()).unwrap();
        assert_eq!(registry.baseline_level(), LogLevel::Error);
    }

    #[test]
    fn test_attach_builds_remote_sink_from_config() {
        let attacher = LoggingAttacher::new(Arc::new(LoggerRegistry::new()));
        let report = attacher.attach(&config(), None, false).unwrap();
        assert_eq!(report.attached_count(), 2);

        let mut broken = config();
        broken.ai_instrumentation_key = "IngestionEndpoint=https://example.com/".to_string();
        assert!(matches!(
            attacher.attach(&broken, None, false),
            Err(LoggingError::InvalidConnectionString(_))
        ));
    }
}
