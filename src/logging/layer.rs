use super::record::LogRecord;
use super::registry::LoggerRegistry;
use crate::domain::LogLevel;
use std::cell::Cell;
use std::sync::Arc;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

thread_local! {
    static SUPPRESSED: Cell<bool> = const { Cell::new(false) };
}

/// Stops routing events raised on the current thread.
///
/// The telemetry exporter calls this on its own thread so that events from
/// its HTTP stack never feed back into the queue it drains.
pub(crate) fn suppress_current_thread() {
    SUPPRESSED.with(|flag| flag.set(true));
}

fn is_suppressed() -> bool {
    SUPPRESSED.with(Cell::get)
}

/// `tracing` layer that hands events to a [`LoggerRegistry`].
pub struct RoutingLayer {
    registry: Arc<LoggerRegistry>,
}

impl RoutingLayer {
    pub fn new(registry: Arc<LoggerRegistry>) -> Self {
        Self { registry }
    }
}

impl<S: Subscriber> Layer<S> for RoutingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if is_suppressed() {
            return;
        }
        let metadata = event.metadata();
        if !self
            .registry
            .enabled(metadata.target(), LogLevel::from(metadata.level()))
        {
            return;
        }
        self.registry.dispatch(&LogRecord::from_event(event));
    }
}
