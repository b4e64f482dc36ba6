use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use super::{LambdaLogger, LogFormat, LogLevel};
use crate::config::LambdaEnvironment;
use crate::error::RuntimeError;

/// A `tracing` layer writing events through a [`LambdaLogger`].
///
/// When the logger has no minimum level configured, events below `INFO` are
/// dropped.
#[derive(Debug, Clone)]
pub struct LambdaLogLayer {
    logger: LambdaLogger,
    threshold: LogLevel,
}

impl LambdaLogLayer {
    /// Creates a layer forwarding to `logger`.
    pub fn new(logger: LambdaLogger) -> Self {
        let threshold = match logger.min_level() {
            LogLevel::Undefined => LogLevel::Info,
            level => level,
        };
        Self { logger, threshold }
    }

    /// Returns the logger events are forwarded to.
    pub fn logger(&self) -> &LambdaLogger {
        &self.logger
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LambdaLogLayer {
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        LogLevel::from(metadata.level()) >= self.threshold
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = LogLevel::from(event.metadata().level());
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut line = visitor.message;
        line.push_str(&visitor.fields);
        if self.logger.format() == LogFormat::Text {
            line.push('\n');
        }
        self.logger.log(&line, level);
    }
}

/// Installs a global `tracing` subscriber writing through `logger`.
pub fn init(logger: LambdaLogger) -> Result<(), RuntimeError> {
    tracing_subscriber::registry()
        .with(LambdaLogLayer::new(logger))
        .try_init()
        .map_err(|e| RuntimeError::config(format!("Failed to install log subscriber: {}", e)))
}

/// Installs a global `tracing` subscriber configured from the environment.
pub fn init_from_env() -> Result<LambdaLogger, RuntimeError> {
    let environment = LambdaEnvironment::from_env();
    let logger = LambdaLogger::from_environment(&environment);
    init(logger.clone())?;
    environment.log_warnings();
    Ok(logger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogSink;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct CapturingSink {
        lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl LogSink for CapturingSink {
        fn log(&self, level: LogLevel, _format: LogFormat, message: &[u8]) {
            self.lines
                .lock()
                .push((level, String::from_utf8_lossy(message).into_owned()));
        }
    }

    #[test]
    fn test_events_reach_sink_with_fields() {
        let sink = Arc::new(CapturingSink::default());
        let logger = LambdaLogger::new(sink.clone(), LogLevel::Undefined, LogFormat::Text);
        let subscriber = tracing_subscriber::registry().with(LambdaLogLayer::new(logger));

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("too verbose");
            tracing::warn!(worker = 3, "worker stopped");
        });

        let lines = sink.lines.lock();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, LogLevel::Warn);
        assert_eq!(lines[0].1, "[WARN] worker stopped worker=3\n");
    }

    #[test]
    fn test_explicit_minimum_level_applies() {
        let sink = Arc::new(CapturingSink::default());
        let logger = LambdaLogger::new(sink.clone(), LogLevel::Error, LogFormat::Json);
        let subscriber = tracing_subscriber::registry().with(LambdaLogLayer::new(logger));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("filtered");
            tracing::error!("kept");
        });

        let lines = sink.lines.lock();
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(lines[0].1.trim_end()).unwrap();
        assert_eq!(value["message"], "kept");
        assert_eq!(value["level"], "ERROR");
    }
}
