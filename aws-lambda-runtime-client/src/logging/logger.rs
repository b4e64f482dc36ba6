use std::future::Future;
use std::sync::{Arc, OnceLock};

use super::{FramedTelemetryLogSink, LogFormat, LogFormatter, LogLevel, LogSink, StdOutLogSink};
use crate::config::LambdaEnvironment;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Runs `future` with `request_id` attached to every log line it emits.
pub async fn with_request_id<F>(request_id: impl Into<String>, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id.into(), future).await
}

/// Returns the request id of the invocation being handled by the current
/// task, if any.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

/// Filters, formats and writes function log lines.
#[derive(Clone)]
pub struct LambdaLogger {
    sink: Arc<dyn LogSink>,
    formatter: Arc<dyn LogFormatter>,
    min_level: LogLevel,
    format: LogFormat,
}

impl LambdaLogger {
    /// Creates a logger.
    pub fn new(sink: Arc<dyn LogSink>, min_level: LogLevel, format: LogFormat) -> Self {
        Self {
            sink,
            formatter: Arc::from(<dyn LogFormatter>::for_format(format)),
            min_level,
            format,
        }
    }

    /// Creates a logger from the function's environment.
    ///
    /// Lines go to the telemetry file descriptor when one is configured and
    /// to standard output otherwise.
    pub fn from_environment(environment: &LambdaEnvironment) -> Self {
        let sink = match environment.telemetry_log_fd {
            Some(fd) => telemetry_sink(fd),
            None => Arc::new(StdOutLogSink) as Arc<dyn LogSink>,
        };
        Self::new(sink, environment.log_level, environment.log_format)
    }

    /// Returns the minimum level that is written.
    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Returns the output format.
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Returns true if a line at `level` would be written.
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level.is_enabled_at(self.min_level)
    }

    /// Logs a message at `level`.
    pub fn log(&self, message: &str, level: LogLevel) {
        if !self.is_enabled(level) {
            return;
        }
        let request_id = current_request_id();
        let line = self
            .formatter
            .format(message, level, request_id.as_deref());
        self.sink.log(level, self.format, line.as_bytes());
    }

    /// Logs raw bytes at `level` without formatting.
    pub fn log_bytes(&self, message: &[u8], level: LogLevel) {
        if self.is_enabled(level) {
            self.sink.log(level, self.format, message);
        }
    }

    /// Level used for the runtime's own reports: a real level in JSON mode,
    /// no level in text mode.
    pub(crate) fn report_level(&self, json_level: LogLevel) -> LogLevel {
        match self.format {
            LogFormat::Json => json_level,
            LogFormat::Text => LogLevel::Undefined,
        }
    }

    /// Flushes the sink.
    pub fn flush(&self) {
        self.sink.flush();
    }
}

impl std::fmt::Debug for LambdaLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LambdaLogger")
            .field("min_level", &self.min_level)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// The telemetry descriptor is owned by exactly one sink per process.
fn telemetry_sink(fd: i32) -> Arc<dyn LogSink> {
    static SINK: OnceLock<Arc<dyn LogSink>> = OnceLock::new();
    SINK.get_or_init(|| open_telemetry_sink(fd)).clone()
}

#[cfg(unix)]
fn open_telemetry_sink(fd: i32) -> Arc<dyn LogSink> {
    if fd < 0 {
        return Arc::new(StdOutLogSink);
    }
    // SAFETY: the descriptor is inherited from the host for the sole use of
    // this sink and `telemetry_sink` creates at most one owner.
    let sink = unsafe { FramedTelemetryLogSink::from_raw_fd(fd) };
    Arc::new(sink)
}

#[cfg(not(unix))]
fn open_telemetry_sink(_fd: i32) -> Arc<dyn LogSink> {
    Arc::new(StdOutLogSink)
}
