use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{LogFormat, LogLevel};

/// Turns a log message into the line written to the sink.
pub trait LogFormatter: Send + Sync {
    /// Formats `message` logged at `level`, optionally inside the invocation
    /// identified by `request_id`.
    fn format(&self, message: &str, level: LogLevel, request_id: Option<&str>) -> String;
}

impl dyn LogFormatter {
    /// Returns the formatter for a log format.
    pub fn for_format(format: LogFormat) -> Box<dyn LogFormatter> {
        match format {
            LogFormat::Json => Box::new(JsonLogFormatter),
            LogFormat::Text => Box::new(TextLogFormatter),
        }
    }
}

/// `[LEVEL] message`, or the bare message when no level is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLogFormatter;

impl LogFormatter for TextLogFormatter {
    fn format(&self, message: &str, level: LogLevel, _request_id: Option<&str>) -> String {
        if level == LogLevel::Undefined {
            return message.to_string();
        }
        format!("[{}] {}", level, message)
    }
}

/// One JSON object per line.
///
/// ```json
/// {"timestamp":"2024-03-01T12:00:00.123Z","message":"hi","level":"INFO","AWSRequestId":"abc"}
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLogFormatter;

#[derive(Serialize)]
struct StructuredLogMessage<'a> {
    timestamp: String,
    message: &'a str,
    level: LogLevel,
    #[serde(rename = "AWSRequestId", skip_serializing_if = "Option::is_none")]
    aws_request_id: Option<&'a str>,
}

impl JsonLogFormatter {
    /// Formats a message with an explicit timestamp.
    pub fn format_at(
        &self,
        message: &str,
        level: LogLevel,
        request_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> String {
        let record = StructuredLogMessage {
            timestamp: now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            message,
            level,
            aws_request_id: request_id,
        };
        // Serializing a struct of strings cannot fail.
        let mut line = serde_json::to_string(&record).unwrap_or_default();
        line.push('\n');
        line
    }
}

impl LogFormatter for JsonLogFormatter {
    fn format(&self, message: &str, level: LogLevel, request_id: Option<&str>) -> String {
        self.format_at(message, level, request_id, Utc::now())
    }
}
