//! Function log output.
//!
//! Log lines produced while the runtime is running are filtered by level,
//! formatted as plain text or JSON, and written to a [`LogSink`]. Inside the
//! managed environment the sink is a [`FramedTelemetryLogSink`] writing to the
//! telemetry file descriptor; elsewhere it is standard output.
//!
//! The runtime's own diagnostics are emitted with `tracing`. The
//! [`LambdaLogLayer`] forwards those events into a [`LambdaLogger`] so they
//! share the same filtering and framing as user log lines.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::RuntimeError;

mod format;
mod layer;
mod logger;
mod sink;

pub use format::{JsonLogFormatter, LogFormatter, TextLogFormatter};
pub use layer::{init, init_from_env, LambdaLogLayer};
pub use logger::{current_request_id, with_request_id, LambdaLogger};
pub use sink::{frame_type, FramedTelemetryLogSink, LogSink, StdOutLogSink, FRAME_HEADER_LEN};

/// Log level of a function log line.
///
/// Levels are ordered; `Undefined` is used for lines logged without a level
/// and is never filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// No level attached.
    #[default]
    Undefined,
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
    /// Fatal level.
    Fatal,
}

impl LogLevel {
    /// Returns the position of the level in declaration order.
    pub fn ordinal(self) -> u32 {
        self as u32
    }

    /// Returns the upper-case name of the level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "UNDEFINED",
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    /// Returns true if a line at `self` passes a `minimum` threshold.
    pub fn is_enabled_at(self, minimum: LogLevel) -> bool {
        self == Self::Undefined || self >= minimum
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UNDEFINED" => Ok(Self::Undefined),
            "TRACE" => Ok(Self::Trace),
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "FATAL" => Ok(Self::Fatal),
            _ => Err(RuntimeError::config(format!(
                "Invalid log level: '{}' expected one of [TRACE, DEBUG, INFO, WARN, ERROR, FATAL]",
                s
            ))),
        }
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            _ => Self::Error,
        }
    }
}

/// Output format of function log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LogFormat {
    /// One JSON object per line.
    Json = 0,
    /// Plain text.
    #[default]
    Text = 1,
}

impl LogFormat {
    /// Returns the numeric code used in telemetry frame headers.
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl FromStr for LogFormat {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JSON" => Ok(Self::Json),
            "TEXT" => Ok(Self::Text),
            _ => Err(RuntimeError::config(format!(
                "Invalid log format: '{}' expected one of [JSON, TEXT]",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordinals() {
        assert_eq!(LogLevel::Undefined.ordinal(), 0);
        assert_eq!(LogLevel::Trace.ordinal(), 1);
        assert_eq!(LogLevel::Fatal.ordinal(), 6);
    }

    #[test]
    fn test_level_parse_is_case_insensitive() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("Debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_filtering() {
        assert!(LogLevel::Undefined.is_enabled_at(LogLevel::Fatal));
        assert!(LogLevel::Error.is_enabled_at(LogLevel::Warn));
        assert!(LogLevel::Warn.is_enabled_at(LogLevel::Warn));
        assert!(!LogLevel::Info.is_enabled_at(LogLevel::Warn));
        assert!(LogLevel::Trace.is_enabled_at(LogLevel::Undefined));
    }

    #[test]
    fn test_format_codes() {
        assert_eq!(LogFormat::Json.code(), 0);
        assert_eq!(LogFormat::Text.code(), 1);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_level_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&LogLevel::Info).unwrap(), r#""INFO""#);
    }
}
