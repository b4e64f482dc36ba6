//! Runtime configuration read from the execution environment.
//!
//! The host passes all configuration through reserved environment variables.
//! They are read once at start into a [`LambdaEnvironment`] and a
//! [`ConcurrencyConfig`]; both are immutable afterwards.
//!
//! Invalid values never abort start-up. The documented default is used
//! instead and the problem is kept on [`LambdaEnvironment::warnings`] until
//! logging is ready, see [`LambdaEnvironment::log_warnings`].

use std::collections::HashMap;

use crate::logging::{LogFormat, LogLevel};

/// Host and port of the Runtime API.
pub const AWS_LAMBDA_RUNTIME_API: &str = "AWS_LAMBDA_RUNTIME_API";
/// Name of the function.
pub const AWS_LAMBDA_FUNCTION_NAME: &str = "AWS_LAMBDA_FUNCTION_NAME";
/// Version of the function being executed.
pub const AWS_LAMBDA_FUNCTION_VERSION: &str = "AWS_LAMBDA_FUNCTION_VERSION";
/// Memory available to the function in MB.
pub const AWS_LAMBDA_FUNCTION_MEMORY_SIZE: &str = "AWS_LAMBDA_FUNCTION_MEMORY_SIZE";
/// CloudWatch Logs group of the function.
pub const AWS_LAMBDA_LOG_GROUP_NAME: &str = "AWS_LAMBDA_LOG_GROUP_NAME";
/// CloudWatch Logs stream of the function.
pub const AWS_LAMBDA_LOG_STREAM_NAME: &str = "AWS_LAMBDA_LOG_STREAM_NAME";
/// Minimum level of function log lines.
pub const AWS_LAMBDA_LOG_LEVEL: &str = "AWS_LAMBDA_LOG_LEVEL";
/// `JSON` or `TEXT` function log lines.
pub const AWS_LAMBDA_LOG_FORMAT: &str = "AWS_LAMBDA_LOG_FORMAT";
/// How the execution environment was initialized, `snap-start` for SnapStart.
pub const AWS_LAMBDA_INITIALIZATION_TYPE: &str = "AWS_LAMBDA_INITIALIZATION_TYPE";
/// Requested number of concurrent invocation workers.
pub const AWS_LAMBDA_MAX_CONCURRENCY: &str = "AWS_LAMBDA_MAX_CONCURRENCY";
/// File descriptor of the telemetry log pipe.
pub const LAMBDA_TELEMETRY_LOG_FD: &str = "_LAMBDA_TELEMETRY_LOG_FD";
/// Trace header exported to the handler in single-worker mode.
pub const X_AMZN_TRACE_ID: &str = "_X_AMZN_TRACE_ID";

/// Initialization type value selecting the SnapStart lifecycle.
pub const INIT_TYPE_SNAP_START: &str = "snap-start";

/// Memory size assumed when the host does not provide one.
pub const DEFAULT_MEMORY_SIZE_MB: u32 = 128;

/// Upper bound for the number of concurrent invocation workers.
pub const MAX_CONCURRENCY_LIMIT: usize = 1000;

/// Source of environment variables.
pub trait EnvReader {
    /// Returns the value of `key`, or `None` if it is unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnv;

impl EnvReader for SystemEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvReader for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl EnvReader for HashMap<&str, &str> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).map(|v| v.to_string())
    }
}

/// The reserved environment of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaEnvironment {
    /// Host and port of the Runtime API
    pub runtime_api: Option<String>,
    /// Function name
    pub function_name: Option<String>,
    /// Function version
    pub function_version: Option<String>,
    /// Memory limit in MB
    pub memory_size_mb: u32,
    /// CloudWatch Logs group
    pub log_group_name: Option<String>,
    /// CloudWatch Logs stream
    pub log_stream_name: Option<String>,
    /// Minimum level of function log lines
    pub log_level: LogLevel,
    /// Format of function log lines
    pub log_format: LogFormat,
    /// Telemetry log file descriptor
    pub telemetry_log_fd: Option<i32>,
    /// Initialization type
    pub initialization_type: Option<String>,
    /// Problems found while reading the environment
    pub warnings: Vec<String>,
}

impl Default for LambdaEnvironment {
    fn default() -> Self {
        Self {
            runtime_api: None,
            function_name: None,
            function_version: None,
            memory_size_mb: DEFAULT_MEMORY_SIZE_MB,
            log_group_name: None,
            log_stream_name: None,
            log_level: LogLevel::Undefined,
            log_format: LogFormat::Text,
            telemetry_log_fd: None,
            initialization_type: None,
            warnings: Vec::new(),
        }
    }
}

impl LambdaEnvironment {
    /// Reads the process environment.
    pub fn from_env() -> Self {
        Self::from_reader(&SystemEnv)
    }

    /// Reads the environment from `env`.
    pub fn from_reader(env: &impl EnvReader) -> Self {
        let mut warnings = Vec::new();

        let memory_size_mb = match env.get(AWS_LAMBDA_FUNCTION_MEMORY_SIZE) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warnings.push(format!(
                    "Invalid {}: '{}', using {}",
                    AWS_LAMBDA_FUNCTION_MEMORY_SIZE, raw, DEFAULT_MEMORY_SIZE_MB
                ));
                DEFAULT_MEMORY_SIZE_MB
            }),
            None => DEFAULT_MEMORY_SIZE_MB,
        };

        let log_level = match env.get(AWS_LAMBDA_LOG_LEVEL) {
            Some(raw) => raw.parse().unwrap_or_else(|e: crate::RuntimeError| {
                warnings.push(e.to_string());
                LogLevel::Undefined
            }),
            None => LogLevel::Undefined,
        };

        let log_format = match env.get(AWS_LAMBDA_LOG_FORMAT) {
            Some(raw) => raw.parse().unwrap_or_else(|e: crate::RuntimeError| {
                warnings.push(e.to_string());
                LogFormat::Text
            }),
            None => LogFormat::Text,
        };

        let telemetry_log_fd = env
            .get(LAMBDA_TELEMETRY_LOG_FD)
            .and_then(|raw| raw.trim().parse().ok());

        Self {
            runtime_api: env.get(AWS_LAMBDA_RUNTIME_API),
            function_name: env.get(AWS_LAMBDA_FUNCTION_NAME),
            function_version: env.get(AWS_LAMBDA_FUNCTION_VERSION),
            memory_size_mb,
            log_group_name: env.get(AWS_LAMBDA_LOG_GROUP_NAME),
            log_stream_name: env.get(AWS_LAMBDA_LOG_STREAM_NAME),
            log_level,
            log_format,
            telemetry_log_fd,
            initialization_type: env.get(AWS_LAMBDA_INITIALIZATION_TYPE),
            warnings,
        }
    }

    /// Emits one warning per problem found while reading the environment.
    ///
    /// Call this after the log subscriber is installed; earlier events have
    /// nowhere to go.
    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            tracing::warn!("{}", warning);
        }
    }

    /// Returns true if the environment is initialized for SnapStart.
    pub fn is_snap_start(&self) -> bool {
        self.initialization_type.as_deref() == Some(INIT_TYPE_SNAP_START)
    }
}

/// How many invocations are handled at the same time.
///
/// Multi-concurrency is enabled when `AWS_LAMBDA_MAX_CONCURRENCY` is set; its
/// value is the requested number of workers. When disabled the resolved
/// worker count is zero and invocations are handled inline, one at a time.
///
/// # Examples
///
/// ```
/// use aws_lambda_runtime_client::config::ConcurrencyConfig;
///
/// let config = ConcurrencyConfig::resolve(true, Some("4"), 2);
/// assert_eq!(config.worker_threads(), 4);
/// assert!(config.is_multi_concurrent());
///
/// let config = ConcurrencyConfig::resolve(false, Some("4"), 2);
/// assert_eq!(config.worker_threads(), 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyConfig {
    enabled: bool,
    worker_threads: usize,
}

impl ConcurrencyConfig {
    /// Single-worker configuration.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            worker_threads: 0,
        }
    }

    /// Resolves the worker count.
    ///
    /// When `enabled`, `requested` must be an integer in `(0, 1000]`. Anything
    /// else logs one warning and falls back to `available`. A missing request
    /// also falls back to `available`, without a warning.
    pub fn resolve(enabled: bool, requested: Option<&str>, available: usize) -> Self {
        if !enabled {
            return Self::disabled();
        }

        let worker_threads = match requested {
            None => available,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(count) if count > 0 && count <= MAX_CONCURRENCY_LIMIT => count,
                _ => {
                    tracing::warn!(
                        value = %raw,
                        fallback = available,
                        "User configured {} is invalid. Please make sure it is a positive number more than zero and less than or equal {}",
                        AWS_LAMBDA_MAX_CONCURRENCY,
                        MAX_CONCURRENCY_LIMIT
                    );
                    available
                }
            },
        };

        Self {
            enabled: true,
            worker_threads: worker_threads.clamp(1, MAX_CONCURRENCY_LIMIT),
        }
    }

    /// Reads the process environment.
    pub fn from_env() -> Self {
        Self::from_reader(&SystemEnv)
    }

    /// Reads the configuration from `env`.
    pub fn from_reader(env: &impl EnvReader) -> Self {
        let requested = env.get(AWS_LAMBDA_MAX_CONCURRENCY);
        Self::resolve(requested.is_some(), requested.as_deref(), available_processors())
    }

    /// Returns true if multi-concurrency was requested.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the resolved worker count, zero when disabled.
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Returns true if at least two invocations may run at the same time.
    pub fn is_multi_concurrent(&self) -> bool {
        self.worker_threads >= 2
    }

    /// Start-up message describing the configuration.
    pub fn message(&self) -> String {
        format!(
            "Starting {} concurrent function handler workers.",
            self.worker_threads
        )
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Number of processor cores available to the process, at least one.
pub fn available_processors() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&'static str, &'static str)]) -> HashMap<&'static str, &'static str> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_environment_defaults() {
        let environment = LambdaEnvironment::from_reader(&env(&[]));
        assert_eq!(environment, LambdaEnvironment::default());
        assert_eq!(environment.memory_size_mb, 128);
        assert_eq!(environment.log_level, LogLevel::Undefined);
        assert_eq!(environment.log_format, LogFormat::Text);
        assert!(!environment.is_snap_start());
    }

    #[test]
    fn test_environment_reads_reserved_variables() {
        let environment = LambdaEnvironment::from_reader(&env(&[
            (AWS_LAMBDA_RUNTIME_API, "127.0.0.1:9001"),
            (AWS_LAMBDA_FUNCTION_NAME, "orders"),
            (AWS_LAMBDA_FUNCTION_VERSION, "$LATEST"),
            (AWS_LAMBDA_FUNCTION_MEMORY_SIZE, "512"),
            (AWS_LAMBDA_LOG_LEVEL, "warn"),
            (AWS_LAMBDA_LOG_FORMAT, "JSON"),
            (LAMBDA_TELEMETRY_LOG_FD, "3"),
            (AWS_LAMBDA_INITIALIZATION_TYPE, "snap-start"),
        ]));
        assert_eq!(environment.runtime_api.as_deref(), Some("127.0.0.1:9001"));
        assert_eq!(environment.function_name.as_deref(), Some("orders"));
        assert_eq!(environment.memory_size_mb, 512);
        assert_eq!(environment.log_level, LogLevel::Warn);
        assert_eq!(environment.log_format, LogFormat::Json);
        assert_eq!(environment.telemetry_log_fd, Some(3));
        assert!(environment.is_snap_start());
    }

    #[test]
    fn test_environment_invalid_values_use_defaults() {
        let environment = LambdaEnvironment::from_reader(&env(&[
            (AWS_LAMBDA_FUNCTION_MEMORY_SIZE, "lots"),
            (AWS_LAMBDA_LOG_LEVEL, "loud"),
            (AWS_LAMBDA_LOG_FORMAT, "yaml"),
            (LAMBDA_TELEMETRY_LOG_FD, "stdout"),
        ]));
        assert_eq!(environment.memory_size_mb, DEFAULT_MEMORY_SIZE_MB);
        assert_eq!(environment.log_level, LogLevel::Undefined);
        assert_eq!(environment.log_format, LogFormat::Text);
        assert_eq!(environment.telemetry_log_fd, None);
        assert_eq!(environment.warnings.len(), 3);
        assert!(environment.warnings[0].contains(AWS_LAMBDA_FUNCTION_MEMORY_SIZE));
        assert!(environment.warnings[1].contains("Invalid log level: 'loud'"));
        assert!(environment.warnings[2].contains("Invalid log format: 'yaml'"));
    }

    #[test]
    fn test_environment_valid_values_have_no_warnings() {
        let environment = LambdaEnvironment::from_reader(&env(&[
            (AWS_LAMBDA_FUNCTION_MEMORY_SIZE, "256"),
            (AWS_LAMBDA_LOG_LEVEL, "debug"),
            (AWS_LAMBDA_LOG_FORMAT, "text"),
        ]));
        assert!(environment.warnings.is_empty());
    }

    #[test]
    fn test_concurrency_disabled_ignores_request() {
        let config = ConcurrencyConfig::resolve(false, Some("8"), 4);
        assert!(!config.is_enabled());
        assert_eq!(config.worker_threads(), 0);
        assert!(!config.is_multi_concurrent());
    }

    #[test]
    fn test_concurrency_accepts_bounds() {
        assert_eq!(ConcurrencyConfig::resolve(true, Some("1"), 4).worker_threads(), 1);
        assert_eq!(ConcurrencyConfig::resolve(true, Some("1000"), 4).worker_threads(), 1000);
        assert!(!ConcurrencyConfig::resolve(true, Some("1"), 4).is_multi_concurrent());
    }

    #[test]
    fn test_concurrency_rejects_out_of_range() {
        assert_eq!(ConcurrencyConfig::resolve(true, Some("0"), 6).worker_threads(), 6);
        assert_eq!(ConcurrencyConfig::resolve(true, Some("-3"), 6).worker_threads(), 6);
        assert_eq!(ConcurrencyConfig::resolve(true, Some("1001"), 6).worker_threads(), 6);
    }

    #[test]
    fn test_concurrency_from_reader() {
        let config = ConcurrencyConfig::from_reader(&env(&[(AWS_LAMBDA_MAX_CONCURRENCY, "4")]));
        assert!(config.is_enabled());
        assert_eq!(config.worker_threads(), 4);

        let config = ConcurrencyConfig::from_reader(&env(&[]));
        assert_eq!(config, ConcurrencyConfig::disabled());
    }

    #[test]
    fn test_concurrency_message() {
        let config = ConcurrencyConfig::resolve(true, Some("3"), 1);
        assert_eq!(config.message(), "Starting 3 concurrent function handler workers.");
    }
}
