//! Error types for the runtime interface client.
//!
//! This module defines the error hierarchy for failures of the runtime
//! itself ([`RuntimeError`]) and the error value user handlers return
//! ([`HandlerError`]). Checkpoint/restore aggregate errors live in
//! [`crate::crac`].

use std::fmt;

use thiserror::Error;

use crate::crac::{CheckpointError, RestoreError};

/// Boxed error type used for opaque failures from user code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Exit code used when SnapStart lifecycle hooks fail.
pub const SNAPSTART_HOOK_EXIT_CODE: i32 = 64;

/// The main error type for the runtime interface client.
///
/// These are failures of the runtime, not of the user's handler. Handler
/// failures are reported to the control plane and never surface here,
/// except for fatal ones ([`RuntimeError::FatalHandler`]).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing what is misconfigured
        message: String,
    },

    /// The function initializer failed.
    #[error("Function initialization failed: {message}")]
    Init {
        /// Error message from the initializer
        message: String,
    },

    /// The one-time registration with the control plane failed.
    #[error("Registration failed: {message}")]
    Registration {
        /// Error message describing the failure
        message: String,
    },

    /// The HTTP request could not be sent or its response could not be read.
    #[error("Runtime API request to {endpoint} failed: {message}")]
    Transport {
        /// The endpoint that was being called
        endpoint: String,
        /// Error message from the HTTP layer
        message: String,
    },

    /// The control plane answered with an unexpected status code.
    #[error("Runtime API {endpoint} returned unexpected status {status}")]
    UnexpectedStatus {
        /// The endpoint that was being called
        endpoint: String,
        /// The HTTP status code received
        status: u16,
    },

    /// The control plane delivered an invocation the client cannot use.
    #[error("Malformed invocation: {message}")]
    MalformedInvocation {
        /// Error message describing what is missing or invalid
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    SerDes {
        /// Error message describing the serialization failure
        message: String,
    },

    /// One or more before-checkpoint hooks failed during SnapStart init.
    #[error("Before-checkpoint hooks failed: {0}")]
    BeforeCheckpoint(#[source] CheckpointError),

    /// One or more after-restore hooks failed during SnapStart restore.
    #[error("After-restore hooks failed: {0}")]
    AfterRestore(#[source] RestoreError),

    /// The handler failed in a way the process cannot recover from.
    #[error("Fatal handler error ({error_type}): {message}")]
    FatalHandler {
        /// The error type reported by the handler
        error_type: String,
        /// The error message reported by the handler
        message: String,
    },

    /// The runtime workers stopped without a shutdown event.
    #[error("Runtime worker failed: {message}")]
    Worker {
        /// Error message describing the failure
        message: String,
    },
}

impl RuntimeError {
    /// Creates a new Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a new Init error.
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init {
            message: message.into(),
        }
    }

    /// Creates a new Registration error.
    pub fn registration(message: impl Into<String>) -> Self {
        Self::Registration {
            message: message.into(),
        }
    }

    /// Creates a new Transport error.
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a new UnexpectedStatus error.
    pub fn unexpected_status(endpoint: impl Into<String>, status: u16) -> Self {
        Self::UnexpectedStatus {
            endpoint: endpoint.into(),
            status,
        }
    }

    /// Creates a new MalformedInvocation error.
    pub fn malformed_invocation(message: impl Into<String>) -> Self {
        Self::MalformedInvocation {
            message: message.into(),
        }
    }

    /// Creates a new SerDes error.
    pub fn serdes(message: impl Into<String>) -> Self {
        Self::SerDes {
            message: message.into(),
        }
    }

    /// Creates a new Worker error.
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    /// Returns true if this error came from talking to the control plane.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::UnexpectedStatus { .. })
    }

    /// Returns true if this error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Init { .. }
                | Self::Registration { .. }
                | Self::FatalHandler { .. }
                | Self::BeforeCheckpoint(_)
                | Self::AfterRestore(_)
        )
    }

    /// Returns the process exit code matching this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BeforeCheckpoint(_) | Self::AfterRestore(_) => SNAPSTART_HOOK_EXIT_CODE,
            _ => 1,
        }
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerDes {
            message: error.to_string(),
        }
    }
}

impl From<reqwest::Error> for RuntimeError {
    fn from(error: reqwest::Error) -> Self {
        let endpoint = error
            .url()
            .map(|url| url.path().to_string())
            .unwrap_or_default();
        Self::Transport {
            endpoint,
            message: error.to_string(),
        }
    }
}

impl From<CheckpointError> for RuntimeError {
    fn from(error: CheckpointError) -> Self {
        Self::BeforeCheckpoint(error)
    }
}

impl From<RestoreError> for RuntimeError {
    fn from(error: RestoreError) -> Self {
        Self::AfterRestore(error)
    }
}

/// An error returned by a user handler.
///
/// A handler error is reported to the control plane and the poll loop moves
/// on to the next invocation. Errors built with [`HandlerError::fatal`] are
/// the exception: they are reported and then stop the runtime.
///
/// # Examples
///
/// ```
/// use aws_lambda_runtime_client::HandlerError;
///
/// let err = HandlerError::new("ValidationError", "missing order id");
/// assert_eq!(err.error_type(), "ValidationError");
/// assert!(!err.is_fatal());
///
/// let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
/// let err = HandlerError::from_error(io);
/// assert_eq!(err.message(), "disk gone");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    error_type: String,
    message: String,
    stack_trace: Vec<String>,
    fatal: bool,
}

impl HandlerError {
    /// Creates a recoverable handler error.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            stack_trace: Vec::new(),
            fatal: false,
        }
    }

    /// Creates an unrecoverable handler error.
    ///
    /// The error is reported, then the runtime stops and the host restarts
    /// the execution environment.
    pub fn fatal(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            fatal: true,
            ..Self::new(error_type, message)
        }
    }

    /// Builds a handler error from any error value.
    ///
    /// The error type is the Rust type name of `E` and the stack trace holds
    /// the `source()` chain, outermost first.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error,
    {
        let mut stack_trace = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            stack_trace.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        Self {
            error_type: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            stack_trace,
            fatal: false,
        }
    }

    /// Builds a handler error from the payload of a caught panic.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::new("Panic", message)
    }

    /// Adds stack trace lines to this error.
    pub fn with_stack_trace<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stack_trace.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Returns the error type.
    pub fn error_type(&self) -> &str {
        &self.error_type
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the stack trace lines.
    pub fn stack_trace(&self) -> &[String] {
        &self.stack_trace
    }

    /// Returns true if this error must stop the runtime.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Renders the error the way it is written to the function log.
    pub fn reportable(&self) -> String {
        let mut out = format!("{}: {}\n", self.message, self.error_type);
        for line in &self.stack_trace {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<BoxError> for HandlerError {
    fn from(error: BoxError) -> Self {
        let mut err = Self::new("UserCodeError", error.to_string());
        let mut source = error.source();
        while let Some(cause) = source {
            err.stack_trace.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        err
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::new("SerDesError", error.to_string())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(error: std::io::Error) -> Self {
        Self::from_error(error)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new("UserCodeError", message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new("UserCodeError", message)
    }
}
