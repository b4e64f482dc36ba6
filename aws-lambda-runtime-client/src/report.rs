//! Error reports posted to the Runtime API.

use serde::{Deserialize, Serialize};

use crate::crac::{CheckpointError, RestoreError};
use crate::error::HandlerError;

/// Serialized X-Ray causes at or above this size are not sent as a header.
pub const XRAY_ERROR_CAUSE_MAX_HEADER_SIZE: usize = 1024 * 1024;

/// Classification of a reported error, sent in the
/// `Lambda-Runtime-Function-Error-Type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RapidErrorType {
    /// The function could not be initialized.
    BadFunctionCode,
    /// The handler failed.
    UserException,
    /// A before-checkpoint hook failed.
    BeforeCheckpointError,
    /// An after-restore hook failed.
    AfterRestoreError,
}

impl RapidErrorType {
    /// Returns the header value, e.g. `Runtime.UserException`.
    pub fn as_header_value(&self) -> &'static str {
        match self {
            Self::BadFunctionCode => "Runtime.BadFunctionCode",
            Self::UserException => "Runtime.UserException",
            Self::BeforeCheckpointError => "Runtime.BeforeCheckpointError",
            Self::AfterRestoreError => "Runtime.AfterRestoreError",
        }
    }
}

/// JSON body of an error report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRequest {
    /// The error message
    pub error_message: String,
    /// The error type
    pub error_type: String,
    /// Stack trace lines, omitted when unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Vec<String>>,
}

impl ErrorRequest {
    /// Creates a body without a stack trace.
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            error_type: error_type.into(),
            stack_trace: None,
        }
    }
}

/// X-Ray description of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XRayErrorCause {
    /// Working directory of the runtime process
    pub working_directory: String,
    /// The reported exceptions, outermost first
    pub exceptions: Vec<XRayException>,
    /// Source paths referenced by the stack frames
    pub paths: Vec<String>,
}

/// One exception of an [`XRayErrorCause`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XRayException {
    /// Error message
    pub message: String,
    /// Error type name
    #[serde(rename = "type")]
    pub error_type: String,
    /// Stack frames, innermost first
    pub stack: Vec<StackElement>,
}

/// One stack frame of an [`XRayException`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackElement {
    /// Function or method name
    pub label: String,
    /// Source file
    pub path: String,
    /// Line within `path`
    pub line: u32,
}

impl XRayErrorCause {
    /// Describes a handler error.
    pub fn from_handler_error(error: &HandlerError) -> Self {
        let working_directory = std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        Self {
            working_directory,
            exceptions: vec![XRayException {
                message: error.message().to_string(),
                error_type: error.error_type().to_string(),
                stack: Vec::new(),
            }],
            paths: Vec::new(),
        }
    }

    /// Serializes the cause for the `Lambda-Runtime-Function-XRay-Error-Cause`
    /// header, or `None` if it is too large.
    pub fn to_header_value(&self) -> Option<String> {
        serde_json::to_string(self)
            .ok()
            .filter(|json| json.len() < XRAY_ERROR_CAUSE_MAX_HEADER_SIZE)
    }
}

/// A complete error report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaError {
    /// Body of the report
    pub error_request: ErrorRequest,
    /// Optional X-Ray cause
    pub xray_error_cause: Option<XRayErrorCause>,
    /// Classification of the error
    pub error_type: RapidErrorType,
}

impl LambdaError {
    /// Creates a report.
    pub fn new(error_request: ErrorRequest, error_type: RapidErrorType) -> Self {
        Self {
            error_request,
            xray_error_cause: None,
            error_type,
        }
    }

    /// Reports a failed invocation.
    pub fn from_handler_error(error: &HandlerError) -> Self {
        let stack_trace = if error.stack_trace().is_empty() {
            None
        } else {
            Some(error.stack_trace().to_vec())
        };
        Self {
            error_request: ErrorRequest {
                error_message: error.message().to_string(),
                error_type: error.error_type().to_string(),
                stack_trace,
            },
            xray_error_cause: Some(XRayErrorCause::from_handler_error(error)),
            error_type: RapidErrorType::UserException,
        }
    }

    /// Reports a failure to initialize the function.
    pub fn init_failure(error: &(dyn std::error::Error + 'static)) -> Self {
        Self::from_error(error, RapidErrorType::BadFunctionCode)
    }

    /// Reports any error under the given classification. The `source()`
    /// chain becomes the stack trace.
    pub fn from_error(error: &(dyn std::error::Error + 'static), error_type: RapidErrorType) -> Self {
        Self::new(error_request_from(error, Vec::new()), error_type)
    }

    /// Reports failed before-checkpoint hooks.
    pub fn before_checkpoint(error: &CheckpointError) -> Self {
        let causes = error.suppressed().iter().map(|e| e.to_string()).collect();
        Self::new(
            error_request_from(error, causes),
            RapidErrorType::BeforeCheckpointError,
        )
    }

    /// Reports failed after-restore hooks.
    pub fn after_restore(error: &RestoreError) -> Self {
        let causes = error.suppressed().iter().map(|e| e.to_string()).collect();
        Self::new(
            error_request_from(error, causes),
            RapidErrorType::AfterRestoreError,
        )
    }
}

fn error_request_from(error: &(dyn std::error::Error + 'static), causes: Vec<String>) -> ErrorRequest {
    let mut stack_trace = causes;
    let mut source = error.source();
    while let Some(cause) = source {
        stack_trace.push(cause.to_string());
        source = cause.source();
    }
    ErrorRequest {
        error_message: error.to_string(),
        error_type: error_type_name(error),
        stack_trace: if stack_trace.is_empty() {
            None
        } else {
            Some(stack_trace)
        },
    }
}

fn error_type_name(error: &(dyn std::error::Error + 'static)) -> String {
    if error.is::<CheckpointError>() {
        "CheckpointError".to_string()
    } else if error.is::<RestoreError>() {
        "RestoreError".to_string()
    } else {
        "Error".to_string()
    }
}
