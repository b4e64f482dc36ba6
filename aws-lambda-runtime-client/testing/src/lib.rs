//! Testing utilities for the AWS Lambda runtime interface client.
//!
//! # Features
//!
//! - **MockControlPlane**: In-memory control plane that records every call
//! - **FakeRuntimeApi**: Local HTTP server speaking the Runtime API protocol
//! - **CapturingLogSink**: Log sink that keeps every line in memory
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use aws_lambda_runtime_client::{handler_fn, HandlerError, LambdaContext, Runtime};
//! use aws_lambda_runtime_client_testing::{test_invocation, MockControlPlane};
//!
//! #[tokio::test]
//! async fn test_echo() {
//!     let control_plane = Arc::new(MockControlPlane::new().with_invocation(test_invocation("1", "hi")));
//!     Runtime::builder()
//!         .control_plane(control_plane.clone())
//!         .handler(handler_fn(|payload, _ctx: LambdaContext| async move { Ok::<_, HandlerError>(payload) }))
//!         .build()
//!         .unwrap()
//!         .run()
//!         .await
//!         .unwrap();
//!     assert!(control_plane.reports()[0].is_success());
//! }
//! ```

pub mod fake_runtime_api;
pub mod mock_control_plane;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use aws_lambda_runtime_client::logging::{LambdaLogger, LogFormat, LogLevel, LogSink};
use aws_lambda_runtime_client::InvocationRequest;

pub use fake_runtime_api::{FakeRuntimeApi, FakeRuntimeApiBuilder, FakeStatuses, RecordedRequest};
pub use mock_control_plane::{
    ControlPlaneCall, InvocationReport, MockControlPlane, MOCK_EXTENSION_ID,
};

/// Creates an invocation with a deadline one minute from now.
pub fn test_invocation(request_id: &str, payload: impl Into<Bytes>) -> InvocationRequest {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    InvocationRequest::new(request_id, payload)
        .with_deadline_ms(now_ms + 60_000)
        .with_invoked_function_arn("arn:aws:lambda:us-east-1:123456789012:function:test")
}

/// A line written to a [`CapturingLogSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLine {
    pub level: LogLevel,
    pub format: LogFormat,
    pub message: String,
}

/// Log sink that keeps every line in memory.
#[derive(Debug, Default)]
pub struct CapturingLogSink {
    lines: Mutex<Vec<CapturedLine>>,
}

impl CapturingLogSink {
    /// Creates an empty sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the captured lines.
    pub fn lines(&self) -> Vec<CapturedLine> {
        self.lines.lock().clone()
    }

    /// Returns true if any captured line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|line| line.message.contains(needle))
    }
}

impl LogSink for CapturingLogSink {
    fn log(&self, level: LogLevel, format: LogFormat, message: &[u8]) {
        self.lines.lock().push(CapturedLine {
            level,
            format,
            message: String::from_utf8_lossy(message).into_owned(),
        });
    }
}

/// Creates a logger writing to a fresh [`CapturingLogSink`].
pub fn capturing_logger(format: LogFormat) -> (LambdaLogger, Arc<CapturingLogSink>) {
    let sink = CapturingLogSink::new();
    let logger = LambdaLogger::new(sink.clone(), LogLevel::Undefined, format);
    (logger, sink)
}
