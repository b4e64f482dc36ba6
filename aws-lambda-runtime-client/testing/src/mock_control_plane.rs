//! In-memory implementation of [`ControlPlane`] for testing.
//!
//! The mock hands out queued invocations, records every call made to it and
//! announces a shutdown once every handed-out invocation has been reported.
//!
//! # Examples
//!
//! ```
//! use aws_lambda_runtime_client_testing::{test_invocation, MockControlPlane};
//!
//! let control_plane = MockControlPlane::new()
//!     .with_invocation(test_invocation("req-1", "{}"))
//!     .with_invocation(test_invocation("req-2", "{}"));
//! assert_eq!(control_plane.pending_invocations(), 2);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use aws_lambda_runtime_client::{
    ControlPlane, InvocationRequest, LambdaError, NextEvent, RuntimeError, ShutdownEvent,
};

/// Extension identifier returned by [`MockControlPlane::register`].
pub const MOCK_EXTENSION_ID: &str = "mock-extension-id";

/// A call made to the mock, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneCall {
    /// Extension registration.
    Register {
        /// Name sent with the registration
        extension_name: String,
    },
    /// Poll for the next extension event.
    NextEvent,
    /// Poll for the next invocation.
    NextInvocation,
    /// Successful invocation response.
    ReportSuccess {
        /// Invocation the response belongs to
        request_id: String,
    },
    /// Invocation error.
    ReportError {
        /// Invocation the error belongs to
        request_id: String,
    },
    /// Init error.
    ReportInitError,
    /// Request for the restored snapshot.
    RestoreNext,
    /// Restore error.
    ReportRestoreError,
}

/// The outcome of one invocation as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationReport {
    /// The handler succeeded.
    Success {
        /// Request id of the invocation
        request_id: String,
        /// Response payload
        response: Bytes,
    },
    /// The handler failed.
    Error {
        /// Request id of the invocation
        request_id: String,
        /// The posted error report
        error: LambdaError,
    },
}

impl InvocationReport {
    /// Returns the request id the report belongs to.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Success { request_id, .. } | Self::Error { request_id, .. } => request_id,
        }
    }

    /// Returns true for a success report.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the error report, if this is one.
    pub fn error(&self) -> Option<&LambdaError> {
        match self {
            Self::Error { error, .. } => Some(error),
            Self::Success { .. } => None,
        }
    }
}

/// Mock implementation of [`ControlPlane`].
///
/// When the invocation queue is empty, `next_invocation` waits forever.
/// `next_event` returns `SHUTDOWN` as soon as every invocation handed out has
/// been reported, unless [`without_shutdown`](Self::without_shutdown) was
/// called.
pub struct MockControlPlane {
    invocations: Mutex<VecDeque<Result<InvocationRequest, RuntimeError>>>,
    handed_out: AtomicUsize,
    reports: Mutex<Vec<InvocationReport>>,
    init_errors: Mutex<Vec<LambdaError>>,
    restore_errors: Mutex<Vec<LambdaError>>,
    calls: Mutex<Vec<ControlPlaneCall>>,
    register_error: Mutex<Option<RuntimeError>>,
    restore_next_error: Mutex<Option<RuntimeError>>,
    failing_reports: AtomicUsize,
    shutdown_reason: Option<String>,
    reported: Notify,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControlPlane {
    /// Creates a mock with no queued invocations.
    pub fn new() -> Self {
        Self {
            invocations: Mutex::new(VecDeque::new()),
            handed_out: AtomicUsize::new(0),
            reports: Mutex::new(Vec::new()),
            init_errors: Mutex::new(Vec::new()),
            restore_errors: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            register_error: Mutex::new(None),
            restore_next_error: Mutex::new(None),
            failing_reports: AtomicUsize::new(0),
            shutdown_reason: Some("spindown".to_string()),
            reported: Notify::new(),
        }
    }

    /// Queues an invocation.
    pub fn with_invocation(self, request: InvocationRequest) -> Self {
        self.invocations.lock().push_back(Ok(request));
        self
    }

    /// Queues several invocations.
    pub fn with_invocations(self, requests: impl IntoIterator<Item = InvocationRequest>) -> Self {
        self.invocations
            .lock()
            .extend(requests.into_iter().map(Ok));
        self
    }

    /// Queues a failure of `next_invocation`.
    pub fn with_next_invocation_error(self, error: RuntimeError) -> Self {
        self.invocations.lock().push_back(Err(error));
        self
    }

    /// Makes `register` fail.
    pub fn with_register_error(self, error: RuntimeError) -> Self {
        *self.register_error.lock() = Some(error);
        self
    }

    /// Makes `restore_next` fail.
    pub fn with_restore_next_error(self, error: RuntimeError) -> Self {
        *self.restore_next_error.lock() = Some(error);
        self
    }

    /// Makes the next `count` invocation reports fail after being recorded.
    pub fn with_failing_reports(self, count: usize) -> Self {
        self.failing_reports.store(count, Ordering::SeqCst);
        self
    }

    /// Sets the reason carried by the `SHUTDOWN` event.
    pub fn with_shutdown_reason(mut self, reason: impl Into<String>) -> Self {
        self.shutdown_reason = Some(reason.into());
        self
    }

    /// Never announces a shutdown.
    pub fn without_shutdown(mut self) -> Self {
        self.shutdown_reason = None;
        self
    }

    /// Returns the number of invocations not yet handed out.
    pub fn pending_invocations(&self) -> usize {
        self.invocations.lock().len()
    }

    /// Returns the invocation reports in the order they were posted.
    pub fn reports(&self) -> Vec<InvocationReport> {
        self.reports.lock().clone()
    }

    /// Returns the reports posted for `request_id`.
    pub fn reports_for(&self, request_id: &str) -> Vec<InvocationReport> {
        self.reports
            .lock()
            .iter()
            .filter(|report| report.request_id() == request_id)
            .cloned()
            .collect()
    }

    /// Returns the posted init errors.
    pub fn init_errors(&self) -> Vec<LambdaError> {
        self.init_errors.lock().clone()
    }

    /// Returns the posted restore errors.
    pub fn restore_errors(&self) -> Vec<LambdaError> {
        self.restore_errors.lock().clone()
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.calls.lock().clone()
    }

    /// Waits until `count` invocation reports have been posted.
    pub async fn wait_for_reports(&self, count: usize) {
        loop {
            let notified = self.reported.notified();
            if self.reports.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }

    fn record(&self, call: ControlPlaneCall) {
        self.calls.lock().push(call);
    }

    fn record_report(&self, report: InvocationReport) -> Result<(), RuntimeError> {
        self.reports.lock().push(report);
        self.reported.notify_waiters();
        let failing = self
            .failing_reports
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match failing {
            Ok(_) => Err(RuntimeError::unexpected_status("/mock/report", 500)),
            Err(_) => Ok(()),
        }
    }

    fn is_drained(&self) -> bool {
        let invocations = self.invocations.lock();
        invocations.is_empty() && self.reports.lock().len() >= self.handed_out.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn register(&self, extension_name: &str) -> Result<String, RuntimeError> {
        self.record(ControlPlaneCall::Register {
            extension_name: extension_name.to_string(),
        });
        match self.register_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(MOCK_EXTENSION_ID.to_string()),
        }
    }

    async fn next_event(&self, _extension_id: &str) -> Result<NextEvent, RuntimeError> {
        self.record(ControlPlaneCall::NextEvent);
        let Some(reason) = self.shutdown_reason.clone() else {
            return std::future::pending().await;
        };
        loop {
            let notified = self.reported.notified();
            if self.is_drained() {
                return Ok(NextEvent::Shutdown(ShutdownEvent::new(reason, 0)));
            }
            notified.await;
        }
    }

    async fn next_invocation(&self) -> Result<InvocationRequest, RuntimeError> {
        self.record(ControlPlaneCall::NextInvocation);
        let next = {
            let mut invocations = self.invocations.lock();
            let next = invocations.pop_front();
            if matches!(next, Some(Ok(_))) {
                self.handed_out.fetch_add(1, Ordering::SeqCst);
            }
            next
        };
        match next {
            Some(Ok(request)) => Ok(request),
            Some(Err(error)) => Err(error),
            None => std::future::pending().await,
        }
    }

    async fn report_success(&self, request_id: &str, response: Bytes) -> Result<(), RuntimeError> {
        self.record(ControlPlaneCall::ReportSuccess {
            request_id: request_id.to_string(),
        });
        self.record_report(InvocationReport::Success {
            request_id: request_id.to_string(),
            response,
        })
    }

    async fn report_error(&self, request_id: &str, error: &LambdaError) -> Result<(), RuntimeError> {
        self.record(ControlPlaneCall::ReportError {
            request_id: request_id.to_string(),
        });
        self.record_report(InvocationReport::Error {
            request_id: request_id.to_string(),
            error: error.clone(),
        })
    }

    async fn report_init_error(&self, error: &LambdaError) -> Result<(), RuntimeError> {
        self.record(ControlPlaneCall::ReportInitError);
        self.init_errors.lock().push(error.clone());
        Ok(())
    }

    async fn restore_next(&self) -> Result<(), RuntimeError> {
        self.record(ControlPlaneCall::RestoreNext);
        match self.restore_next_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn report_restore_error(&self, error: &LambdaError) -> Result<(), RuntimeError> {
        self.record(ControlPlaneCall::ReportRestoreError);
        self.restore_errors.lock().push(error.clone());
        Ok(())
    }
}
