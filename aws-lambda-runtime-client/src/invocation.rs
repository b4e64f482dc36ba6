//! Invocation and control-plane event types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One unit of work fetched from the Runtime API.
///
/// A request is created for each poll and consumed by exactly one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    /// Identifier of the invocation, used to report its outcome
    pub request_id: String,
    /// X-Ray tracing header
    pub xray_trace_id: Option<String>,
    /// ARN the function was invoked with
    pub invoked_function_arn: Option<String>,
    /// Deadline in milliseconds since the Unix epoch
    pub deadline_ms: u64,
    /// Raw client context blob sent by mobile SDKs
    pub client_context: Option<String>,
    /// Raw Cognito identity blob sent by mobile SDKs
    pub cognito_identity: Option<String>,
    /// Event payload
    pub payload: Bytes,
}

impl InvocationRequest {
    /// Creates a request with the given id and payload.
    pub fn new(request_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            request_id: request_id.into(),
            xray_trace_id: None,
            invoked_function_arn: None,
            deadline_ms: 0,
            client_context: None,
            cognito_identity: None,
            payload: payload.into(),
        }
    }

    /// Sets the deadline.
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }

    /// Sets the X-Ray trace header.
    pub fn with_xray_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.xray_trace_id = Some(trace_id.into());
        self
    }

    /// Sets the invoked function ARN.
    pub fn with_invoked_function_arn(mut self, arn: impl Into<String>) -> Self {
        self.invoked_function_arn = Some(arn.into());
        self
    }

    /// Sets the raw client context blob.
    pub fn with_client_context(mut self, client_context: impl Into<String>) -> Self {
        self.client_context = Some(client_context.into());
        self
    }

    /// Sets the raw Cognito identity blob.
    pub fn with_cognito_identity(mut self, cognito_identity: impl Into<String>) -> Self {
        self.cognito_identity = Some(cognito_identity.into());
        self
    }
}

/// An event delivered on the extension event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NextEvent {
    /// An invocation has started.
    Invoke(InvokeEvent),
    /// The execution environment is shutting down.
    Shutdown(ShutdownEvent),
}

impl NextEvent {
    /// Returns true for a shutdown event.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }
}

/// Details of an `INVOKE` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeEvent {
    /// Request id of the invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ARN the function was invoked with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoked_function_arn: Option<String>,
    /// Deadline in milliseconds since the Unix epoch
    #[serde(default)]
    pub deadline_ms: u64,
}

/// Details of a `SHUTDOWN` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownEvent {
    /// Why the environment is shutting down, e.g. `spindown` or `timeout`
    #[serde(default)]
    pub shutdown_reason: String,
    /// Time by which shutdown must complete, milliseconds since the Unix epoch
    #[serde(default)]
    pub deadline_ms: u64,
}

impl ShutdownEvent {
    /// Creates a shutdown event.
    pub fn new(reason: impl Into<String>, deadline_ms: u64) -> Self {
        Self {
            shutdown_reason: reason.into(),
            deadline_ms,
        }
    }
}

/// Body of the extension registration request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct RegisterRequest {
    pub(crate) events: &'static [&'static str],
}

impl Default for RegisterRequest {
    fn default() -> Self {
        Self {
            events: &["INVOKE", "SHUTDOWN"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let request = InvocationRequest::new("id-1", "{}")
            .with_deadline_ms(1_700_000_000_000)
            .with_xray_trace_id("Root=1-abc")
            .with_invoked_function_arn("arn:aws:lambda:us-east-1:123456789012:function:f");
        assert_eq!(request.request_id, "id-1");
        assert_eq!(request.payload, Bytes::from_static(b"{}"));
        assert_eq!(request.deadline_ms, 1_700_000_000_000);
        assert_eq!(request.xray_trace_id.as_deref(), Some("Root=1-abc"));
        assert!(request.client_context.is_none());
    }

    #[test]
    fn test_shutdown_event_deserialization() {
        let json = r#"{"eventType":"SHUTDOWN","shutdownReason":"spindown","deadlineMs":1700000000000}"#;
        let event: NextEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            NextEvent::Shutdown(ShutdownEvent::new("spindown", 1_700_000_000_000))
        );
        assert!(event.is_shutdown());
    }

    #[test]
    fn test_invoke_event_deserialization() {
        let json = r#"{
            "eventType": "INVOKE",
            "deadlineMs": 42,
            "requestId": "req-1",
            "invokedFunctionArn": "arn",
            "tracing": {"type": "X-Amzn-Trace-Id", "value": "Root=1"}
        }"#;
        let event: NextEvent = serde_json::from_str(json).unwrap();
        match event {
            NextEvent::Invoke(invoke) => {
                assert_eq!(invoke.request_id.as_deref(), Some("req-1"));
                assert_eq!(invoke.deadline_ms, 42);
            }
            other => panic!("expected invoke, got {:?}", other),
        }
    }

    #[test]
    fn test_register_request_serialization() {
        let json = serde_json::to_string(&RegisterRequest::default()).unwrap();
        assert_eq!(json, r#"{"events":["INVOKE","SHUTDOWN"]}"#);
    }
}
