//! Per-invocation context handed to the handler.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::LambdaEnvironment;
use crate::invocation::InvocationRequest;

/// Information about the invocation and the function being executed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LambdaContext {
    /// Request id of the invocation
    pub request_id: String,
    /// X-Ray tracing header
    pub xray_trace_id: Option<String>,
    /// ARN the function was invoked with
    pub invoked_function_arn: Option<String>,
    /// Deadline in milliseconds since the Unix epoch
    pub deadline_ms: u64,
    /// Function name
    pub function_name: Option<String>,
    /// Function version
    pub function_version: Option<String>,
    /// Memory limit in MB
    pub memory_limit_mb: u32,
    /// CloudWatch Logs group
    pub log_group_name: Option<String>,
    /// CloudWatch Logs stream
    pub log_stream_name: Option<String>,
    /// Client context sent by a mobile SDK
    pub client_context: Option<ClientContext>,
    /// Cognito identity sent by a mobile SDK
    pub identity: Option<CognitoIdentity>,
}

impl LambdaContext {
    /// Builds the context for `request`.
    ///
    /// Client context and Cognito identity blobs that are not valid JSON are
    /// logged and dropped.
    pub fn new(request: &InvocationRequest, environment: &LambdaEnvironment) -> Self {
        Self {
            request_id: request.request_id.clone(),
            xray_trace_id: request.xray_trace_id.clone(),
            invoked_function_arn: request.invoked_function_arn.clone(),
            deadline_ms: request.deadline_ms,
            function_name: environment.function_name.clone(),
            function_version: environment.function_version.clone(),
            memory_limit_mb: environment.memory_size_mb,
            log_group_name: environment.log_group_name.clone(),
            log_stream_name: environment.log_stream_name.clone(),
            client_context: request
                .client_context
                .as_deref()
                .and_then(|raw| parse_blob(raw, "client context")),
            identity: request
                .cognito_identity
                .as_deref()
                .and_then(|raw| parse_blob(raw, "cognito identity")),
        }
    }

    /// Milliseconds left before the deadline, zero once it has passed.
    pub fn remaining_time_millis(&self) -> u64 {
        self.remaining_time_millis_at(now_millis())
    }

    /// Milliseconds left before the deadline as seen at `now_ms`.
    pub fn remaining_time_millis_at(&self, now_ms: u64) -> u64 {
        self.deadline_ms.saturating_sub(now_ms)
    }

    /// Time left before the deadline.
    pub fn remaining_time(&self) -> Duration {
        Duration::from_millis(self.remaining_time_millis())
    }
}

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn parse_blob<T: for<'de> Deserialize<'de>>(raw: &str, what: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(error = %error, "Ignoring malformed {}", what);
            None
        }
    }
}

/// Client context sent by the AWS Mobile SDK.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    /// Information about the client application
    #[serde(default)]
    pub client: ClientApplication,
    /// Custom values set by the client application
    #[serde(default)]
    pub custom: HashMap<String, String>,
    /// Environment information provided by the Mobile SDK
    #[serde(default, rename = "env")]
    pub environment: HashMap<String, String>,
}

/// Client application information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientApplication {
    /// Installation id of the application
    #[serde(default)]
    pub installation_id: Option<String>,
    /// Application title
    #[serde(default)]
    pub app_title: Option<String>,
    /// Application version name
    #[serde(default)]
    pub app_version_name: Option<String>,
    /// Application version code
    #[serde(default)]
    pub app_version_code: Option<String>,
    /// Application package name
    #[serde(default)]
    pub app_package_name: Option<String>,
}

/// Amazon Cognito identity of the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitoIdentity {
    /// Cognito identity id
    #[serde(default)]
    pub cognito_identity_id: Option<String>,
    /// Cognito identity pool id
    #[serde(default)]
    pub cognito_identity_pool_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_time_before_and_after_deadline() {
        let context = LambdaContext {
            deadline_ms: 10_000,
            ..Default::default()
        };
        assert_eq!(context.remaining_time_millis_at(9_000), 1_000);
        assert_eq!(context.remaining_time_millis_at(10_000), 0);
        assert_eq!(context.remaining_time_millis_at(12_345), 0);
    }

    #[test]
    fn test_remaining_time_against_clock() {
        let context = LambdaContext {
            deadline_ms: now_millis() + 1_000,
            ..Default::default()
        };
        let remaining = context.remaining_time_millis();
        assert!(remaining > 0 && remaining <= 1_000);

        let expired = LambdaContext {
            deadline_ms: now_millis() - 1,
            ..Default::default()
        };
        assert_eq!(expired.remaining_time_millis(), 0);
    }

    #[test]
    fn test_context_from_request() {
        let environment = LambdaEnvironment {
            function_name: Some("orders".to_string()),
            memory_size_mb: 256,
            ..Default::default()
        };
        let request = InvocationRequest::new("req-1", "{}")
            .with_deadline_ms(5)
            .with_client_context(
                r#"{"client":{"installation_id":"inst","app_title":"app"},"custom":{"k":"v"},"env":{"platform":"android"}}"#,
            )
            .with_cognito_identity(r#"{"cognitoIdentityId":"id","cognitoIdentityPoolId":"pool"}"#);

        let context = LambdaContext::new(&request, &environment);
        assert_eq!(context.request_id, "req-1");
        assert_eq!(context.function_name.as_deref(), Some("orders"));
        assert_eq!(context.memory_limit_mb, 256);

        let client_context = context.client_context.unwrap();
        assert_eq!(client_context.client.installation_id.as_deref(), Some("inst"));
        assert_eq!(client_context.custom["k"], "v");
        assert_eq!(client_context.environment["platform"], "android");

        let identity = context.identity.unwrap();
        assert_eq!(identity.cognito_identity_id.as_deref(), Some("id"));
        assert_eq!(identity.cognito_identity_pool_id.as_deref(), Some("pool"));
    }

    #[test]
    fn test_malformed_blobs_are_dropped() {
        let request = InvocationRequest::new("req-1", "")
            .with_client_context("not json")
            .with_cognito_identity("{");
        let context = LambdaContext::new(&request, &LambdaEnvironment::default());
        assert!(context.client_context.is_none());
        assert!(context.identity.is_none());
    }
}
