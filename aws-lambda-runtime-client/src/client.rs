//! Runtime API client.
//!
//! This module defines the [`ControlPlane`] trait and provides
//! [`RuntimeApiClient`], its implementation over the local HTTP Runtime API
//! whose address the host passes in `AWS_LAMBDA_RUNTIME_API`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use crate::config::{LambdaEnvironment, AWS_LAMBDA_RUNTIME_API};
use crate::error::RuntimeError;
use crate::invocation::{InvocationRequest, NextEvent, RegisterRequest};
use crate::report::LambdaError;

/// Header carrying the extension name on registration.
pub const EXTENSION_NAME_HEADER: &str = "Lambda-Extension-Name";
/// Header carrying the extension identifier.
pub const EXTENSION_IDENTIFIER_HEADER: &str = "Lambda-Extension-Identifier";
/// Header carrying the `Runtime.*` error classification.
pub const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";
/// Header carrying the serialized X-Ray error cause.
pub const XRAY_ERROR_CAUSE_HEADER: &str = "Lambda-Runtime-Function-XRay-Error-Cause";

/// Invocation request id header.
pub const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
/// Invocation trace header.
pub const TRACE_ID_HEADER: &str = "lambda-runtime-trace-id";
/// Invocation client context header.
pub const CLIENT_CONTEXT_HEADER: &str = "lambda-runtime-client-context";
/// Invocation Cognito identity header.
pub const COGNITO_IDENTITY_HEADER: &str = "lambda-runtime-cognito-identity";
/// Invocation deadline header.
pub const DEADLINE_MS_HEADER: &str = "lambda-runtime-deadline-ms";
/// Invoked function ARN header.
pub const FUNCTION_ARN_HEADER: &str = "lambda-runtime-invoked-function-arn";

/// User agent sent on every request.
pub const USER_AGENT: &str = concat!("aws-lambda-rust/", env!("CARGO_PKG_VERSION"));

const REGISTER_PATH: &str = "/2020-01-01/extension/register";
const EVENT_NEXT_PATH: &str = "/2020-01-01/extension/event/next";
const INVOCATION_NEXT_PATH: &str = "/2018-06-01/runtime/invocation/next";
const INVOCATION_PATH: &str = "/2018-06-01/runtime/invocation";
const INIT_ERROR_PATH: &str = "/2018-06-01/runtime/init/error";
const RESTORE_NEXT_PATH: &str = "/2018-06-01/runtime/restore/next";
const RESTORE_ERROR_PATH: &str = "/2018-06-01/runtime/restore/error";

/// Trait for communicating with the Lambda control plane.
///
/// This trait abstracts the communication layer, allowing for different
/// implementations (the HTTP Runtime API client, an in-memory mock for tests).
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Registers for `INVOKE` and `SHUTDOWN` events.
    ///
    /// # Returns
    ///
    /// The opaque extension identifier used by [`next_event`](Self::next_event).
    async fn register(&self, extension_name: &str) -> Result<String, RuntimeError>;

    /// Waits for the next lifecycle event.
    async fn next_event(&self, extension_id: &str) -> Result<NextEvent, RuntimeError>;

    /// Waits until an invocation is available and returns it.
    async fn next_invocation(&self) -> Result<InvocationRequest, RuntimeError>;

    /// Posts the response of a successful invocation.
    async fn report_success(&self, request_id: &str, response: Bytes) -> Result<(), RuntimeError>;

    /// Posts the error of a failed invocation.
    async fn report_error(&self, request_id: &str, error: &LambdaError) -> Result<(), RuntimeError>;

    /// Posts an initialization failure.
    async fn report_init_error(&self, error: &LambdaError) -> Result<(), RuntimeError>;

    /// Signals that the runtime is ready to be snapshotted and waits for the
    /// restore.
    async fn restore_next(&self) -> Result<(), RuntimeError>;

    /// Posts an after-restore failure.
    async fn report_restore_error(&self, error: &LambdaError) -> Result<(), RuntimeError>;
}

/// Type alias for a shared ControlPlane.
pub type SharedControlPlane = Arc<dyn ControlPlane>;

/// HTTP client for the Lambda Runtime API.
#[derive(Debug, Clone)]
pub struct RuntimeApiClient {
    /// HTTP client for making requests
    http_client: reqwest::Client,
    /// `http://host:port` of the Runtime API
    base_url: String,
}

impl RuntimeApiClient {
    /// Creates a client for the Runtime API at `host_and_port`.
    pub fn new(host_and_port: &str) -> Result<Self, RuntimeError> {
        let host_and_port = host_and_port.trim();
        if host_and_port.is_empty() {
            return Err(RuntimeError::config(format!("{} is empty", AWS_LAMBDA_RUNTIME_API)));
        }
        let base_url = if host_and_port.starts_with("http://") {
            host_and_port.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host_and_port.trim_end_matches('/'))
        };
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RuntimeError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Creates a client from the function's environment.
    pub fn from_environment(environment: &LambdaEnvironment) -> Result<Self, RuntimeError> {
        let runtime_api = environment
            .runtime_api
            .as_deref()
            .ok_or_else(|| RuntimeError::config(format!("{} is not set", AWS_LAMBDA_RUNTIME_API)))?;
        Self::new(runtime_api)
    }

    /// Returns the base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn invocation_url(&self, request_id: &str, action: &str) -> (String, String) {
        let path = format!(
            "{}/{}/{}",
            INVOCATION_PATH,
            urlencoding::encode(request_id),
            action
        );
        (self.url(&path), path)
    }

    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RuntimeError> {
        request
            .send()
            .await
            .map_err(|e| RuntimeError::transport(endpoint, e.to_string()))
    }

    async fn post_error(&self, url: String, endpoint: &str, error: &LambdaError) -> Result<(), RuntimeError> {
        let body = serde_json::to_vec(&error.error_request).map_err(|e| {
            RuntimeError::serdes(format!("Failed to serialize error report: {}", e))
        })?;

        let mut request = self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(ERROR_TYPE_HEADER, error.error_type.as_header_value())
            .body(body);
        if let Some(cause) = error
            .xray_error_cause
            .as_ref()
            .and_then(|cause| cause.to_header_value())
        {
            request = request.header(XRAY_ERROR_CAUSE_HEADER, cause);
        }

        let response = self.send(endpoint, request).await?;
        expect_status(endpoint, response.status(), StatusCode::ACCEPTED)
    }
}

fn expect_status(endpoint: &str, actual: StatusCode, expected: StatusCode) -> Result<(), RuntimeError> {
    if actual == expected {
        Ok(())
    } else {
        Err(RuntimeError::unexpected_status(endpoint, actual.as_u16()))
    }
}

#[async_trait]
impl ControlPlane for RuntimeApiClient {
    async fn register(&self, extension_name: &str) -> Result<String, RuntimeError> {
        let body = serde_json::to_vec(&RegisterRequest::default())?;
        let request = self
            .http_client
            .post(self.url(REGISTER_PATH))
            .header(EXTENSION_NAME_HEADER, extension_name)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        let response = self
            .send(REGISTER_PATH, request)
            .await
            .map_err(|e| RuntimeError::registration(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RuntimeError::registration(format!(
                "{} returned {}",
                REGISTER_PATH,
                response.status()
            )));
        }

        response
            .headers()
            .get(EXTENSION_IDENTIFIER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                RuntimeError::registration(format!(
                    "response is missing the {} header",
                    EXTENSION_IDENTIFIER_HEADER
                ))
            })
    }

    async fn next_event(&self, extension_id: &str) -> Result<NextEvent, RuntimeError> {
        let request = self
            .http_client
            .get(self.url(EVENT_NEXT_PATH))
            .header(EXTENSION_IDENTIFIER_HEADER, extension_id);
        let response = self.send(EVENT_NEXT_PATH, request).await?;
        if !response.status().is_success() {
            return Err(RuntimeError::unexpected_status(
                EVENT_NEXT_PATH,
                response.status().as_u16(),
            ));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| RuntimeError::transport(EVENT_NEXT_PATH, e.to_string()))?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn next_invocation(&self) -> Result<InvocationRequest, RuntimeError> {
        let request = self.http_client.get(self.url(INVOCATION_NEXT_PATH));
        let response = self.send(INVOCATION_NEXT_PATH, request).await?;
        if !response.status().is_success() {
            return Err(RuntimeError::unexpected_status(
                INVOCATION_NEXT_PATH,
                response.status().as_u16(),
            ));
        }
        let headers = response.headers().clone();
        let payload = response
            .bytes()
            .await
            .map_err(|e| RuntimeError::transport(INVOCATION_NEXT_PATH, e.to_string()))?;
        invocation_from_response(&headers, payload)
    }

    async fn report_success(&self, request_id: &str, response: Bytes) -> Result<(), RuntimeError> {
        let (url, endpoint) = self.invocation_url(request_id, "response");
        let request = self.http_client.post(url).body(response);
        let response = self.send(&endpoint, request).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(RuntimeError::unexpected_status(endpoint, response.status().as_u16()))
        }
    }

    async fn report_error(&self, request_id: &str, error: &LambdaError) -> Result<(), RuntimeError> {
        let (url, endpoint) = self.invocation_url(request_id, "error");
        self.post_error(url, &endpoint, error).await
    }

    async fn report_init_error(&self, error: &LambdaError) -> Result<(), RuntimeError> {
        self.post_error(self.url(INIT_ERROR_PATH), INIT_ERROR_PATH, error)
            .await
    }

    async fn restore_next(&self) -> Result<(), RuntimeError> {
        let request = self.http_client.get(self.url(RESTORE_NEXT_PATH));
        let response = self.send(RESTORE_NEXT_PATH, request).await?;
        expect_status(RESTORE_NEXT_PATH, response.status(), StatusCode::OK)
    }

    async fn report_restore_error(&self, error: &LambdaError) -> Result<(), RuntimeError> {
        self.post_error(self.url(RESTORE_ERROR_PATH), RESTORE_ERROR_PATH, error)
            .await
    }
}

/// Builds an [`InvocationRequest`] from the response to `invocation/next`.
pub fn invocation_from_response(headers: &HeaderMap, payload: Bytes) -> Result<InvocationRequest, RuntimeError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let request_id = header(REQUEST_ID_HEADER).ok_or_else(|| {
        RuntimeError::malformed_invocation(format!("missing {} header", REQUEST_ID_HEADER))
    })?;

    let deadline_ms = match header(DEADLINE_MS_HEADER) {
        Some(raw) => raw.parse().map_err(|_| {
            RuntimeError::malformed_invocation(format!("invalid {} header: {}", DEADLINE_MS_HEADER, raw))
        })?,
        None => 0,
    };

    Ok(InvocationRequest {
        request_id,
        xray_trace_id: header(TRACE_ID_HEADER),
        invoked_function_arn: header(FUNCTION_ARN_HEADER),
        deadline_ms,
        client_context: header(CLIENT_CONTEXT_HEADER),
        cognito_identity: header(COGNITO_IDENTITY_HEADER),
        payload,
    })
}
