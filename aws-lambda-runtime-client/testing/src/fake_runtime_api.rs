//! A local HTTP server emulating the Lambda Runtime API.
//!
//! Used to exercise [`RuntimeApiClient`](aws_lambda_runtime_client::RuntimeApiClient)
//! over real sockets. Every request is recorded; invocations are served from
//! a queue and `SHUTDOWN` is delivered once each served invocation has been
//! answered.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use aws_lambda_runtime_client::client::{
    CLIENT_CONTEXT_HEADER, COGNITO_IDENTITY_HEADER, DEADLINE_MS_HEADER,
    EXTENSION_IDENTIFIER_HEADER, FUNCTION_ARN_HEADER, REQUEST_ID_HEADER, TRACE_ID_HEADER,
};
use aws_lambda_runtime_client::InvocationRequest;

/// A request received by the fake server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl RecordedRequest {
    /// Returns a header value by lower-case name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Status codes the fake answers with.
#[derive(Debug, Clone, Copy)]
pub struct FakeStatuses {
    pub register: StatusCode,
    pub response: StatusCode,
    pub error: StatusCode,
    pub restore_next: StatusCode,
}

impl Default for FakeStatuses {
    fn default() -> Self {
        Self {
            register: StatusCode::OK,
            response: StatusCode::ACCEPTED,
            error: StatusCode::ACCEPTED,
            restore_next: StatusCode::OK,
        }
    }
}

struct FakeState {
    extension_id: String,
    statuses: FakeStatuses,
    omit_extension_id: bool,
    invocations: Mutex<VecDeque<InvocationRequest>>,
    served: Mutex<usize>,
    answered: Mutex<usize>,
    requests: Mutex<Vec<RecordedRequest>>,
    changed: Notify,
}

impl FakeState {
    fn record(&self, method: Method, uri: &Uri, headers: &HeaderMap, body: Bytes) {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        self.requests.lock().push(RecordedRequest {
            method,
            path: uri.path().to_string(),
            headers,
            body,
        });
    }

    fn answer(&self) {
        *self.answered.lock() += 1;
        self.changed.notify_waiters();
    }

    fn is_drained(&self) -> bool {
        let invocations = self.invocations.lock();
        invocations.is_empty() && *self.answered.lock() >= *self.served.lock()
    }
}

/// Builder for [`FakeRuntimeApi`].
#[derive(Default)]
pub struct FakeRuntimeApiBuilder {
    invocations: Vec<InvocationRequest>,
    statuses: FakeStatuses,
    omit_extension_id: bool,
}

impl FakeRuntimeApiBuilder {
    /// Queues an invocation.
    pub fn invocation(mut self, request: InvocationRequest) -> Self {
        self.invocations.push(request);
        self
    }

    /// Overrides the status codes.
    pub fn statuses(mut self, statuses: FakeStatuses) -> Self {
        self.statuses = statuses;
        self
    }

    /// Answers registration without an extension identifier header.
    pub fn omit_extension_id(mut self) -> Self {
        self.omit_extension_id = true;
        self
    }

    /// Binds to an ephemeral localhost port and starts serving.
    pub async fn start(self) -> std::io::Result<FakeRuntimeApi> {
        let state = Arc::new(FakeState {
            extension_id: uuid::Uuid::new_v4().to_string(),
            statuses: self.statuses,
            omit_extension_id: self.omit_extension_id,
            invocations: Mutex::new(self.invocations.into()),
            served: Mutex::new(0),
            answered: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
            changed: Notify::new(),
        });

        let app = Router::new()
            .route("/2020-01-01/extension/register", post(register))
            .route("/2020-01-01/extension/event/next", get(next_event))
            .route("/2018-06-01/runtime/invocation/next", get(next_invocation))
            .route("/2018-06-01/runtime/invocation/{request_id}/response", post(response))
            .route("/2018-06-01/runtime/invocation/{request_id}/error", post(error))
            .route("/2018-06-01/runtime/init/error", post(error))
            .route("/2018-06-01/runtime/restore/next", get(restore_next))
            .route("/2018-06-01/runtime/restore/error", post(error))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, app).await {
                tracing::error!(error = %error, "Fake Runtime API stopped");
            }
        });
        tracing::debug!(addr = %addr, "Fake Runtime API listening");

        Ok(FakeRuntimeApi {
            addr,
            state,
            server,
        })
    }
}

/// A running fake Runtime API. The server stops when this is dropped.
pub struct FakeRuntimeApi {
    addr: SocketAddr,
    state: Arc<FakeState>,
    server: JoinHandle<()>,
}

impl FakeRuntimeApi {
    /// Returns a builder.
    pub fn builder() -> FakeRuntimeApiBuilder {
        FakeRuntimeApiBuilder::default()
    }

    /// Returns the `host:port` to put in `AWS_LAMBDA_RUNTIME_API`.
    pub fn host_and_port(&self) -> String {
        self.addr.to_string()
    }

    /// Returns the identifier handed out on registration.
    pub fn extension_id(&self) -> &str {
        &self.state.extension_id
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Returns the requests received on `path`.
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|request| request.path == path)
            .cloned()
            .collect()
    }
}

impl Drop for FakeRuntimeApi {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn register(
    State(state): State<Arc<FakeState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.record(Method::POST, &uri, &headers, body);
    if state.omit_extension_id {
        return state.statuses.register.into_response();
    }
    (
        state.statuses.register,
        [(EXTENSION_IDENTIFIER_HEADER, state.extension_id.clone())],
    )
        .into_response()
}

async fn next_event(State(state): State<Arc<FakeState>>, uri: Uri, headers: HeaderMap) -> Response {
    state.record(Method::GET, &uri, &headers, Bytes::new());
    loop {
        let changed = state.changed.notified();
        if state.is_drained() {
            break;
        }
        changed.await;
    }
    let body = serde_json::json!({
        "eventType": "SHUTDOWN",
        "shutdownReason": "spindown",
        "deadlineMs": 0,
    });
    (StatusCode::OK, body.to_string()).into_response()
}

async fn next_invocation(
    State(state): State<Arc<FakeState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    state.record(Method::GET, &uri, &headers, Bytes::new());
    let next = {
        let mut invocations = state.invocations.lock();
        let next = invocations.pop_front();
        if next.is_some() {
            *state.served.lock() += 1;
        }
        next
    };
    let Some(request) = next else {
        return std::future::pending().await;
    };

    let mut response_headers = vec![
        (REQUEST_ID_HEADER, request.request_id.clone()),
        (DEADLINE_MS_HEADER, request.deadline_ms.to_string()),
    ];
    let optional = [
        (TRACE_ID_HEADER, &request.xray_trace_id),
        (FUNCTION_ARN_HEADER, &request.invoked_function_arn),
        (CLIENT_CONTEXT_HEADER, &request.client_context),
        (COGNITO_IDENTITY_HEADER, &request.cognito_identity),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            response_headers.push((name, value.clone()));
        }
    }

    let mut response = (StatusCode::OK, request.payload).into_response();
    for (name, value) in response_headers {
        if let Ok(value) = value.parse() {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

async fn response(
    State(state): State<Arc<FakeState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.record(Method::POST, &uri, &headers, body);
    state.answer();
    state.statuses.response
}

async fn error(
    State(state): State<Arc<FakeState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let answers_invocation = uri.path().starts_with("/2018-06-01/runtime/invocation/");
    state.record(Method::POST, &uri, &headers, body);
    if answers_invocation {
        state.answer();
    }
    state.statuses.error
}

async fn restore_next(State(state): State<Arc<FakeState>>, uri: Uri, headers: HeaderMap) -> StatusCode {
    state.record(Method::GET, &uri, &headers, Bytes::new());
    state.statuses.restore_next
}
