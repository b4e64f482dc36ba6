//! The invocation poll loop.
//!
//! A [`Runtime`] registers with the control plane, optionally runs the
//! SnapStart checkpoint/restore hooks, then fetches invocations, hands them
//! to the user [`Handler`] and reports the outcome until the control plane
//! announces a shutdown.
//!
//! ```text
//! Uninitialized -> Registered -> Polling <-> Dispatching -> ShuttingDown
//! ```
//!
//! With multi-concurrency enabled, a fixed pool of workers each run their own
//! poll/dispatch/report cycle against the same control plane.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::client::{ControlPlane, RuntimeApiClient, SharedControlPlane};
use crate::config::{ConcurrencyConfig, LambdaEnvironment, X_AMZN_TRACE_ID};
use crate::context::LambdaContext;
use crate::crac::{self, CheckpointError, ResourceRegistry};
use crate::error::{BoxError, HandlerError, RuntimeError};
use crate::handler::{Handler, SharedHandler};
use crate::invocation::{InvocationRequest, NextEvent, ShutdownEvent};
use crate::logging::{self, with_request_id, LambdaLogger, LogLevel};
use crate::report::{LambdaError, RapidErrorType};

/// Name the runtime registers under.
pub const DEFAULT_EXTENSION_NAME: &str = "aws-lambda-rust-runtime-interface-client";

/// Lifecycle state of the runtime, reported in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Not registered yet.
    Uninitialized,
    /// Registered with the control plane.
    Registered,
    /// Waiting for the next invocation.
    Polling,
    /// Running the handler.
    Dispatching,
    /// A shutdown event was received.
    ShuttingDown,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Registered => "registered",
            Self::Polling => "polling",
            Self::Dispatching => "dispatching",
            Self::ShuttingDown => "shutting-down",
        };
        f.write_str(name)
    }
}

type ShutdownHook = Box<dyn FnOnce(&ShutdownEvent) + Send>;

/// Builder for [`Runtime`].
///
/// Everything except the handler has a default taken from the process
/// environment.
#[derive(Default)]
pub struct RuntimeBuilder {
    control_plane: Option<SharedControlPlane>,
    handler: Option<SharedHandler>,
    environment: Option<LambdaEnvironment>,
    concurrency: Option<ConcurrencyConfig>,
    registry: Option<Arc<ResourceRegistry>>,
    logger: Option<LambdaLogger>,
    extension_name: Option<String>,
    shutdown_hooks: Vec<ShutdownHook>,
}

impl RuntimeBuilder {
    /// Sets the control plane. Defaults to the Runtime API named by
    /// `AWS_LAMBDA_RUNTIME_API`.
    pub fn control_plane(mut self, control_plane: SharedControlPlane) -> Self {
        self.control_plane = Some(control_plane);
        self
    }

    /// Sets the handler.
    pub fn handler<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Sets an already shared handler.
    pub fn shared_handler(mut self, handler: SharedHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Sets the function environment.
    pub fn environment(mut self, environment: LambdaEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Sets the concurrency configuration.
    pub fn concurrency(mut self, concurrency: ConcurrencyConfig) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Sets the registry notified around SnapStart checkpoints. Defaults to
    /// the process-wide registry.
    pub fn registry(mut self, registry: Arc<ResourceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the logger used for handler error reports.
    pub fn logger(mut self, logger: LambdaLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Sets the name the runtime registers under.
    pub fn extension_name(mut self, name: impl Into<String>) -> Self {
        self.extension_name = Some(name.into());
        self
    }

    /// Adds a hook run once when the control plane announces a shutdown.
    pub fn on_shutdown<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&ShutdownEvent) + Send + 'static,
    {
        self.shutdown_hooks.push(Box::new(hook));
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let handler = self
            .handler
            .ok_or_else(|| RuntimeError::config("no handler configured"))?;
        let environment = self.environment.unwrap_or_else(|| {
            let environment = LambdaEnvironment::from_env();
            environment.log_warnings();
            environment
        });
        let control_plane = match self.control_plane {
            Some(control_plane) => control_plane,
            None => Arc::new(RuntimeApiClient::from_environment(&environment)?),
        };
        let concurrency = self.concurrency.unwrap_or_else(ConcurrencyConfig::from_env);
        let logger = self
            .logger
            .unwrap_or_else(|| LambdaLogger::from_environment(&environment));

        Ok(Runtime {
            control_plane,
            handler,
            environment,
            concurrency,
            registry: self.registry.unwrap_or_else(crac::global_context),
            logger,
            extension_name: self
                .extension_name
                .unwrap_or_else(|| DEFAULT_EXTENSION_NAME.to_string()),
            shutdown_hooks: self.shutdown_hooks,
        })
    }
}

/// The runtime interface client.
pub struct Runtime {
    control_plane: SharedControlPlane,
    handler: SharedHandler,
    environment: LambdaEnvironment,
    concurrency: ConcurrencyConfig,
    registry: Arc<ResourceRegistry>,
    logger: LambdaLogger,
    extension_name: String,
    shutdown_hooks: Vec<ShutdownHook>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("environment", &self.environment)
            .field("concurrency", &self.concurrency)
            .field("extension_name", &self.extension_name)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Returns a builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Runs until the control plane announces a shutdown.
    ///
    /// Returns an error if registration fails, if a SnapStart hook fails, if
    /// a handler fails fatally, or if fetching the next invocation fails with
    /// no worker left to poll.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let Runtime {
            control_plane,
            handler,
            environment,
            concurrency,
            registry,
            logger,
            extension_name,
            shutdown_hooks,
        } = self;
        tracing::debug!(state = %RuntimeState::Uninitialized, "Starting runtime");

        let extension_id = control_plane
            .register(&extension_name)
            .await
            .map_err(|e| match e {
                RuntimeError::Registration { .. } => e,
                other => RuntimeError::registration(other.to_string()),
            })?;
        tracing::debug!(state = %RuntimeState::Registered, "Registered with the control plane");

        if environment.is_snap_start() {
            let snap_start = SnapStart {
                control_plane: control_plane.as_ref(),
                registry: &registry,
                logger: &logger,
            };
            if let Err(error) = snap_start.on_init_complete().await {
                logger.flush();
                return Err(error);
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(None);
        let watcher = tokio::spawn(watch_events(
            control_plane.clone(),
            extension_id,
            shutdown_tx,
        ));

        let worker = Arc::new(Worker {
            control_plane,
            handler,
            environment,
            logger: logger.clone(),
            export_trace_id: !concurrency.is_multi_concurrent(),
        });

        let outcome = if concurrency.worker_threads() <= 1 {
            worker.run(0, shutdown_rx).await
        } else {
            logger.log(&concurrency.message(), logger.report_level(LogLevel::Info));
            run_pool(worker, concurrency.worker_threads(), shutdown_rx).await
        };
        watcher.abort();

        let result = match outcome {
            Ok(event) => {
                tracing::info!(
                    state = %RuntimeState::ShuttingDown,
                    reason = %event.shutdown_reason,
                    "Shutting down"
                );
                for hook in shutdown_hooks {
                    hook(&event);
                }
                Ok(())
            }
            Err(error) => Err(error),
        };
        logger.flush();
        result
    }
}

/// Forwards the first `SHUTDOWN` event to the workers.
async fn watch_events(
    control_plane: SharedControlPlane,
    extension_id: String,
    shutdown_tx: watch::Sender<Option<ShutdownEvent>>,
) {
    loop {
        match control_plane.next_event(&extension_id).await {
            Ok(NextEvent::Shutdown(event)) => {
                let _ = shutdown_tx.send(Some(event));
                return;
            }
            Ok(NextEvent::Invoke(_)) => continue,
            Err(error) => {
                tracing::warn!(error = %error, "Stopped watching lifecycle events");
                // Keep the sender alive so workers keep polling.
                std::future::pending::<()>().await;
            }
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<Option<ShutdownEvent>>) -> ShutdownEvent {
    loop {
        let current = shutdown.borrow_and_update().clone();
        if let Some(event) = current {
            return event;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn run_pool(
    worker: Arc<Worker>,
    workers: usize,
    shutdown: watch::Receiver<Option<ShutdownEvent>>,
) -> Result<ShutdownEvent, RuntimeError> {
    let mut set = JoinSet::new();
    for index in 0..workers {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        set.spawn(async move { worker.run(index, shutdown).await });
    }

    let mut shutdown_event = None;
    let mut last_error = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(event)) => shutdown_event = Some(event),
            Ok(Err(error)) if error.is_fatal() => {
                set.shutdown().await;
                return Err(error);
            }
            Ok(Err(error)) => {
                tracing::error!(error = %error, "Runtime worker failed");
                last_error = Some(error);
            }
            Err(join_error) => {
                tracing::error!(error = %join_error, "Runtime worker aborted");
                last_error = Some(RuntimeError::worker(join_error.to_string()));
            }
        }
    }

    match (shutdown_event, last_error) {
        (Some(event), _) => Ok(event),
        (None, Some(error)) => Err(error),
        (None, None) => Err(RuntimeError::worker("no runtime worker was started")),
    }
}

/// One poll/dispatch/report cycle, shared by all workers.
struct Worker {
    control_plane: SharedControlPlane,
    handler: SharedHandler,
    environment: LambdaEnvironment,
    logger: LambdaLogger,
    export_trace_id: bool,
}

impl Worker {
    async fn run(
        &self,
        index: usize,
        mut shutdown: watch::Receiver<Option<ShutdownEvent>>,
    ) -> Result<ShutdownEvent, RuntimeError> {
        loop {
            tracing::trace!(worker = index, state = %RuntimeState::Polling, "Waiting for invocation");
            let request = tokio::select! {
                biased;
                event = wait_for_shutdown(&mut shutdown) => return Ok(event),
                next = self.control_plane.next_invocation() => next?,
            };
            let request_id = request.request_id.clone();
            with_request_id(request_id, self.dispatch(index, request)).await?;
        }
    }

    /// Runs the handler and reports the outcome. Only a fatal handler error
    /// is returned.
    async fn dispatch(&self, index: usize, request: InvocationRequest) -> Result<(), RuntimeError> {
        tracing::trace!(
            worker = index,
            state = %RuntimeState::Dispatching,
            request_id = %request.request_id,
            "Dispatching invocation"
        );
        // Single worker only. Mutating the environment is sound only while no
        // other thread reads it; the runtime reads it before workers start,
        // so handlers must not touch the environment from spawned threads.
        if self.export_trace_id {
            match &request.xray_trace_id {
                Some(trace_id) => std::env::set_var(X_AMZN_TRACE_ID, trace_id),
                None => std::env::remove_var(X_AMZN_TRACE_ID),
            }
        }

        let context = LambdaContext::new(&request, &self.environment);
        let request_id = request.request_id;
        let call = self.handler.call(request.payload, context);
        let outcome = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::from_panic(panic.as_ref())),
        };

        match outcome {
            Ok(response) => {
                if let Err(error) = self.control_plane.report_success(&request_id, response).await {
                    tracing::warn!(error = %error, "Failed to report invocation response");
                }
                Ok(())
            }
            Err(handler_error) => {
                self.logger.log(
                    &handler_error.reportable(),
                    self.logger.report_level(LogLevel::Error),
                );
                let report = LambdaError::from_handler_error(&handler_error);
                if let Err(error) = self.control_plane.report_error(&request_id, &report).await {
                    tracing::warn!(error = %error, "Failed to report invocation error");
                }
                if handler_error.is_fatal() {
                    return Err(RuntimeError::FatalHandler {
                        error_type: handler_error.error_type().to_string(),
                        message: handler_error.message().to_string(),
                    });
                }
                Ok(())
            }
        }
    }
}

/// SnapStart lifecycle run once after registration.
struct SnapStart<'a> {
    control_plane: &'a dyn ControlPlane,
    registry: &'a ResourceRegistry,
    logger: &'a LambdaLogger,
}

impl SnapStart<'_> {
    async fn on_init_complete(&self) -> Result<(), RuntimeError> {
        tracing::debug!("Running before-checkpoint hooks");
        let checkpoint = match self.registry.notify_before_checkpoint() {
            Ok(()) => self.control_plane.restore_next().await,
            Err(error) => Err(RuntimeError::BeforeCheckpoint(error)),
        };
        if let Err(error) = checkpoint {
            self.log_failure(&error);
            let report = match &error {
                RuntimeError::BeforeCheckpoint(inner) => LambdaError::before_checkpoint(inner),
                other => LambdaError::from_error(other, RapidErrorType::BeforeCheckpointError),
            };
            if let Err(report_error) = self.control_plane.report_init_error(&report).await {
                tracing::warn!(error = %report_error, "Failed to report before-checkpoint failure");
            }
            return Err(match error {
                checkpoint @ RuntimeError::BeforeCheckpoint(_) => checkpoint,
                other => RuntimeError::BeforeCheckpoint(CheckpointError::new(vec![
                    Box::new(other) as BoxError,
                ])),
            });
        }

        tracing::debug!("Running after-restore hooks");
        if let Err(error) = self.registry.notify_after_restore() {
            let error = RuntimeError::AfterRestore(error);
            self.log_failure(&error);
            if let RuntimeError::AfterRestore(inner) = &error {
                let report = LambdaError::after_restore(inner);
                if let Err(report_error) = self.control_plane.report_restore_error(&report).await {
                    tracing::warn!(error = %report_error, "Failed to report after-restore failure");
                }
            }
            return Err(error);
        }
        Ok(())
    }

    fn log_failure(&self, error: &RuntimeError) {
        let mut message = error.to_string();
        let causes: &[BoxError] = match error {
            RuntimeError::BeforeCheckpoint(inner) => inner.suppressed(),
            RuntimeError::AfterRestore(inner) => inner.suppressed(),
            _ => &[],
        };
        for cause in causes {
            message.push_str("\n  ");
            message.push_str(&cause.to_string());
        }
        message.push('\n');
        self.logger
            .log(&message, self.logger.report_level(LogLevel::Error));
    }
}

/// Runs `handler` against the Runtime API configured in the environment.
///
/// Installs the function log subscriber if none is installed yet.
///
/// # Examples
///
/// ```no_run
/// use aws_lambda_runtime_client::{handler_fn, HandlerError, LambdaContext};
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() {
///     let handler = handler_fn(|payload: Bytes, _ctx: LambdaContext| async move {
///         Ok::<_, HandlerError>(payload)
///     });
///     if let Err(error) = aws_lambda_runtime_client::run(handler).await {
///         std::process::exit(error.exit_code());
///     }
/// }
/// ```
pub async fn run<H>(handler: H) -> Result<(), RuntimeError>
where
    H: Handler + 'static,
{
    run_with_init(|| async move { Ok::<_, BoxError>(handler) }).await
}

/// Like [`run`], with an async initializer building the handler.
///
/// An initializer failure is reported to the control plane as
/// `Runtime.BadFunctionCode` and returned.
pub async fn run_with_init<F, Fut, H, E>(init: F) -> Result<(), RuntimeError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<H, E>>,
    H: Handler + 'static,
    E: Into<BoxError>,
{
    let environment = LambdaEnvironment::from_env();
    let logger = LambdaLogger::from_environment(&environment);
    if let Err(error) = logging::init(logger.clone()) {
        tracing::debug!(error = %error, "Keeping the existing log subscriber");
    }
    environment.log_warnings();
    let control_plane: SharedControlPlane =
        Arc::new(RuntimeApiClient::from_environment(&environment)?);

    let handler = match init().await {
        Ok(handler) => handler,
        Err(error) => {
            let error: BoxError = error.into();
            logger.log(
                &format!("{}\n", error),
                logger.report_level(LogLevel::Error),
            );
            let report = LambdaError::init_failure(&*error);
            if let Err(report_error) = control_plane.report_init_error(&report).await {
                tracing::warn!(error = %report_error, "Failed to report init error");
            }
            logger.flush();
            return Err(RuntimeError::init(error.to_string()));
        }
    };

    Runtime::builder()
        .control_plane(control_plane)
        .handler(handler)
        .concurrency(ConcurrencyConfig::from_env())
        .logger(logger)
        .environment(environment)
        .build()?
        .run()
        .await
}
