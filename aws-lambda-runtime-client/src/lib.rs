//! # AWS Lambda Runtime Interface Client
//!
//! The in-process component that connects a function handler to the AWS
//! Lambda control plane (the Runtime API).
//!
//! ## Overview
//!
//! The client registers with the control plane, then loops: fetch the next
//! invocation, run the handler, report the response or the error. On the
//! way it:
//!
//! - runs SnapStart checkpoint/restore hooks registered in a
//!   [`crac::ResourceRegistry`] before a snapshot and after a restore,
//! - runs a pool of workers when multi-concurrency is enabled with
//!   `AWS_LAMBDA_MAX_CONCURRENCY`,
//! - writes function logs either to stdout or as length-prefixed frames to
//!   the telemetry pipe named by `_LAMBDA_TELEMETRY_LOG_FD`.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use aws_lambda_runtime_client::{json_handler, HandlerError, LambdaContext};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize)]
//! struct Request {
//!     name: String,
//! }
//!
//! #[derive(Serialize)]
//! struct Response {
//!     greeting: String,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let handler = json_handler(|request: Request, _ctx: LambdaContext| async move {
//!         Ok::<_, HandlerError>(Response {
//!             greeting: format!("hello {}", request.name),
//!         })
//!     });
//!     if let Err(error) = aws_lambda_runtime_client::run(handler).await {
//!         eprintln!("{}", error);
//!         std::process::exit(error.exit_code());
//!     }
//! }
//! ```
//!
//! ## Handler Errors
//!
//! A handler returns [`HandlerError`] on failure. The error is written to the
//! function log, reported to the control plane as `Runtime.UserException`,
//! and the loop moves on. Panics are caught and reported the same way. Only
//! errors built with [`HandlerError::fatal`] stop the runtime.
//!
//! ## SnapStart
//!
//! Resources that hold sockets, file handles or cached credentials register
//! with [`crac::global_context`] and get called back around the snapshot:
//!
//! ```rust
//! use std::sync::Arc;
//! use aws_lambda_runtime_client::crac::{self, Resource, ResourceRegistry};
//! use aws_lambda_runtime_client::BoxError;
//!
//! struct ConnectionPool;
//!
//! impl Resource for ConnectionPool {
//!     fn before_checkpoint(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//!
//!     fn after_restore(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! let pool = Arc::new(ConnectionPool);
//! crac::global_context().register(&pool);
//! ```
//!
//! ## Module Organization
//!
//! - [`client`]: Runtime API client and the [`ControlPlane`] seam
//! - [`config`]: Environment variables and concurrency configuration
//! - [`context`]: Per-invocation [`LambdaContext`]
//! - [`crac`]: Checkpoint/restore resource registry
//! - [`error`]: Runtime and handler error types
//! - [`handler`]: The [`Handler`] trait and closure adapters
//! - [`invocation`]: Invocation and lifecycle event types
//! - [`logging`]: Log levels, formatters, sinks and the tracing layer
//! - [`report`]: Error reports posted to the control plane
//! - [`runtime`]: The poll loop

pub mod client;
pub mod config;
pub mod context;
pub mod crac;
pub mod error;
pub mod handler;
pub mod invocation;
pub mod logging;
pub mod report;
pub mod runtime;

// Re-export main types at crate root
pub use client::{ControlPlane, RuntimeApiClient, SharedControlPlane};
pub use config::{ConcurrencyConfig, EnvReader, LambdaEnvironment, SystemEnv};
pub use context::{ClientApplication, ClientContext, CognitoIdentity, LambdaContext};
pub use error::{BoxError, HandlerError, RuntimeError, SNAPSTART_HOOK_EXIT_CODE};
pub use handler::{handler_fn, json_handler, Handler, HandlerFn, JsonHandler, SharedHandler};
pub use invocation::{InvocationRequest, InvokeEvent, NextEvent, ShutdownEvent};
pub use logging::{LambdaLogger, LogFormat, LogLevel, LogSink};
pub use report::{ErrorRequest, LambdaError, RapidErrorType, XRayErrorCause};
pub use runtime::{run, run_with_init, Runtime, RuntimeBuilder, RuntimeState};
