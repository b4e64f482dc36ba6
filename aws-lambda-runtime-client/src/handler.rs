//! User handler abstraction.
//!
//! A handler receives the raw event payload and a [`LambdaContext`] and
//! returns the raw response payload or a [`HandlerError`]. Closures can be
//! adapted with [`handler_fn`], and typed JSON handlers with [`json_handler`].

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::LambdaContext;
use crate::error::HandlerError;

/// Handles one invocation.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles the invocation with the given payload.
    async fn call(&self, payload: Bytes, context: LambdaContext) -> Result<Bytes, HandlerError>;
}

/// Type alias for a shared handler.
pub type SharedHandler = Arc<dyn Handler>;

/// Handler backed by an async closure over raw bytes.
pub struct HandlerFn<F> {
    f: F,
}

/// Adapts an async closure into a [`Handler`].
///
/// # Examples
///
/// ```
/// use aws_lambda_runtime_client::{handler_fn, HandlerError, LambdaContext};
/// use bytes::Bytes;
///
/// let echo = handler_fn(|payload: Bytes, _ctx: LambdaContext| async move {
///     Ok::<_, HandlerError>(payload)
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Bytes, LambdaContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Bytes, HandlerError>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Bytes, LambdaContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Bytes, HandlerError>> + Send,
{
    async fn call(&self, payload: Bytes, context: LambdaContext) -> Result<Bytes, HandlerError> {
        (self.f)(payload, context).await
    }
}

/// Handler that deserializes the payload and serializes the response as JSON.
pub struct JsonHandler<F, I, O> {
    f: F,
    _types: PhantomData<fn(I) -> O>,
}

/// Adapts an async closure over serde types into a [`Handler`].
///
/// A payload that does not deserialize into `I` is reported as a
/// `SerDesError` without calling the closure.
///
/// # Examples
///
/// ```
/// use aws_lambda_runtime_client::{json_handler, HandlerError, LambdaContext};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize)]
/// struct Order { id: String }
///
/// #[derive(Serialize)]
/// struct Receipt { id: String, accepted: bool }
///
/// let handler = json_handler(|order: Order, _ctx: LambdaContext| async move {
///     Ok::<_, HandlerError>(Receipt { id: order.id, accepted: true })
/// });
/// ```
pub fn json_handler<F, Fut, I, O>(f: F) -> JsonHandler<F, I, O>
where
    F: Fn(I, LambdaContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, HandlerError>> + Send,
    I: DeserializeOwned + Send,
    O: Serialize,
{
    JsonHandler {
        f,
        _types: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, I, O> Handler for JsonHandler<F, I, O>
where
    F: Fn(I, LambdaContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, HandlerError>> + Send,
    I: DeserializeOwned + Send,
    O: Serialize,
{
    async fn call(&self, payload: Bytes, context: LambdaContext) -> Result<Bytes, HandlerError> {
        let input: I = serde_json::from_slice(&payload)?;
        let output = (self.f)(input, context).await?;
        let body = serde_json::to_vec(&output)?;
        Ok(Bytes::from(body))
    }
}
