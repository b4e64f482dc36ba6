//! Checkpoint/restore resource hooks.
//!
//! Resources register with a [`ResourceRegistry`] and are notified before the
//! execution environment is snapshotted and after it has been restored from a
//! snapshot (SnapStart). Notifications run in reverse registration order
//! before a checkpoint and in registration order after a restore.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use aws_lambda_runtime_client::crac::{Resource, ResourceRegistry};
//! use aws_lambda_runtime_client::BoxError;
//!
//! struct ConnectionPool;
//!
//! impl Resource for ConnectionPool {
//!     fn before_checkpoint(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
//!         // close sockets that would be stale after restore
//!         Ok(())
//!     }
//!
//!     fn after_restore(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! let registry = ResourceRegistry::new();
//! let pool = Arc::new(ConnectionPool);
//! registry.register(&pool);
//! registry.notify_before_checkpoint().unwrap();
//! registry.notify_after_restore().unwrap();
//! ```

mod error;
mod global;
mod registry;

pub use self::error::{CheckpointError, RestoreError};
pub use self::global::{global_context, init, reset_for_tests};
pub use self::registry::ResourceRegistry;

use crate::error::BoxError;

/// A participant in checkpoint/restore notifications.
///
/// The registry only keeps a weak reference to a resource. Once the last
/// `Arc` owning it is dropped the resource is silently skipped.
pub trait Resource: Send + Sync {
    /// Called before the execution environment is checkpointed.
    fn before_checkpoint(&self, context: &ResourceRegistry) -> Result<(), BoxError>;

    /// Called after the execution environment has been restored.
    fn after_restore(&self, context: &ResourceRegistry) -> Result<(), BoxError>;
}
