//! SnapStart Example
//!
//! Builds a connection pool during init, registers it for checkpoint/restore
//! notifications and reconnects after the snapshot is restored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aws_lambda_runtime_client::crac::{self, Resource, ResourceRegistry};
use aws_lambda_runtime_client::{handler_fn, BoxError, HandlerError, LambdaContext};
use bytes::Bytes;

/// Stand-in for a pool of network connections.
struct ConnectionPool {
    generation: AtomicU64,
}

impl Resource for ConnectionPool {
    fn before_checkpoint(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
        tracing::info!("Closing connections before checkpoint");
        Ok(())
    }

    fn after_restore(&self, _context: &ResourceRegistry) -> Result<(), BoxError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(generation, "Reconnected after restore");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let result = aws_lambda_runtime_client::run_with_init(|| async {
        let pool = Arc::new(ConnectionPool {
            generation: AtomicU64::new(0),
        });
        crac::global_context().register(&pool);

        Ok::<_, BoxError>(handler_fn(move |_payload: Bytes, _ctx: LambdaContext| {
            let pool = pool.clone();
            async move {
                let generation = pool.generation.load(Ordering::SeqCst);
                Ok::<_, HandlerError>(Bytes::from(format!("{{\"generation\":{}}}", generation)))
            }
        }))
    })
    .await;

    if let Err(error) = result {
        eprintln!("{}", error);
        std::process::exit(error.exit_code());
    }
}
