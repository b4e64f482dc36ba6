//! Echo Example
//!
//! A JSON handler that echoes the request back with the invocation's request
//! id and remaining time.

use aws_lambda_runtime_client::{json_handler, HandlerError, LambdaContext};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct Request {
    message: String,
}

#[derive(Serialize)]
struct Response {
    message: String,
    request_id: String,
    remaining_ms: u64,
}

#[tokio::main]
async fn main() {
    let handler = json_handler(|request: Request, ctx: LambdaContext| async move {
        if request.message.is_empty() {
            return Err(HandlerError::new("ValidationError", "message must not be empty"));
        }
        tracing::info!(length = request.message.len(), "Echoing message");
        Ok(Response {
            message: request.message,
            remaining_ms: ctx.remaining_time_millis(),
            request_id: ctx.request_id,
        })
    });

    if let Err(error) = aws_lambda_runtime_client::run(handler).await {
        eprintln!("{}", error);
        std::process::exit(error.exit_code());
    }
}
