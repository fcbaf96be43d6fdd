use crate::context::Context;
use crate::handler::ChainResult;
use crate::middleware::{Middleware, Next};
use futures::future::BoxFuture;
use std::time::Instant;

/// Logs one line per request with method, path, status and duration.
pub struct RequestLogger;

impl Middleware for RequestLogger {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, ChainResult> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.method();
            let path = ctx.path().to_string();
            let request_id = ctx.request_id().to_string();

            let result = next.run(ctx.clone()).await;

            let elapsed_ms = start.elapsed().as_millis() as u64;
            let status = {
                let mut status = 0;
                ctx.with_response(|response| status = response.status);
                status
            };
            match &result {
                Ok(()) => tracing::info!(
                    %method, %path, status, elapsed_ms, request_id = %request_id,
                    "request completed"
                ),
                Err(err) => tracing::error!(
                    %method, %path, elapsed_ms, request_id = %request_id, error = %err,
                    "request failed"
                ),
            }
            result
        })
    }

    fn name(&self) -> &str {
        "request-logger"
    }
}

/// Stamps `X-Response-Time` on the finished response.
pub struct ResponseTime;

impl Middleware for ResponseTime {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, ChainResult> {
        Box::pin(async move {
            let start = Instant::now();
            let result = next.run(ctx.clone()).await;
            let elapsed = format!("{}ms", start.elapsed().as_millis());
            ctx.with_response(|response| {
                response.header("X-Response-Time", &elapsed);
            });
            result
        })
    }

    fn name(&self) -> &str {
        "response-time"
    }
}
