//! The error pipeline.
//!
//! Custom handlers are tried newest-first; the built-in default runs last and
//! always produces a response. A handler succeeds either by returning a
//! response or by writing one through the context; in both cases the rest of
//! the pipeline is skipped. Routing misses never reach this pipeline; they
//! are answered with a structured 404 directly by the dispatcher.

use crate::context::Context;
use crate::error::ServerError;
use crate::http::{Method, Response};
use serde_json::json;
use std::sync::Arc;

/// What the failing request looked like, for handlers and the default body.
pub struct ErrorScope<'a> {
    pub method: Method,
    pub path: &'a str,
    pub request_id: Option<&'a str>,
    pub ctx: Option<&'a Context>,
}

pub type ErrorHandler = Arc<dyn Fn(&ServerError, &ErrorScope) -> Option<Response> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ErrorHandlerManager {
    handlers: Vec<ErrorHandler>,
    debug: bool,
}

impl ErrorHandlerManager {
    pub fn new(debug: bool) -> Self {
        Self {
            handlers: Vec::new(),
            debug,
        }
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Registers a custom handler; the most recently registered runs first.
    pub fn on_error<F>(&mut self, handler: F)
    where
        F: Fn(&ServerError, &ErrorScope) -> Option<Response> + Send + Sync + 'static,
    {
        self.handlers.insert(0, Arc::new(handler));
    }

    /// Runs the pipeline. `None` means a response already exists and nothing
    /// more must be written.
    pub(crate) fn handle(&self, err: &ServerError, scope: &ErrorScope) -> Option<Response> {
        if scope.ctx.map(Context::headers_sent).unwrap_or(false) {
            tracing::debug!(error = %err, "response already sent, error pipeline skipped");
            return None;
        }

        tracing::error!(
            error = %err,
            method = %scope.method,
            path = %scope.path,
            request_id = scope.request_id.unwrap_or("-"),
            "request failed"
        );

        for handler in &self.handlers {
            if let Some(response) = handler(err, scope) {
                return Some(response);
            }
            // The handler may have written through the context instead of
            // returning a response.
            if scope.ctx.map(Context::headers_sent).unwrap_or(false) {
                return None;
            }
        }

        Some(error_response(err, scope.path, self.debug))
    }
}

/// The default error body, shared with the middleware engine's fallback.
pub(crate) fn error_response(err: &ServerError, path: &str, debug: bool) -> Response {
    let status = err.status_code();
    let mut body = json!({
        "success": false,
        "error": err.to_string(),
        "statusCode": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "path": path,
    });
    if debug {
        body["stack"] = json!(format!("{:?}", err));
        body["tip"] = json!("disable debug mode to hide error internals");
    }

    let mut response = Response::new(status);
    if response.json(&body).is_err() {
        response.header("Content-Type", "text/plain");
        response.body(format!("{} {}", status, err));
    }
    response
}
