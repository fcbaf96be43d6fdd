//! The middleware pipeline.
//!
//! Context-style middleware ([`Middleware`]) is the engine's native shape:
//! each link receives the per-request [`Context`] and a [`Next`] continuation
//! that resolves once everything downstream has finished. Request-style
//! middleware lives in [`legacy`] and is driven by the dispatcher directly.

pub mod compression;
pub mod legacy;
pub mod logging;
pub mod security;

pub use compression::{CompressionConfig, CompressionMiddleware};
pub use legacy::{LegacyChain, LegacyMiddleware, LegacyNext, LegacyResult};
pub use logging::{RequestLogger, ResponseTime};
pub use security::{Cors, CorsConfig, RateLimitConfig, RateLimiter, SecurityConfig, SecurityHeaders};

use crate::context::Context;
use crate::error_handler::error_response;
use crate::handler::{ChainResult, ContextHandler};
use crate::http::Method;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, ChainResult>;

    /// Debug name, shown in dispatch traces.
    fn name(&self) -> &str {
        "middleware"
    }
}

/// Continuation handed to each middleware.
///
/// `run` executes the rest of the chain and resolves when the downstream
/// middleware and the terminal handler have completed, so code after the
/// await observes the finished response. A fired-once guard makes repeated
/// calls no-ops: the downstream chain executes at most once.
#[derive(Clone)]
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    terminal: Arc<dyn ContextHandler>,
    fired: Arc<AtomicBool>,
}

impl Next {
    pub(crate) fn chain(
        middlewares: Vec<Arc<dyn Middleware>>,
        terminal: Arc<dyn ContextHandler>,
    ) -> Next {
        Next {
            chain: middlewares.into(),
            index: 0,
            terminal,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn run(&self, ctx: Context) -> BoxFuture<'static, ChainResult> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return Box::pin(async { Ok(()) });
        }
        if self.index < self.chain.len() {
            let middleware = Arc::clone(&self.chain[self.index]);
            let next = Next {
                chain: Arc::clone(&self.chain),
                index: self.index + 1,
                terminal: Arc::clone(&self.terminal),
                fired: Arc::new(AtomicBool::new(false)),
            };
            Box::pin(async move { middleware.handle(ctx, next).await })
        } else {
            let terminal = Arc::clone(&self.terminal);
            Box::pin(async move { terminal.handle(ctx).await })
        }
    }
}

/// One registered middleware plus its applicability filters.
#[derive(Clone)]
pub(crate) struct MiddlewareEntry {
    pub(crate) middleware: Arc<dyn Middleware>,
    pub(crate) path: Option<String>,
    pub(crate) method: Option<Method>,
    pub(crate) name: String,
}

impl MiddlewareEntry {
    fn applies(&self, method: Method, path: &str) -> bool {
        if let Some(prefix) = &self.path {
            if !path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(wanted) = self.method {
            if wanted != method {
                return false;
            }
        }
        true
    }
}

/// Global middleware stack plus `method:path`-keyed entries.
#[derive(Clone, Default)]
pub struct MiddlewareEngine {
    global: Vec<MiddlewareEntry>,
    routed: HashMap<String, Vec<Arc<dyn Middleware>>>,
}

fn route_key(method: Method, path: &str) -> String {
    format!("{}:{}", method.as_str(), path)
}

impl MiddlewareEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers middleware that applies to every request.
    pub fn apply(&mut self, middleware: impl Middleware) {
        let name = middleware.name().to_string();
        self.global.push(MiddlewareEntry {
            middleware: Arc::new(middleware),
            path: None,
            method: None,
            name,
        });
    }

    /// Registers middleware that applies when the request path starts with
    /// `path`.
    pub fn apply_at(&mut self, path: &str, middleware: impl Middleware) {
        let name = middleware.name().to_string();
        self.global.push(MiddlewareEntry {
            middleware: Arc::new(middleware),
            path: Some(path.to_string()),
            method: None,
            name,
        });
    }

    /// Registers middleware filtered by method (and optionally path prefix).
    pub fn apply_when(&mut self, method: Method, path: Option<&str>, middleware: impl Middleware) {
        let name = middleware.name().to_string();
        self.global.push(MiddlewareEntry {
            middleware: Arc::new(middleware),
            path: path.map(|p| p.to_string()),
            method: Some(method),
            name,
        });
    }

    /// Registers middleware against one exact `method:path` combination,
    /// distinct from prefix-filtered global entries.
    pub fn apply_for(&mut self, method: Method, path: &str, middleware: impl Middleware) {
        self.routed
            .entry(route_key(method, path))
            .or_default()
            .push(Arc::new(middleware));
    }

    /// Applicable middleware for a request, in registration order, with the
    /// exact-route entries appended last.
    pub(crate) fn applicable(&self, method: Method, path: &str) -> Vec<Arc<dyn Middleware>> {
        let mut selected: Vec<Arc<dyn Middleware>> = self
            .global
            .iter()
            .filter(|entry| entry.applies(method, path))
            .map(|entry| Arc::clone(&entry.middleware))
            .collect();
        if let Some(extra) = self.routed.get(&route_key(method, path)) {
            selected.extend(extra.iter().map(Arc::clone));
        }
        selected
    }

    pub(crate) fn trace_applicable(&self, method: Method, path: &str) {
        for entry in self.global.iter().filter(|e| e.applies(method, path)) {
            tracing::trace!(middleware = %entry.name, "selected");
        }
    }

    /// Runs the applicable chain against `ctx` with `terminal` at the end.
    ///
    /// On an error anywhere in the chain a default error response is written
    /// if nothing has been sent yet, and the error is propagated so the
    /// dispatcher's error pipeline still observes it. The headers-sent guard
    /// on the context keeps the response single-send across both layers.
    pub async fn execute(&self, ctx: Context, terminal: Arc<dyn ContextHandler>) -> ChainResult {
        self.trace_applicable(ctx.method(), ctx.path());
        let chain = self.applicable(ctx.method(), ctx.path());
        Self::run_chain(chain, ctx, terminal).await
    }

    /// Runs an explicit middleware list; used by the dispatcher for
    /// route-attached middleware as well.
    pub(crate) async fn run_chain(
        middlewares: Vec<Arc<dyn Middleware>>,
        ctx: Context,
        terminal: Arc<dyn ContextHandler>,
    ) -> ChainResult {
        let next = Next::chain(middlewares, terminal);
        match next.run(ctx.clone()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if !ctx.headers_sent() {
                    ctx.install_response(error_response(&err, ctx.path(), false));
                }
                Err(err)
            }
        }
    }
}
