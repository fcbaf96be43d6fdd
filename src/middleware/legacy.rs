//! Request-style middleware, the framework's original calling convention.
//!
//! A legacy middleware consumes the request and produces the response of
//! everything downstream; the chain is composed right-to-left at call time.
//! Routes snapshot the chain at registration, so later registrations do not
//! retroactively wrap earlier routes.

use crate::handler::{Handler, HttpResponse, IntoResponse};
use crate::http::Request;
use futures::future::BoxFuture;

#[derive(Clone)]
pub struct LegacyNext {
    handler: Box<dyn Handler>,
}

impl LegacyNext {
    pub fn new<F, R>(handler: F) -> Self
    where
        F: Fn(Request) -> R + Send + Sync + Clone + 'static,
        R: IntoResponse,
    {
        Self {
            handler: Box::new(handler),
        }
    }

    pub(crate) fn new_handler(handler: Box<dyn Handler>) -> Self {
        Self { handler }
    }

    pub async fn handle(&self, req: Request) -> HttpResponse {
        self.handler.handle(req).await
    }
}

pub type LegacyResult = BoxFuture<'static, HttpResponse>;

pub trait LegacyMiddleware: Send + Sync + 'static {
    fn call(&self, req: Request, next: LegacyNext) -> LegacyResult;
    fn clone_box(&self) -> Box<dyn LegacyMiddleware>;
}

impl Clone for Box<dyn LegacyMiddleware> {
    fn clone(&self) -> Box<dyn LegacyMiddleware> {
        self.clone_box()
    }
}

/// Ordered stack of legacy middleware, executed strictly in registration
/// order for a single request.
#[derive(Clone, Default)]
pub struct LegacyChain {
    pub(crate) middlewares: Vec<Box<dyn LegacyMiddleware>>,
}

impl LegacyChain {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    pub fn add<M: LegacyMiddleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Box::new(middleware));
    }

    pub fn append(&mut self, mut other: LegacyChain) -> &Self {
        self.middlewares.append(&mut other.middlewares);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Wraps `next` in every middleware, innermost-last, then runs the result.
    pub async fn call(&self, req: Request, next: LegacyNext) -> HttpResponse {
        let mut next = next;
        let mut index = self.middlewares.len();
        while index > 0 {
            index -= 1;
            let middleware = self.middlewares[index].clone();
            next = LegacyNext::new_handler(Box::new(move |req| middleware.call(req, next.clone())));
        }
        next.handle(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use crate::http::{Method, Response};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Tag(&'static str);

    impl LegacyMiddleware for Tag {
        fn call(&self, mut req: Request, next: LegacyNext) -> LegacyResult {
            let tag = self.0;
            Box::pin(async move {
                req.set_data(tag, true);
                let mut response = next.handle(req).await?;
                response.header(format!("x-{}", tag), "1");
                Ok(response)
            })
        }

        fn clone_box(&self) -> Box<dyn LegacyMiddleware> {
            Box::new(Tag(self.0))
        }
    }

    struct Deny;

    impl LegacyMiddleware for Deny {
        fn call(&self, _req: Request, _next: LegacyNext) -> LegacyResult {
            Box::pin(async { Err(ServerError::Unauthorized("nope".into())) })
        }

        fn clone_box(&self) -> Box<dyn LegacyMiddleware> {
            Box::new(Deny)
        }
    }

    #[tokio::test]
    async fn chain_runs_in_registration_order_and_wraps() {
        let mut chain = LegacyChain::new();
        chain.add(Tag("outer"));
        chain.add(Tag("inner"));

        let response = chain
            .call(
                Request::new(Method::GET, "/"),
                LegacyNext::new(|req: Request| async move {
                    // Both middlewares ran before the terminal handler.
                    assert!(req.get_data("outer").is_some());
                    assert!(req.get_data("inner").is_some());
                    Ok(Response::text("done"))
                }),
            )
            .await
            .unwrap();
        assert!(response.headers.contains_key("x-outer"));
        assert!(response.headers.contains_key("x-inner"));
    }

    #[tokio::test]
    async fn failing_middleware_short_circuits_the_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_handler = Arc::clone(&calls);

        let mut chain = LegacyChain::new();
        chain.add(Deny);

        let result = chain
            .call(
                Request::new(Method::GET, "/"),
                LegacyNext::new(move |_req: Request| {
                    let calls = Arc::clone(&calls_in_handler);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Response::text("unreachable"))
                    }
                }),
            )
            .await;

        assert!(matches!(result, Err(ServerError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
