use crate::context::Context;
use crate::error::ServerResult;
use crate::http::{Request, Response};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

pub type HttpResponse = ServerResult<Response>;
/// Outcome of a context-style handler or middleware; the response itself is
/// written through the [`Context`].
pub type ChainResult = ServerResult<()>;

pub trait IntoResponse {
    fn into_response_future(self) -> BoxFuture<'static, HttpResponse>;
}

impl<F: Future<Output = HttpResponse> + Send + 'static> IntoResponse for F {
    fn into_response_future(self) -> BoxFuture<'static, HttpResponse> {
        Box::pin(self)
    }
}

/// Legacy calling convention: the handler consumes the request and returns
/// the response.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, req: Request) -> BoxFuture<'static, HttpResponse>;

    fn dyn_clone<'s>(&self) -> Box<dyn Handler + 's>
    where
        Self: 's;
}

impl Clone for Box<dyn Handler> {
    fn clone(&self) -> Box<dyn Handler> {
        self.dyn_clone()
    }
}

impl<F, R> Handler for F
where
    F: Fn(Request) -> R + Send + Sync + Clone + 'static,
    R: IntoResponse,
{
    fn handle(&self, req: Request) -> BoxFuture<'static, HttpResponse> {
        (self)(req).into_response_future()
    }

    fn dyn_clone<'s>(&self) -> Box<dyn Handler + 's>
    where
        Self: 's,
    {
        Box::new((*self).clone())
    }
}

/// Context calling convention: the handler receives the per-request
/// [`Context`] and writes its response through it.
pub trait ContextHandler: Send + Sync + 'static {
    fn handle(&self, ctx: Context) -> BoxFuture<'static, ChainResult>;
}

impl<F, Fut> ContextHandler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ChainResult> + Send + 'static,
{
    fn handle(&self, ctx: Context) -> BoxFuture<'static, ChainResult> {
        Box::pin((self)(ctx))
    }
}

/// The calling convention a route was registered with. The variant is fixed
/// at registration time by which closure shape the caller passed; it is never
/// inferred at dispatch time.
#[derive(Clone)]
pub enum RouteHandler {
    Legacy(Box<dyn Handler>),
    Context(Arc<dyn ContextHandler>),
}

impl RouteHandler {
    pub fn uses_context(&self) -> bool {
        matches!(self, RouteHandler::Context(_))
    }
}

/// Conversion accepted by the route-registration methods. The marker type
/// parameter lets one `get()` accept both handler shapes without overlap.
pub trait IntoRouteHandler<M>: Send + Sync + 'static {
    fn into_route_handler(self) -> RouteHandler;
}

/// Marker for request-consuming handlers.
pub struct LegacyStyle;
/// Marker for context-receiving handlers.
pub struct ContextStyle;

impl<F, R> IntoRouteHandler<LegacyStyle> for F
where
    F: Fn(Request) -> R + Send + Sync + Clone + 'static,
    R: IntoResponse + 'static,
{
    fn into_route_handler(self) -> RouteHandler {
        RouteHandler::Legacy(Box::new(self))
    }
}

impl<F, Fut> IntoRouteHandler<ContextStyle> for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ChainResult> + Send + 'static,
{
    fn into_route_handler(self) -> RouteHandler {
        RouteHandler::Context(Arc::new(self))
    }
}

/// Marker for handlers that were already tagged.
pub struct Tagged;

impl IntoRouteHandler<Tagged> for RouteHandler {
    fn into_route_handler(self) -> RouteHandler {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    fn kind_of<M>(h: impl IntoRouteHandler<M>) -> RouteHandler {
        h.into_route_handler()
    }

    #[tokio::test]
    async fn registration_shape_selects_the_convention() {
        let legacy = kind_of(|_req: Request| async { Ok(Response::text("hi")) });
        assert!(!legacy.uses_context());

        let modern = kind_of(|ctx: Context| async move { ctx.text("hi") });
        assert!(modern.uses_context());
    }

    #[tokio::test]
    async fn legacy_handlers_run_against_a_request() {
        let handler = kind_of(|req: Request| async move {
            Ok(Response::text(format!("saw {}", req.path)))
        });
        match handler {
            RouteHandler::Legacy(h) => {
                let response = h.handle(Request::new(Method::GET, "/x")).await.unwrap();
                assert_eq!(response.body, "saw /x");
            }
            RouteHandler::Context(_) => panic!("expected legacy variant"),
        }
    }
}
