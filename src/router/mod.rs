//! Route table with deterministic first-registered-match-wins lookup.
//!
//! Routes are kept in registration order and scanned linearly; there is no
//! specificity sorting, so a `/users/:id` registered before `/users/active`
//! will capture `active` as an id. That is the documented contract.

pub mod matcher;

use crate::handler::{IntoRouteHandler, RouteHandler};
use crate::http::Method;
use crate::middleware::{LegacyChain, LegacyMiddleware, Middleware};
use std::collections::HashMap;
use std::sync::Arc;

/// Method constraint on a route: an exact method, or any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRule {
    Any,
    Exact(Method),
}

impl MethodRule {
    pub fn matches(&self, method: Method) -> bool {
        match self {
            MethodRule::Any => true,
            MethodRule::Exact(wanted) => *wanted == method,
        }
    }
}

#[derive(Clone)]
pub struct Route {
    pub(crate) method: MethodRule,
    pub(crate) pattern: String,
    pub(crate) handler: RouteHandler,
    /// Context-style middleware attached in the registration call, run after
    /// the global stack and before the handler.
    pub(crate) middlewares: Vec<Arc<dyn Middleware>>,
    /// Snapshot of the legacy stack at registration time.
    pub(crate) legacy_chain: LegacyChain,
    pub(crate) uses_context: bool,
}

impl Route {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn uses_context(&self) -> bool {
        self.uses_context
    }
}

/// A successful lookup: the route plus its extracted parameters.
pub struct RouteMatch {
    pub route: Route,
    pub params: HashMap<String, String>,
}

#[derive(Clone, Default)]
pub struct Router {
    pub(crate) routes: Vec<Route>,
    pub(crate) legacy_middlewares: LegacyChain,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            legacy_middlewares: LegacyChain::new(),
        }
    }

    pub fn get<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.add(MethodRule::Exact(Method::GET), path, Vec::new(), handler)
    }

    pub fn post<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.add(MethodRule::Exact(Method::POST), path, Vec::new(), handler)
    }

    pub fn put<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.add(MethodRule::Exact(Method::PUT), path, Vec::new(), handler)
    }

    pub fn patch<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.add(MethodRule::Exact(Method::PATCH), path, Vec::new(), handler)
    }

    pub fn delete<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.add(MethodRule::Exact(Method::DELETE), path, Vec::new(), handler)
    }

    pub fn head<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.add(MethodRule::Exact(Method::HEAD), path, Vec::new(), handler)
    }

    pub fn options<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.add(MethodRule::Exact(Method::OPTIONS), path, Vec::new(), handler)
    }

    /// Registers a route matching every method.
    pub fn any<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.add(MethodRule::Any, path, Vec::new(), handler)
    }

    /// Registration with route-attached middleware, run between the global
    /// stack and the handler, in the given order.
    pub fn route_with<M>(
        &mut self,
        method: MethodRule,
        path: &str,
        middlewares: Vec<Arc<dyn Middleware>>,
        handler: impl IntoRouteHandler<M>,
    ) -> &mut Self {
        self.add(method, path, middlewares, handler)
    }

    fn add<M>(
        &mut self,
        method: MethodRule,
        path: &str,
        middlewares: Vec<Arc<dyn Middleware>>,
        handler: impl IntoRouteHandler<M>,
    ) -> &mut Self {
        let handler = handler.into_route_handler();
        let uses_context = handler.uses_context() || !middlewares.is_empty();
        self.routes.push(Route {
            method,
            pattern: path.to_string(),
            handler,
            middlewares,
            legacy_chain: self.legacy_middlewares.clone(),
            uses_context,
        });
        self
    }

    /// Appends to the legacy middleware stack; routes registered afterwards
    /// snapshot the extended stack.
    pub fn legacy_middleware(&mut self, middleware: impl LegacyMiddleware + 'static) {
        self.legacy_middlewares.add(middleware);
    }

    /// Merges another router's routes under a path prefix, preserving their
    /// relative registration order. The mounted routes inherit this router's
    /// current legacy stack in front of their own.
    pub fn mount(&mut self, prefix: &str, router: Router) {
        for route in router.routes {
            let joined = format!("{}{}", prefix.trim_end_matches('/'), route.pattern);
            let pattern = if joined.is_empty() { "/".to_string() } else { joined };
            let mut legacy_chain = self.legacy_middlewares.clone();
            legacy_chain.append(route.legacy_chain);
            self.routes.push(Route {
                pattern,
                legacy_chain,
                ..route
            });
        }
    }

    /// First registered route whose method and path both match.
    pub fn match_route(&self, method: Method, path: &str) -> Option<RouteMatch> {
        for route in &self.routes {
            if !route.method.matches(method) {
                continue;
            }
            if let Some(params) = matcher::match_path(&route.pattern, path) {
                return Some(RouteMatch {
                    route: route.clone(),
                    params,
                });
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered patterns in registration order, for introspection.
    pub fn patterns(&self) -> Vec<(String, String)> {
        self.routes
            .iter()
            .map(|route| {
                let method = match route.method {
                    MethodRule::Any => "*".to_string(),
                    MethodRule::Exact(m) => m.as_str().to_string(),
                };
                (method, route.pattern.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::http::{Request, Response};

    fn noop_router() -> Router {
        Router::new()
    }

    fn legacy(tag: &'static str) -> impl Fn(Request) -> futures::future::BoxFuture<'static, crate::handler::HttpResponse> + Clone {
        move |_req: Request| {
            Box::pin(async move { Ok(Response::text(tag)) })
                as futures::future::BoxFuture<'static, crate::handler::HttpResponse>
        }
    }

    #[test]
    fn first_registered_route_wins() {
        let mut router = noop_router();
        router.get("/users/:id", legacy("param"));
        router.get("/users/active", legacy("literal"));

        let matched = router.match_route(Method::GET, "/users/active").unwrap();
        // No specificity sorting: the param route registered first captures.
        assert_eq!(matched.route.pattern(), "/users/:id");
        assert_eq!(matched.params.get("id").unwrap(), "active");
    }

    #[test]
    fn params_are_extracted_on_match() {
        let mut router = noop_router();
        router.get("/users/:id", legacy("u"));
        let matched = router.match_route(Method::GET, "/users/42").unwrap();
        assert_eq!(matched.params.get("id").unwrap(), "42");
    }

    #[test]
    fn method_must_match_unless_any() {
        let mut router = noop_router();
        router.get("/things", legacy("get"));
        router.any("/things", legacy("any"));

        assert_eq!(
            router
                .match_route(Method::GET, "/things")
                .unwrap()
                .route
                .pattern(),
            "/things"
        );
        let posted = router.match_route(Method::POST, "/things").unwrap();
        assert_eq!(posted.route.method, MethodRule::Any);
    }

    #[test]
    fn no_match_returns_none() {
        let mut router = noop_router();
        router.get("/users", legacy("u"));
        assert!(router.match_route(Method::GET, "/nope").is_none());
        assert!(router.match_route(Method::DELETE, "/users").is_none());
    }

    #[test]
    fn mount_prefixes_and_preserves_order() {
        let mut api = Router::new();
        api.get("/status", legacy("s"));
        api.get("/:resource", legacy("r"));

        let mut app = Router::new();
        app.mount("/api", api);

        let matched = app.match_route(Method::GET, "/api/status").unwrap();
        assert_eq!(matched.route.pattern(), "/api/status");
        let matched = app.match_route(Method::GET, "/api/users").unwrap();
        assert_eq!(matched.params.get("resource").unwrap(), "users");
    }

    #[test]
    fn context_handlers_flag_the_route() {
        let mut router = noop_router();
        router.get("/modern", |ctx: Context| async move { ctx.text("hi") });
        router.get("/old", legacy("old"));

        assert!(router.match_route(Method::GET, "/modern").unwrap().route.uses_context());
        assert!(!router.match_route(Method::GET, "/old").unwrap().route.uses_context());
    }
}
