//! Application: configuration, registration surface, server loop and the
//! per-request dispatch pipeline.
//!
//! Dispatch is linear per request: parse -> context (when enabled) ->
//! pre-request hooks -> static check -> global middleware -> route lookup ->
//! route middleware -> handler -> response hooks. A routing miss produces a
//! structured 404 directly; every other failure funnels into the error
//! pipeline. Nothing is retried, and a failing request never affects other
//! in-flight requests.

use crate::context::{Context, SessionStore};
use crate::discover::{DiscoveredRoute, FileRouter};
use crate::error::{ServerError, ServerResult};
use crate::error_handler::{ErrorHandlerManager, ErrorScope};
use crate::handler::{ChainResult, ContextHandler, IntoRouteHandler, RouteHandler};
use crate::http::{Body, Method, Request, Response};
use crate::middleware::{LegacyMiddleware, LegacyNext, Middleware, MiddlewareEngine, Next};
use crate::plugins::{Plugin, PluginHooks, Plugins};
use crate::router::{MethodRule, RouteMatch, Router};
use crate::static_files::StaticServer;
use crate::view::{SimpleTemplates, ViewEngine};
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

/// Dispatch-relevant configuration; the dispatcher branches on `use_context`
/// throughout.
#[derive(Clone)]
pub struct AppConfig {
    pub use_context: bool,
    pub use_file_routing: bool,
    pub routes_dir: PathBuf,
    pub views_dir: PathBuf,
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            use_context: true,
            use_file_routing: false,
            routes_dir: PathBuf::from("routes"),
            views_dir: PathBuf::from("views"),
            debug: false,
        }
    }
}

#[derive(Clone)]
pub struct Application {
    pub max_connections: usize,
    pub keep_alive: Duration,
    config: AppConfig,
    router: Router,
    engine: MiddlewareEngine,
    statics: Option<StaticServer>,
    views: Option<Arc<dyn ViewEngine>>,
    plugins: Plugins,
    hooks: PluginHooks,
    errors: ErrorHandlerManager,
    sessions: SessionStore,
    file_routes: Option<FileRouter>,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    pub fn new() -> Self {
        Self {
            max_connections: 256,
            keep_alive: Duration::from_secs(5),
            config: AppConfig::default(),
            router: Router::new(),
            engine: MiddlewareEngine::new(),
            statics: None,
            views: None,
            plugins: Plugins::new(),
            hooks: PluginHooks::new(),
            errors: ErrorHandlerManager::new(false),
            sessions: SessionStore::new("rill-insecure-default", Duration::from_secs(30 * 60)),
            file_routes: None,
        }
    }

    // -- configuration ------------------------------------------------------

    pub fn max_connections(&mut self, max_connections: usize) -> &mut Self {
        self.max_connections = max_connections;
        self
    }

    pub fn keep_alive(&mut self, keep_alive: Duration) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Toggles context-mode dispatch. Disabled, only legacy request-style
    /// routes and middleware run.
    pub fn use_context(&mut self, enabled: bool) -> &mut Self {
        self.config.use_context = enabled;
        self
    }

    pub fn debug(&mut self, enabled: bool) -> &mut Self {
        self.config.debug = enabled;
        self.errors.set_debug(enabled);
        self
    }

    pub fn static_dir(&mut self, dir: &str) -> &mut Self {
        self.statics = Some(StaticServer::new(dir));
        self
    }

    /// Sets the views directory and installs the bundled template engine.
    pub fn views_dir(&mut self, dir: &str) -> &mut Self {
        self.config.views_dir = PathBuf::from(dir);
        self.views = Some(Arc::new(SimpleTemplates::new(dir)));
        self
    }

    /// Installs a custom template engine.
    pub fn view_engine(&mut self, engine: impl ViewEngine + 'static) -> &mut Self {
        self.views = Some(Arc::new(engine));
        self
    }

    pub fn session_secret(&mut self, secret: &str) -> &mut Self {
        self.sessions = SessionStore::new(secret, Duration::from_secs(30 * 60));
        self
    }

    pub fn session_store(&mut self, store: SessionStore) -> &mut Self {
        self.sessions = store;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn routes_dir(&mut self, dir: &str) -> &mut Self {
        self.config.routes_dir = PathBuf::from(dir);
        self
    }

    /// Scans the routes directory and registers every discovered route the
    /// resolver supplies a handler for.
    pub fn use_file_routing<F>(&mut self, resolve: F) -> &mut Self
    where
        F: Fn(&DiscoveredRoute) -> Option<RouteHandler>,
    {
        let discovered = FileRouter::scan(&self.config.routes_dir);
        discovered.apply(&mut self.router, resolve);
        self.config.use_file_routing = true;
        self.file_routes = Some(discovered);
        self
    }

    pub fn file_routes(&self) -> Option<&FileRouter> {
        self.file_routes.as_ref()
    }

    // -- registration -------------------------------------------------------

    pub fn get<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.router.get(path, handler);
        self
    }

    pub fn post<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.router.post(path, handler);
        self
    }

    pub fn put<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.router.put(path, handler);
        self
    }

    pub fn patch<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.router.patch(path, handler);
        self
    }

    pub fn delete<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.router.delete(path, handler);
        self
    }

    pub fn head<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.router.head(path, handler);
        self
    }

    pub fn options<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.router.options(path, handler);
        self
    }

    /// Route matching any method.
    pub fn any<M>(&mut self, path: &str, handler: impl IntoRouteHandler<M>) -> &mut Self {
        self.router.any(path, handler);
        self
    }

    /// Registration with route-attached middleware.
    pub fn route_with<M>(
        &mut self,
        method: MethodRule,
        path: &str,
        middlewares: Vec<Arc<dyn Middleware>>,
        handler: impl IntoRouteHandler<M>,
    ) -> &mut Self {
        self.router.route_with(method, path, middlewares, handler);
        self
    }

    /// Mounts a sub-router under a path prefix.
    pub fn mount(&mut self, path: &str, router: Router) {
        self.router.mount(path, router);
    }

    /// Global context-style middleware, applied to every request.
    pub fn middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.engine.apply(middleware);
        self
    }

    /// Context-style middleware applied when the request path starts with
    /// `path`.
    pub fn middleware_at(&mut self, path: &str, middleware: impl Middleware) -> &mut Self {
        self.engine.apply_at(path, middleware);
        self
    }

    /// Context-style middleware filtered by method.
    pub fn middleware_when(
        &mut self,
        method: Method,
        path: Option<&str>,
        middleware: impl Middleware,
    ) -> &mut Self {
        self.engine.apply_when(method, path, middleware);
        self
    }

    /// Context-style middleware bound to one exact `method:path` pair.
    pub fn middleware_for(
        &mut self,
        method: Method,
        path: &str,
        middleware: impl Middleware,
    ) -> &mut Self {
        self.engine.apply_for(method, path, middleware);
        self
    }

    /// Legacy request-style middleware; routes registered afterwards
    /// snapshot it.
    pub fn legacy_middleware(&mut self, middleware: impl LegacyMiddleware + 'static) -> &mut Self {
        self.router.legacy_middleware(middleware);
        self
    }

    /// Shared value available on every request via its type.
    pub fn plugins<T>(&mut self, plugin: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.plugins.insert(plugin);
        self
    }

    /// Lifecycle-hook plugin; fails on duplicate names or missing
    /// dependencies, fatal during setup.
    pub fn register_plugin(&mut self, plugin: impl Plugin) -> ServerResult<&mut Self> {
        self.hooks.register(plugin)?;
        Ok(self)
    }

    /// Custom error handler; the most recently registered runs first.
    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ServerError, &ErrorScope) -> Option<Response> + Send + Sync + 'static,
    {
        self.errors.on_error(handler);
        self
    }

    /// Renders a template through the configured view engine.
    pub async fn render(&self, name: &str, data: &Value) -> ServerResult<String> {
        match &self.views {
            Some(engine) => engine.render(name, data).await,
            None => Err(ServerError::InternalError(
                "no view engine configured".to_string(),
            )),
        }
    }

    // -- server loop --------------------------------------------------------

    /// Starts the HTTP server, blocking the calling thread.
    pub fn listen(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
        let runtime = Runtime::new()?;
        runtime.block_on(async { self.serve(addr).await })
    }

    /// Async variant of [`listen`](Application::listen) for callers that
    /// already own a runtime.
    pub async fn serve(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        let connection_counter = Arc::new(AtomicUsize::new(0));

        tracing::info!(%addr, "server listening");

        loop {
            let counter = Arc::clone(&connection_counter);
            if counter.load(Ordering::Relaxed) >= self.max_connections {
                tracing::warn!("max connections reached");
                tokio::task::yield_now().await;
                continue;
            }

            match listener.accept().await {
                Ok((stream, _)) => {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let app = self.clone();
                    let counter = Arc::clone(&counter);

                    tokio::spawn(async move {
                        if let Err(e) = app.handle_connection(stream).await {
                            tracing::error!(error = %e, "connection error");
                        }
                        counter.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                Err(e) => tracing::error!(error = %e, "connection failed"),
            }
        }
    }

    async fn handle_connection<S>(&self, mut stream: S) -> Result<(), std::io::Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        use std::io::{Error, ErrorKind};

        let mut buf_reader = BufReader::new(&mut stream);
        let mut request_line = String::new();
        buf_reader.read_line(&mut request_line).await?;

        if request_line.is_empty() {
            return Ok(());
        }

        let mut parts = request_line.trim().split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "Invalid request line"))?
            .to_string();

        let full_path = parts
            .next()
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "Invalid request line"))?;

        let mut path_parts = full_path.split('?');
        let path = path_parts.next().unwrap_or("/").to_string();
        let path = path.trim_end_matches('/').to_string();
        let path = if path.is_empty() { "/".to_string() } else { path };
        let query = path_parts
            .next()
            .map(Self::parse_query)
            .unwrap_or_default();

        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            buf_reader.read_line(&mut line).await?;

            if line.trim().is_empty() {
                break;
            }

            if let Some((key, value)) = line.trim().split_once(':') {
                headers.insert(key.trim().to_lowercase(), value.trim().to_string());
            }
        }

        let mut body = Vec::new();
        let content_type = headers
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| "none".to_string());
        if let Some(content_length) = headers.get("content-length") {
            if let Ok(length) = content_length.parse::<usize>() {
                body.reserve(length);
                let mut take = buf_reader.take(length as u64);
                take.read_to_end(&mut body).await?;
            }
        }

        let request = Request {
            method: Method::from_string(&method),
            path,
            url: full_path.to_string(),
            query,
            headers,
            body: Body::with_content_type(&content_type, body),
            body_value: None,
            params: HashMap::new(),
            data: HashMap::new(),
            plugins: self.plugins.clone(),
        };

        let method = request.method;
        let path = request.path.clone();

        // Panic fence: a panicking handler must not take the worker down.
        let response = AssertUnwindSafe(self.handle_request(request))
            .catch_unwind()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                let panic_msg = if let Some(msg) = err.downcast_ref::<&str>() {
                    msg.to_string()
                } else if let Some(msg) = err.downcast_ref::<String>() {
                    msg.clone()
                } else {
                    "Unknown panic".to_string()
                };
                let err = ServerError::PanicError(panic_msg);
                let scope = ErrorScope {
                    method,
                    path: &path,
                    request_id: None,
                    ctx: None,
                };
                self.errors
                    .handle(&err, &scope)
                    .unwrap_or_else(|| Response::new(500))
            }
        };

        Self::write_response(&mut stream, &response).await
    }

    async fn write_response<S>(stream: &mut S, response: &Response) -> Result<(), std::io::Error>
    where
        S: AsyncWrite + Unpin,
    {
        let mut head = format!("HTTP/1.1 {}\r\n", response.status);
        for (name, value) in &response.headers {
            head += &format!("{}: {}\r\n", name, value);
        }
        for cookie in &response.set_cookies {
            head += &format!("Set-Cookie: {}\r\n", cookie);
        }
        head += &format!("Content-Length: {}\r\n\r\n", response.body_len());

        stream.write_all(head.as_bytes()).await?;
        match &response.raw_body {
            Some(bytes) => stream.write_all(bytes).await?,
            None => stream.write_all(response.body.as_bytes()).await?,
        }
        Ok(())
    }

    fn parse_query(query: &str) -> HashMap<String, String> {
        query
            .split('&')
            .filter(|s| !s.is_empty())
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                let key_decoded = key.replace('+', " ");
                let value_decoded = value.replace('+', " ");
                let key = urlencoding::decode(&key_decoded).ok()?;
                let value = urlencoding::decode(&value_decoded).ok()?;
                Some((key.into_owned(), value.into_owned()))
            })
            .collect()
    }

    // -- dispatch -----------------------------------------------------------

    /// Dispatches one parsed request to a response. Public so the pipeline
    /// can be driven without a socket, which is also how the tests use it.
    pub async fn handle_request(&self, mut req: Request) -> Response {
        req.plugins = self.plugins.clone();
        req.parse_body();

        if self.config.use_context {
            self.dispatch_context(req).await
        } else {
            self.dispatch_legacy(req).await
        }
    }

    async fn dispatch_context(&self, mut req: Request) -> Response {
        // Both pre-request hook flavors fire in context mode, by design.
        self.hooks.run_request_hooks(&mut req);
        let ctx = Context::new(req, self.sessions.clone());
        self.hooks.run_context_hooks(&ctx);

        if let Some(statics) = &self.statics {
            if let Some(response) = statics.handle(ctx.path()) {
                return response;
            }
        }

        let app = self.clone();
        let terminal: Arc<dyn ContextHandler> = Arc::new(move |ctx: Context| {
            let app = app.clone();
            async move { app.route_stage(ctx).await }
        });

        if let Err(err) = self.engine.execute(ctx.clone(), terminal).await {
            // The engine already wrote its fallback; the pipeline still
            // observes the failure and the sent guard keeps it single-send.
            let scope = ErrorScope {
                method: ctx.method(),
                path: ctx.path(),
                request_id: Some(ctx.request_id()),
                ctx: Some(&ctx),
            };
            if let Some(response) = self.errors.handle(&err, &scope) {
                ctx.install_response(response);
            }
        }

        let mut response = ctx.take_response();
        self.hooks.run_response_hooks(&mut response);
        response
    }

    /// Terminal stage of the global chain: route lookup, param merge, route
    /// middleware, handler. Handler errors are funneled to the error
    /// pipeline here so custom handlers see them before any fallback.
    async fn route_stage(&self, ctx: Context) -> ChainResult {
        let Some(RouteMatch { route, params }) = self.router.match_route(ctx.method(), ctx.path())
        else {
            tracing::debug!(method = %ctx.method(), path = %ctx.path(), "no route matched");
            ctx.status(404).json(&json!({
                "error": "Not Found",
                "message": format!("Cannot {} {}", ctx.method(), ctx.path()),
                "statusCode": 404,
            }))?;
            return Ok(());
        };

        ctx.merge_params(params);
        self.hooks.run_route_hooks(route.pattern());

        let handler = route.handler.clone();
        let terminal: Arc<dyn ContextHandler> = Arc::new(move |ctx: Context| {
            let handler = handler.clone();
            async move { invoke_handler(handler, ctx).await }
        });

        let next = Next::chain(route.middlewares.clone(), terminal);
        if let Err(err) = next.run(ctx.clone()).await {
            let scope = ErrorScope {
                method: ctx.method(),
                path: ctx.path(),
                request_id: Some(ctx.request_id()),
                ctx: Some(&ctx),
            };
            if let Some(response) = self.errors.handle(&err, &scope) {
                ctx.install_response(response);
            }
        }
        Ok(())
    }

    async fn dispatch_legacy(&self, mut req: Request) -> Response {
        self.hooks.run_request_hooks(&mut req);

        if let Some(statics) = &self.statics {
            if let Some(response) = statics.handle(&req.path) {
                return response;
            }
        }

        let method = req.method;
        let path = req.path.clone();

        let mut response = match self.run_legacy(req).await {
            Ok(response) => response,
            Err(err) => {
                let scope = ErrorScope {
                    method,
                    path: &path,
                    request_id: None,
                    ctx: None,
                };
                self.errors
                    .handle(&err, &scope)
                    .unwrap_or_else(|| Response::new(500))
            }
        };

        self.hooks.run_response_hooks(&mut response);
        response
    }

    async fn run_legacy(&self, mut req: Request) -> ServerResult<Response> {
        let Some(RouteMatch { route, params }) = self.router.match_route(req.method, &req.path)
        else {
            // Routing misses never reach the error pipeline.
            return Ok(not_found_response(req.method, &req.path));
        };

        req.params.extend(params);
        self.hooks.run_route_hooks(route.pattern());

        let RouteHandler::Legacy(handler) = route.handler.clone() else {
            return Err(ServerError::InternalError(
                "route requires context mode, which is disabled".to_string(),
            ));
        };

        route
            .legacy_chain
            .call(req, LegacyNext::new_handler(handler))
            .await
    }
}

async fn invoke_handler(handler: RouteHandler, ctx: Context) -> ChainResult {
    match handler {
        RouteHandler::Context(handler) => handler.handle(ctx).await,
        RouteHandler::Legacy(handler) => {
            // Legacy handlers consume a request snapshot carrying the merged
            // params; their returned response lands in the shared slot.
            let mut req = ctx.request().clone();
            req.params = ctx.params();
            let response = handler.handle(req).await?;
            ctx.install_response(response);
            Ok(())
        }
    }
}

fn not_found_response(method: Method, path: &str) -> Response {
    let mut response = Response::new(404);
    response
        .json(&json!({
            "error": "Not Found",
            "message": format!("Cannot {} {}", method, path),
            "statusCode": 404,
        }))
        .expect("Error creating JSON response");
    response
}
