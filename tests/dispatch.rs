//! End-to-end dispatch tests, driving the pipeline without a socket.

use rill::app::Application;
use rill::context::{Context, SessionStore};
use rill::error::ServerError;
use rill::handler::ChainResult;
use rill::http::{Body, Method, Request, Response};
use rill::middleware::{Middleware, Next, ResponseTime};
use rill::plugins::Plugin;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn get(path: &str) -> Request {
    Request::new(Method::GET, path)
}

fn body_json(response: &Response) -> Value {
    serde_json::from_str(&response.body).unwrap()
}

#[tokio::test]
async fn params_reach_context_handlers() {
    let mut app = Application::new();
    app.get("/users/:id", |ctx: Context| async move {
        let id = ctx.param("id").unwrap();
        ctx.json(&rill::json!({ "id": id }))
    });

    let response = app.handle_request(get("/users/42")).await;
    assert_eq!(response.status, 200);
    assert_eq!(body_json(&response)["id"], "42");
}

#[tokio::test]
async fn first_registered_route_wins_end_to_end() {
    let mut app = Application::new();
    app.get("/users/:id", |ctx: Context| async move {
        ctx.json(&rill::json!({ "route": "param", "id": ctx.param("id") }))
    });
    app.get("/users/active", |ctx: Context| async move {
        ctx.json(&rill::json!({ "route": "literal" }))
    });

    let response = app.handle_request(get("/users/active")).await;
    let body = body_json(&response);
    assert_eq!(body["route"], "param");
    assert_eq!(body["id"], "active");
}

#[tokio::test]
async fn unmatched_paths_get_the_structured_404() {
    let app = Application::new();
    let response = app.handle_request(get("/nope")).await;

    assert_eq!(response.status, 404);
    let body = body_json(&response);
    assert_eq!(body["error"], "Not Found");
    assert_eq!(body["message"], "Cannot GET /nope");
    assert_eq!(body["statusCode"], 404);
}

#[tokio::test]
async fn handler_errors_fall_back_to_a_500_json_body() {
    let mut app = Application::new();
    app.get("/explode", |_ctx: Context| async move {
        Err(ServerError::InternalError("kaput".to_string()))
    });

    let response = app.handle_request(get("/explode")).await;
    assert_eq!(response.status, 500);
    let body = body_json(&response);
    assert_eq!(body["success"], false);
    assert_eq!(body["statusCode"], 500);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn thrown_aborts_keep_their_status() {
    let mut app = Application::new();
    app.get("/teapot", |ctx: Context| async move { ctx.throw(418, "short and stout") });

    let response = app.handle_request(get("/teapot")).await;
    assert_eq!(response.status, 418);
    assert_eq!(body_json(&response)["success"], false);
}

#[tokio::test]
async fn custom_error_handlers_run_before_the_default() {
    let mut app = Application::new();
    app.get("/explode", |_ctx: Context| async move {
        Err(ServerError::InternalError("kaput".to_string()))
    });
    app.on_error(|_err, _scope| Some(Response::text("custom page")));

    let response = app.handle_request(get("/explode")).await;
    assert_eq!(response.body, "custom page");
}

struct StateStamp;

impl Middleware for StateStamp {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, ChainResult> {
        Box::pin(async move {
            ctx.set_state("stamped", true);
            next.run(ctx).await
        })
    }
}

#[tokio::test]
async fn middleware_state_reaches_the_handler() {
    let mut app = Application::new();
    app.middleware(StateStamp);
    app.get("/check", |ctx: Context| async move {
        let stamped = ctx.state("stamped").is_some();
        ctx.json(&rill::json!({ "stamped": stamped }))
    });

    let response = app.handle_request(get("/check")).await;
    assert_eq!(body_json(&response)["stamped"], true);
}

#[tokio::test]
async fn response_time_header_wraps_the_whole_chain() {
    let mut app = Application::new();
    app.middleware(ResponseTime);
    app.get("/slow", |ctx: Context| async move {
        tokio::time::sleep(Duration::from_millis(2)).await;
        ctx.text("done")
    });

    let response = app.handle_request(get("/slow")).await;
    assert!(response.headers.get("X-Response-Time").unwrap().ends_with("ms"));
}

struct Deny;

impl Middleware for Deny {
    fn handle(&self, ctx: Context, _next: Next) -> BoxFuture<'static, ChainResult> {
        Box::pin(async move {
            ctx.status(401).json(&rill::json!({ "error": "denied" }))
        })
    }
}

#[tokio::test]
async fn short_circuiting_middleware_skips_the_handler() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_in_handler = Arc::clone(&hits);

    let mut app = Application::new();
    app.middleware_at("/private", Deny);
    app.get("/private/data", move |ctx: Context| {
        let hits = Arc::clone(&hits_in_handler);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            ctx.text("secret")
        }
    });

    let response = app.handle_request(get("/private/data")).await;
    assert_eq!(response.status, 401);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sessions_survive_across_requests() {
    let store = SessionStore::new("integration secret", Duration::from_secs(60));
    let mut app = Application::new();
    app.session_store(store);
    app.get("/login", |ctx: Context| async move {
        ctx.session().set("user", "ada");
        ctx.session().save();
        ctx.text("welcome")
    });
    app.get("/whoami", |ctx: Context| async move {
        let user = ctx.session().get("user").unwrap_or(Value::Null);
        ctx.json(&rill::json!({ "user": user }))
    });

    let response = app.handle_request(get("/login")).await;
    let cookie_line = response.set_cookies.first().unwrap().clone();
    let cookie_pair = cookie_line.split(';').next().unwrap().to_string();

    let mut next_req = get("/whoami");
    next_req
        .headers
        .insert("cookie".to_string(), cookie_pair.clone());
    let response = app.handle_request(next_req).await;
    assert_eq!(body_json(&response)["user"], "ada");

    // A tampered cookie silently gets a fresh, empty session.
    let mut tampered = cookie_pair;
    let flipped = if tampered.ends_with('0') { '1' } else { '0' };
    tampered.pop();
    tampered.push(flipped);
    let mut bad_req = get("/whoami");
    bad_req.headers.insert("cookie".to_string(), tampered);
    let response = app.handle_request(bad_req).await;
    assert_eq!(body_json(&response)["user"], Value::Null);
}

#[tokio::test]
async fn posted_json_is_parsed_before_the_handler() {
    let mut app = Application::new();
    app.post("/things", |ctx: Context| async move {
        let name = ctx
            .body()
            .and_then(|b| b.get("name"))
            .cloned()
            .unwrap_or(Value::Null);
        ctx.status(201).json(&rill::json!({ "created": name }))
    });

    let mut req = Request::new(Method::POST, "/things");
    req.body = Body::with_content_type("application/json", br#"{"name":"widget"}"#.to_vec());
    let response = app.handle_request(req).await;
    assert_eq!(response.status, 201);
    assert_eq!(body_json(&response)["created"], "widget");
}

#[tokio::test]
async fn legacy_mode_serves_legacy_routes() {
    let mut app = Application::new();
    app.use_context(false);
    app.get("/old", |req: Request| async move {
        Ok(Response::text(format!("legacy {}", req.path)))
    });

    let response = app.handle_request(get("/old")).await;
    assert_eq!(response.body, "legacy /old");

    // Routing miss keeps the same structured 404 in legacy mode.
    let response = app.handle_request(get("/nope")).await;
    assert_eq!(response.status, 404);
    assert_eq!(body_json(&response)["message"], "Cannot GET /nope");
}

#[tokio::test]
async fn context_routes_error_cleanly_when_context_mode_is_off() {
    let mut app = Application::new();
    app.use_context(false);
    app.get("/modern", |ctx: Context| async move { ctx.text("hi") });

    let response = app.handle_request(get("/modern")).await;
    assert_eq!(response.status, 500);
}

#[tokio::test]
async fn legacy_handlers_participate_in_context_mode() {
    let mut app = Application::new();
    app.get("/mixed/:id", |req: Request| async move {
        Ok(Response::text(format!(
            "id={}",
            req.params.get("id").cloned().unwrap_or_default()
        )))
    });

    let response = app.handle_request(get("/mixed/9")).await;
    assert_eq!(response.body, "id=9");
}

struct HookCounter {
    requests: Arc<AtomicUsize>,
    contexts: Arc<AtomicUsize>,
    responses: Arc<AtomicUsize>,
}

impl Plugin for HookCounter {
    fn name(&self) -> &str {
        "hook-counter"
    }

    fn on_request(&self, _req: &mut Request) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn on_context(&self, _ctx: &Context) {
        self.contexts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_response(&self, _response: &mut Response) {
        self.responses.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn both_pre_request_hook_flavors_fire_in_context_mode() {
    let requests = Arc::new(AtomicUsize::new(0));
    let contexts = Arc::new(AtomicUsize::new(0));
    let responses = Arc::new(AtomicUsize::new(0));

    let mut app = Application::new();
    app.register_plugin(HookCounter {
        requests: Arc::clone(&requests),
        contexts: Arc::clone(&contexts),
        responses: Arc::clone(&responses),
    })
    .unwrap();
    app.get("/", |ctx: Context| async move { ctx.text("ok") });

    app.handle_request(get("/")).await;
    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert_eq!(contexts.load(Ordering::SeqCst), 1);
    assert_eq!(responses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn query_strings_are_url_decoded() {
    let mut app = Application::new();
    app.get("/search", |ctx: Context| async move {
        ctx.json(&rill::json!({ "q": ctx.query("q") }))
    });

    let mut req = get("/search");
    req.query.insert("q".to_string(), "hello world".to_string());
    let response = app.handle_request(req).await;
    assert_eq!(body_json(&response)["q"], "hello world");
}

#[tokio::test]
async fn encoded_path_segments_decode_into_params() {
    let mut app = Application::new();
    app.get("/search/:q", |ctx: Context| async move {
        ctx.json(&rill::json!({ "q": ctx.param("q") }))
    });

    let response = app.handle_request(get("/search/hello%20world")).await;
    assert_eq!(body_json(&response)["q"], "hello world");
}
