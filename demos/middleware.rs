//! Middleware demo: the bundled kit plus a hand-written guard.

use futures::future::BoxFuture;
use rill::app::Application;
use rill::handler::ChainResult;
use rill::middleware::{Middleware, Next, RequestLogger, ResponseTime};
use rill::Context;

/// Rejects requests without a bearer token.
struct AuthGuard;

impl Middleware for AuthGuard {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, ChainResult> {
        Box::pin(async move {
            match ctx.header("authorization") {
                Some(token) if token.starts_with("Bearer ") => next.run(ctx).await,
                _ => ctx.throw(401, "Authentication required"),
            }
        })
    }

    fn name(&self) -> &str {
        "auth-guard"
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let mut app = Application::new();

    app.middleware(RequestLogger);
    app.middleware(ResponseTime);
    // Only paths under /api need a token.
    app.middleware_at("/api", AuthGuard);

    app.get("/public", |ctx: Context| async move {
        ctx.text("This is a public endpoint")
    });

    app.get("/api/profile", |ctx: Context| async move {
        ctx.json(&rill::json!({
            "name": "User",
            "email": "user@example.com"
        }))
    });

    app.listen("127.0.0.1:3000").expect("Server failed to start");
}
