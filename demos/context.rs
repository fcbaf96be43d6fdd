//! Context features: params, query, state, sessions, error helpers.

use rill::app::Application;
use rill::{Context, Request, Response};

fn main() {
    let mut app = Application::new();
    app.session_secret("change-me-in-production");

    // Path params and chained status.
    app.get("/users/:id", |ctx: Context| async move {
        let id = ctx.param("id").unwrap_or_default();
        ctx.assert(id != "0", 400, "id must be positive")?;
        ctx.status(200).json(&rill::json!({ "id": id }))
    });

    // Session round-trip.
    app.post("/login", |ctx: Context| async move {
        let name = ctx
            .body()
            .and_then(|b| b.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        ctx.assert(name.is_some(), 400, "name is required")?;
        ctx.session().set("user", name.unwrap());
        ctx.session().save();
        ctx.json(&rill::json!({ "ok": true }))
    });

    app.get("/whoami", |ctx: Context| async move {
        match ctx.session().get("user") {
            Some(user) => ctx.json(&rill::json!({ "user": user })),
            None => ctx.throw(401, "not logged in"),
        }
    });

    // Legacy handlers coexist with context handlers.
    app.get("/legacy", |_req: Request| async move {
        Ok(Response::text("registered the old way"))
    });

    app.listen("127.0.0.1:3000").expect("Server failed to start");
}
