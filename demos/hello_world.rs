//! Minimal Rill application.

use rill::app::Application;
use rill::Context;

fn main() {
    let mut app = Application::new();

    app.get("/", |ctx: Context| async move {
        ctx.json(&rill::json!({
            "message": "Hello, World!"
        }))
    });

    app.listen("127.0.0.1:3000").expect("Server failed to start");
}
