//! # Rill
//!
//! A minimalist web framework: Express-style routing with path parameters, a
//! composable middleware pipeline, and a per-request [`Context`] that threads
//! params, session, cookies and free-form state through middleware into the
//! handler.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rill::app::Application;
//! use rill::Context;
//!
//! fn main() {
//!     let mut app = Application::new();
//!
//!     app.get("/hello/:name", |ctx: Context| async move {
//!         let name = ctx.param("name").unwrap_or_default();
//!         ctx.json(&rill::json!({ "greeting": format!("Hello, {name}!") }))
//!     });
//!
//!     app.listen("127.0.0.1:3000").unwrap();
//! }
//! ```
//!
//! ## Middleware
//!
//! Middleware comes in two calling conventions that coexist: context-style
//! (`handle(ctx, next)`, the native shape of the engine) and the legacy
//! request-style chain. See the [`middleware`] module.

pub mod app;
pub mod cache;
pub mod context;
pub mod discover;
pub mod error;
pub mod error_handler;
pub mod handler;
pub mod http;
pub mod middleware;
pub mod plugins;
pub mod router;
pub mod static_files;
pub mod view;
pub extern crate serde_json;

pub use app::Application;
pub use context::Context;
pub use error::{ServerError, ServerResult};
pub use http::{Method, Request, Response};
pub use router::Router;

// Reexport serde_json
pub use serde_json::{json, Value};
