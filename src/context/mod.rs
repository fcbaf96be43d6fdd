//! The per-request context.
//!
//! One [`Context`] is built for each inbound request after parsing, before
//! any middleware runs, and is dropped once the response is written. Clones
//! share the same interior, so middleware and the handler observe each
//! other's writes to `params`, the state bag, the session and the response
//! slot.

pub mod cookies;
pub mod session;

pub use cookies::{CookieOptions, Cookies};
pub use session::{Session, SessionStore};

use crate::error::ServerError;
use crate::handler::ChainResult;
use crate::http::{Method, Request, Response};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

struct ResponseSlot {
    response: Response,
    sent: bool,
}

#[derive(Clone)]
pub struct Context {
    req: Arc<Request>,
    res: Arc<Mutex<ResponseSlot>>,
    request_id: Arc<str>,
    method: Method,
    path: Arc<str>,
    url: Arc<str>,
    params: Arc<RwLock<HashMap<String, String>>>,
    query: Arc<HashMap<String, String>>,
    body: Arc<Option<Value>>,
    state: Arc<RwLock<HashMap<String, Value>>>,
    session: Session,
    cookies: Cookies,
}

fn base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn generate_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{}-{:06x}", base36(millis), rand::random::<u32>() & 0xff_ffff)
}

impl Context {
    /// Builds the context from an already-parsed request. `params`, `query`
    /// and `body_value` must be populated beforehand; route params are merged
    /// in later by the dispatcher.
    pub fn new(req: Request, sessions: SessionStore) -> Context {
        let method = req.method;
        let path = if req.path.is_empty() { "/" } else { &req.path }.to_string();
        let url = if req.url.is_empty() { &path } else { &req.url }.to_string();
        let params = req.params.clone();
        let query = req.query.clone();
        let body = req.body_value.clone();
        let request_id = generate_request_id();
        let cookies = Cookies::from_header(req.get_header("cookie"));
        let session = Session::from_cookies(sessions, cookies.clone());

        Context {
            req: Arc::new(req),
            res: Arc::new(Mutex::new(ResponseSlot {
                response: Response::new(200),
                sent: false,
            })),
            request_id: request_id.into(),
            method,
            path: path.into(),
            url: url.into(),
            params: Arc::new(RwLock::new(params)),
            query: Arc::new(query),
            body: Arc::new(body),
            state: Arc::new(RwLock::new(HashMap::new())),
            session,
            cookies,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn request(&self) -> &Request {
        &self.req
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.req.get_header(name).map(|v| v.to_string())
    }

    pub fn param(&self, name: &str) -> Option<String> {
        self.params.read().unwrap().get(name).cloned()
    }

    pub fn params(&self) -> HashMap<String, String> {
        self.params.read().unwrap().clone()
    }

    pub(crate) fn merge_params(&self, extracted: HashMap<String, String>) {
        self.params.write().unwrap().extend(extracted);
    }

    pub fn query(&self, name: &str) -> Option<String> {
        self.query.get(name).cloned()
    }

    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Content-type-driven parse of the request body, if any.
    pub fn body(&self) -> Option<&Value> {
        (*self.body).as_ref()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn cookies(&self) -> &Cookies {
        &self.cookies
    }

    /// Stores a value in the free-form state bag, the sanctioned channel for
    /// middleware-to-handler data passing.
    pub fn set_state<T: serde::Serialize>(&self, key: &str, value: T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.state.write().unwrap().insert(key.to_string(), value);
        }
    }

    pub fn state(&self, key: &str) -> Option<Value> {
        self.state.read().unwrap().get(key).cloned()
    }

    // -- response side ------------------------------------------------------

    /// Chainable status setter: `ctx.status(201).json(&body)?`.
    pub fn status(&self, status: u16) -> &Self {
        let mut slot = self.res.lock().unwrap();
        if !slot.sent {
            slot.response.status = status;
        }
        self
    }

    pub fn set_header(&self, name: &str, value: &str) -> &Self {
        let mut slot = self.res.lock().unwrap();
        slot.response.header(name, value);
        self
    }

    pub fn headers_sent(&self) -> bool {
        self.res.lock().unwrap().sent
    }

    pub fn json<T: serde::Serialize>(&self, value: &T) -> ChainResult {
        let body = serde_json::to_string(value)
            .map_err(|e| ServerError::InternalError(format!("JSON serialization error: {}", e)))?;
        self.finalize("application/json", body)
    }

    pub fn html<T: AsRef<str>>(&self, content: T) -> ChainResult {
        self.finalize("text/html", content.as_ref().to_string())
    }

    pub fn text<T: AsRef<str>>(&self, content: T) -> ChainResult {
        self.finalize("text/plain", content.as_ref().to_string())
    }

    /// Sends the body as-is, keeping whatever Content-Type was set.
    pub fn send<T: AsRef<str>>(&self, body: T) -> ChainResult {
        let mut slot = self.res.lock().unwrap();
        if slot.sent {
            tracing::debug!(request_id = %self.request_id, "response already sent, ignoring");
            return Ok(());
        }
        slot.response.body(body);
        slot.sent = true;
        Ok(())
    }

    pub fn redirect(&self, location: &str) -> ChainResult {
        let mut slot = self.res.lock().unwrap();
        if slot.sent {
            tracing::debug!(request_id = %self.request_id, "response already sent, ignoring");
            return Ok(());
        }
        slot.response.status = 302;
        slot.response.header("Location", location);
        slot.sent = true;
        Ok(())
    }

    fn finalize(&self, content_type: &str, body: String) -> ChainResult {
        let mut slot = self.res.lock().unwrap();
        if slot.sent {
            tracing::debug!(request_id = %self.request_id, "response already sent, ignoring");
            return Ok(());
        }
        slot.response.header("Content-Type", content_type);
        slot.response.body = body;
        slot.sent = true;
        Ok(())
    }

    /// Mutable access to the buffered response, for middleware that
    /// post-processes the finished body (compression, header stamping).
    pub fn with_response<F: FnOnce(&mut Response)>(&self, f: F) {
        let mut slot = self.res.lock().unwrap();
        f(&mut slot.response);
    }

    /// Replaces the accumulated response wholesale; no-op once sent. Used by
    /// the error layers, which must never double-send.
    pub(crate) fn install_response(&self, response: Response) {
        let mut slot = self.res.lock().unwrap();
        if slot.sent {
            return;
        }
        slot.response = response;
        slot.sent = true;
    }

    /// Extracts the response for writing, flushing pending cookies.
    pub(crate) fn take_response(&self) -> Response {
        let mut slot = self.res.lock().unwrap();
        let mut response = std::mem::replace(&mut slot.response, Response::new(200));
        response.set_cookies.extend(self.cookies.drain_pending());
        response
    }

    // -- error helpers ------------------------------------------------------

    /// Aborts the current handler with a status-carrying error:
    /// `return ctx.throw(403, "forbidden");`
    pub fn throw(&self, status: u16, message: impl Into<String>) -> ChainResult {
        Err(self.create_error(status, message))
    }

    /// Guard clause: errors with `status` unless `condition` holds.
    pub fn assert(&self, condition: bool, status: u16, message: impl Into<String>) -> ChainResult {
        if condition {
            Ok(())
        } else {
            self.throw(status, message)
        }
    }

    /// Builds the status-carrying error without raising it.
    pub fn create_error(&self, status: u16, message: impl Into<String>) -> ServerError {
        ServerError::Http {
            status,
            message: message.into(),
            request_id: Some(self.request_id.to_string()),
        }
    }
}
