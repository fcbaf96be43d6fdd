use crate::error::{ServerError, ServerResult};
use serde::Serialize;
use std::collections::HashMap;

/// An outbound response under construction.
///
/// `headers` holds single-valued headers; `set_cookies` collects repeated
/// `Set-Cookie` lines; `raw_body` (when set) takes precedence over `body`
/// so compressed output is written byte-exact.
#[derive(Debug, Default)]
pub struct Response {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub set_cookies: Vec<String>,
    pub raw_body: Option<Vec<u8>>,
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            status,
            headers: HashMap::new(),
            body: String::new(),
            set_cookies: Vec::new(),
            raw_body: None,
        }
    }

    // Chainable status setter
    pub fn status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    // Generic body setter
    pub fn body<T: AsRef<str>>(&mut self, body: T) -> &mut Self {
        self.body = body.as_ref().to_string();
        self
    }

    // Generic header setter
    pub fn header<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) -> &mut Self {
        self.headers
            .insert(name.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    // Set multiple headers at once
    pub fn headers(&mut self, headers: HashMap<String, String>) -> &mut Self {
        self.headers.extend(headers);
        self
    }

    /// Appends a `Set-Cookie` line; repeated calls emit repeated headers.
    pub fn set_cookie<V: AsRef<str>>(&mut self, cookie: V) -> &mut Self {
        self.set_cookies.push(cookie.as_ref().to_string());
        self
    }

    pub fn json<T: Serialize>(&mut self, value: &T) -> ServerResult<&mut Self> {
        let json_string = serde_json::to_string(value)
            .map_err(|e| ServerError::InternalError(format!("JSON serialization error: {}", e)))?;
        self.header("Content-Type", "application/json");
        self.body(json_string);
        Ok(self)
    }

    // Static constructors for common responses
    pub fn ok<T: Serialize>(data: &T) -> ServerResult<Response> {
        let mut response = Response::new(200);
        response.json(data)?;
        Ok(response)
    }

    pub fn created<T: Serialize>(data: &T) -> ServerResult<Response> {
        let mut response = Response::new(201);
        response.json(data)?;
        Ok(response)
    }

    pub fn no_content() -> Response {
        Response::new(204)
    }

    pub fn not_found<T: Serialize>(data: &T) -> ServerResult<Response> {
        let mut response = Response::new(404);
        response.json(data)?;
        Ok(response)
    }

    pub fn text<T: AsRef<str>>(content: T) -> Response {
        let mut response = Response::new(200);
        response.header("Content-Type", "text/plain").body(content);
        response
    }

    pub fn html<T: AsRef<str>>(content: T) -> Response {
        let mut response = Response::new(200);
        response.header("Content-Type", "text/html").body(content);
        response
    }

    pub fn redirect(location: &str) -> Response {
        let mut response = Response::new(302);
        response.header("Location", location);
        response
    }

    pub fn permanent_redirect(location: &str) -> Response {
        let mut response = Response::new(301);
        response.header("Location", location);
        response
    }

    pub fn vary(&mut self, headers: &[&str]) -> &mut Self {
        self.header("Vary", headers.join(", "))
    }

    pub(crate) fn body_len(&self) -> usize {
        match &self.raw_body {
            Some(bytes) => bytes.len(),
            None => self.body.len(),
        }
    }
}

/// 200 response with an inline JSON body.
#[macro_export]
macro_rules! ok_json {
    ($($json:tt)+) => {{
        let mut response = $crate::http::Response::new(200);
        response.json(&$crate::json!($($json)+)).expect("Error creating JSON response");
        Ok(response)
    }};
}

/// 201 response with an inline JSON body.
#[macro_export]
macro_rules! created_json {
   ($($json:tt)+) => {{
        let mut response = $crate::http::Response::new(201);
        response.json(&$crate::json!($($json)+)).expect("Error creating JSON response");
        Ok(response)
    }};
}
