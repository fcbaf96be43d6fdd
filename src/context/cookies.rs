//! Cookie jar attached to each [`Context`](crate::context::Context).
//!
//! The `Cookie` request header is parsed eagerly at construction; writes are
//! collected as pending `Set-Cookie` lines and flushed onto the response when
//! the context is finalized, one header line per cookie.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub max_age: Option<i64>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            http_only: false,
            secure: false,
            max_age: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Cookies {
    jar: Arc<HashMap<String, String>>,
    pending: Arc<Mutex<Vec<String>>>,
}

impl Cookies {
    /// Parses a `Cookie` header value of the form `a=1; b=2`.
    pub fn from_header(header: Option<&str>) -> Self {
        let mut jar = HashMap::new();
        if let Some(raw) = header {
            for pair in raw.split(';') {
                if let Some((name, value)) = pair.split_once('=') {
                    jar.insert(name.trim().to_string(), value.trim().to_string());
                }
            }
        }
        Self {
            jar: Arc::new(jar),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.jar.get(name).cloned()
    }

    pub fn set(&self, name: &str, value: &str) {
        self.set_with(name, value, &CookieOptions::default());
    }

    pub fn set_with(&self, name: &str, value: &str, options: &CookieOptions) {
        let mut line = format!("{}={}; Path={}", name, value, options.path);
        if let Some(max_age) = options.max_age {
            line.push_str(&format!("; Max-Age={}", max_age));
        }
        if options.http_only {
            line.push_str("; HttpOnly");
        }
        if options.secure {
            line.push_str("; Secure");
        }
        self.pending.lock().unwrap().push(line);
    }

    /// Queues an expired cookie so the client drops it.
    pub fn remove(&self, name: &str) {
        self.pending
            .lock()
            .unwrap()
            .push(format!("{}=; Path=/; Max-Age=0", name));
    }

    pub(crate) fn drain_pending(&self) -> Vec<String> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }

    #[cfg(test)]
    pub(crate) fn pending_lines(&self) -> Vec<String> {
        self.pending.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_cookie_header() {
        let cookies = Cookies::from_header(Some("sid=abc; theme=dark"));
        assert_eq!(cookies.get("sid").unwrap(), "abc");
        assert_eq!(cookies.get("theme").unwrap(), "dark");
        assert!(cookies.get("missing").is_none());
    }

    #[test]
    fn writes_are_deferred_and_repeatable() {
        let cookies = Cookies::from_header(None);
        cookies.set("a", "1");
        cookies.set_with(
            "b",
            "2",
            &CookieOptions {
                http_only: true,
                max_age: Some(3600),
                ..CookieOptions::default()
            },
        );
        let lines = cookies.drain_pending();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "a=1; Path=/");
        assert!(lines[1].contains("HttpOnly"));
        assert!(lines[1].contains("Max-Age=3600"));
        // Drained means drained.
        assert!(cookies.drain_pending().is_empty());
    }

    #[test]
    fn remove_expires_the_cookie() {
        let cookies = Cookies::from_header(Some("sid=abc"));
        cookies.remove("sid");
        assert!(cookies.pending_lines()[0].contains("Max-Age=0"));
    }
}
