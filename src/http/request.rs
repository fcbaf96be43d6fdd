use crate::plugins::Plugins;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    CONNECT,
    OPTIONS,
    TRACE,
    PATCH,
}

impl Method {
    pub fn from_string(s: &str) -> Method {
        match s.to_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "CONNECT" => Method::CONNECT,
            "OPTIONS" => Method::OPTIONS,
            "TRACE" => Method::TRACE,
            "PATCH" => Method::PATCH,
            _ => Method::GET,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::CONNECT => "CONNECT",
            Method::OPTIONS => "OPTIONS",
            Method::TRACE => "TRACE",
            Method::PATCH => "PATCH",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw request body plus the Content-Type it arrived with.
#[derive(Debug, Clone)]
pub struct Body {
    pub(crate) content_type: String,
    pub(crate) data: Vec<u8>,
}

impl Body {
    pub fn new() -> Body {
        Body {
            content_type: String::new(),
            data: Vec::new(),
        }
    }

    pub fn from_string(s: &str) -> Body {
        Body {
            content_type: "text/plain".to_string(),
            data: s.as_bytes().to_vec(),
        }
    }

    pub fn from_bytes(b: Vec<u8>) -> Body {
        Body {
            content_type: "application/octet-stream".to_string(),
            data: b,
        }
    }

    pub fn with_content_type(content_type: &str, data: Vec<u8>) -> Body {
        Body {
            content_type: content_type.to_string(),
            data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.data).to_string()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Typed JSON accessor; `None` unless the Content-Type is JSON and the
    /// bytes deserialize into `T`.
    pub fn json<T>(&self) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        if self.content_type.starts_with("application/json") {
            serde_json::from_slice(&self.data).ok()
        } else {
            None
        }
    }

    pub fn form<T>(&self) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        if self.content_type.starts_with("application/x-www-form-urlencoded") {
            serde_json::from_value(Self::parse_urlencoded(&self.data)?).ok()
        } else {
            None
        }
    }

    /// Decodes `a=1&b=hello+world` into a flat JSON object. Pairs that fail
    /// percent-decoding are skipped.
    pub(crate) fn parse_urlencoded(data: &[u8]) -> Option<Value> {
        let data_str = String::from_utf8_lossy(data);
        let mut json = Map::new();

        for pair in data_str.split('&').filter(|s| !s.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key_decoded = key.replace('+', " ");
            let value_decoded = value.replace('+', " ");
            let key = urlencoding::decode(&key_decoded).ok()?;
            let value = urlencoding::decode(&value_decoded).ok()?;
            json.insert(key.into_owned(), Value::String(value.into_owned()));
        }

        Some(Value::Object(json))
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::new()
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Body {
        Body::from_bytes(b)
    }
}

/// A parsed inbound request. Built by the connection handler before dispatch;
/// `params` is filled in after route matching and `body_value` by
/// [`Request::parse_body`].
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    /// Original request target, including the query string.
    pub url: String,
    pub query: HashMap<String, String>,
    pub params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    /// Free-form per-request values, settable by legacy middleware.
    pub data: HashMap<String, Value>,
    pub body: Body,
    /// Content-type-driven parse of the body, populated for POST/PUT/PATCH.
    pub body_value: Option<Value>,
    pub plugins: Plugins,
}

impl Request {
    /// Bare request, mostly useful in tests and demos.
    pub fn new(method: Method, path: &str) -> Request {
        Request {
            method,
            path: path.to_string(),
            url: path.to_string(),
            query: HashMap::new(),
            params: HashMap::new(),
            headers: HashMap::new(),
            data: HashMap::new(),
            body: Body::new(),
            body_value: None,
            plugins: Plugins::new(),
        }
    }

    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_lowercase()).map(|v| v.as_str())
    }

    pub fn get_method(&self) -> &Method {
        &self.method
    }

    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set_data<T>(&mut self, key: &str, value: T)
    where
        T: serde::Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), value);
        }
    }

    pub fn get_typed_data<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.to_owned()).ok())
    }

    /// Populates `body_value` for body-carrying methods. JSON and form bodies
    /// are parsed into structured values; anything else keeps the raw string.
    pub fn parse_body(&mut self) {
        if !matches!(self.method, Method::POST | Method::PUT | Method::PATCH) {
            return;
        }
        if self.body.is_empty() {
            return;
        }

        let content_type = self.body.content_type.clone();
        self.body_value = if content_type.starts_with("application/json") {
            serde_json::from_slice(self.body.as_bytes()).ok()
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            Body::parse_urlencoded(self.body.as_bytes())
        } else {
            Some(Value::String(self.body.as_string()))
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Login {
        user: String,
        pass: String,
    }

    #[test]
    fn typed_json_accessor_checks_content_type() {
        let body = Body::with_content_type(
            "application/json",
            br#"{"user":"ada","pass":"s3cret"}"#.to_vec(),
        );
        let login: Login = body.json().unwrap();
        assert_eq!(login.user, "ada");

        let not_json = Body::from_string(r#"{"user":"ada","pass":"x"}"#);
        assert!(not_json.json::<Login>().is_none());
    }

    #[test]
    fn form_bodies_decode_plus_and_percent() {
        let body = Body::with_content_type(
            "application/x-www-form-urlencoded",
            b"user=ada+lovelace&pass=p%40ss".to_vec(),
        );
        let value = Body::parse_urlencoded(body.as_bytes()).unwrap();
        assert_eq!(value["user"], "ada lovelace");
        assert_eq!(value["pass"], "p@ss");
    }

    #[test]
    fn parse_body_is_content_type_driven() {
        let mut req = Request::new(Method::POST, "/things");
        req.body = Body::with_content_type("application/json", br#"{"n":1}"#.to_vec());
        req.parse_body();
        assert_eq!(req.body_value.as_ref().unwrap()["n"], 1);

        let mut req = Request::new(Method::POST, "/things");
        req.body = Body::with_content_type("text/csv", b"a,b,c".to_vec());
        req.parse_body();
        assert_eq!(req.body_value, Some(Value::String("a,b,c".into())));
    }

    #[test]
    fn parse_body_skips_bodyless_methods() {
        let mut req = Request::new(Method::GET, "/things");
        req.body = Body::with_content_type("application/json", br#"{"n":1}"#.to_vec());
        req.parse_body();
        assert!(req.body_value.is_none());
    }

    #[test]
    fn unknown_method_tokens_default_to_get() {
        assert_eq!(Method::from_string("BREW"), Method::GET);
        assert_eq!(Method::from_string("post"), Method::POST);
    }
}
