//! Server-side sessions keyed by a signed cookie.
//!
//! Cookie value format: `"<timestamp>:<random-hex>.<signature>"` where the
//! signature is the first 16 hex characters of SHA-256 over the payload
//! concatenated with the store secret. An unverifiable or expired cookie is
//! treated as absent and a fresh session is allocated silently.

use crate::context::cookies::{CookieOptions, Cookies};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub(crate) const SESSION_COOKIE: &str = "sid";

/// Hex characters kept from the digest; enough to make forgery impractical
/// while keeping cookies short.
const SIGNATURE_LEN: usize = 16;

#[derive(Debug, Clone)]
pub(crate) struct SessionEntry {
    pub data: HashMap<String, Value>,
    pub expires: SystemTime,
}

/// Process-wide session store, constructed once by the application and
/// passed down to every context. Entries are only evicted on load of an
/// expired session, on [`destroy`](SessionStore::destroy), or by an explicit
/// [`cleanup`](SessionStore::cleanup) sweep.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    secret: String,
    ttl: Duration,
    entries: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                secret: secret.to_string(),
                ttl,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn sign(&self, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        hasher.update(self.inner.secret.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest.chars().take(SIGNATURE_LEN).collect()
    }

    pub(crate) fn new_id() -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        format!("{}:{:016x}", millis, rand::random::<u64>())
    }

    /// Session id -> signed cookie value.
    pub(crate) fn encode(&self, id: &str) -> String {
        format!("{}.{}", id, self.sign(id))
    }

    /// Signed cookie value -> session id, `None` on signature mismatch.
    pub(crate) fn decode(&self, cookie: &str) -> Option<String> {
        let (id, signature) = cookie.rsplit_once('.')?;
        if self.sign(id) == signature {
            Some(id.to_string())
        } else {
            None
        }
    }

    /// Loads session data; an expired entry is removed and reported absent.
    pub fn load(&self, id: &str) -> Option<HashMap<String, Value>> {
        let mut entries = self.inner.entries.lock().unwrap();
        match entries.get(id) {
            Some(entry) if entry.expires > SystemTime::now() => Some(entry.data.clone()),
            Some(_) => {
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    pub fn save(&self, id: &str, data: HashMap<String, Value>) {
        let entry = SessionEntry {
            data,
            expires: SystemTime::now() + self.inner.ttl,
        };
        self.inner.entries.lock().unwrap().insert(id.to_string(), entry);
    }

    pub fn destroy(&self, id: &str) {
        self.inner.entries.lock().unwrap().remove(id);
    }

    /// Explicit sweep of expired entries; nothing runs this in the
    /// background.
    pub fn cleanup(&self) {
        let now = SystemTime::now();
        self.inner
            .entries
            .lock()
            .unwrap()
            .retain(|_, entry| entry.expires > now);
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct SessionState {
    id: String,
    data: HashMap<String, Value>,
    is_new: bool,
}

/// Per-request session facade over the store. Mutations stay local until
/// [`save`](Session::save) persists them and queues the signed cookie.
#[derive(Clone)]
pub struct Session {
    store: SessionStore,
    cookies: Cookies,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    pub(crate) fn from_cookies(store: SessionStore, cookies: Cookies) -> Session {
        let loaded = cookies
            .get(SESSION_COOKIE)
            .and_then(|cookie| {
                let id = store.decode(&cookie);
                if id.is_none() {
                    tracing::warn!("session cookie failed signature verification");
                }
                id
            })
            .and_then(|id| store.load(&id).map(|data| (id, data)));

        let state = match loaded {
            Some((id, data)) => SessionState {
                id,
                data,
                is_new: false,
            },
            None => SessionState {
                id: SessionStore::new_id(),
                data: HashMap::new(),
                is_new: true,
            },
        };

        Session {
            store,
            cookies,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn id(&self) -> String {
        self.state.lock().unwrap().id.clone()
    }

    pub fn is_new(&self) -> bool {
        self.state.lock().unwrap().is_new
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().unwrap().data.get(key).cloned()
    }

    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.state.lock().unwrap().data.insert(key.to_string(), value);
        }
    }

    pub fn remove(&self, key: &str) {
        self.state.lock().unwrap().data.remove(key);
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().data.clear();
    }

    /// Persists the session and queues the signed cookie on the response.
    pub fn save(&self) {
        let (id, data) = {
            let state = self.state.lock().unwrap();
            (state.id.clone(), state.data.clone())
        };
        self.store.save(&id, data);
        self.cookies.set_with(
            SESSION_COOKIE,
            &self.store.encode(&id),
            &CookieOptions {
                http_only: true,
                ..CookieOptions::default()
            },
        );
    }

    /// Removes the stored entry and expires the cookie.
    pub fn destroy(&self) {
        let id = self.id();
        self.store.destroy(&id);
        self.cookies.remove(SESSION_COOKIE);
        let mut state = self.state.lock().unwrap();
        state.data.clear();
        state.id = SessionStore::new_id();
        state.is_new = true;
    }

    /// Fresh id, empty data; the old entry is dropped.
    pub fn regenerate(&self) {
        self.destroy();
    }
}
