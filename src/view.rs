//! Template rendering, reached only through the app-level `render` call,
//! never on the dispatch hot path.

use crate::cache::CacheManager;
use crate::error::{ServerError, ServerResult};
use futures::future::BoxFuture;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

pub trait ViewEngine: Send + Sync {
    fn render(&self, name: &str, data: &Value) -> BoxFuture<'static, ServerResult<String>>;
}

/// `{{ key }}` substitution over files in the views directory. Dotted keys
/// walk into nested objects. Template sources are cached.
pub struct SimpleTemplates {
    dir: PathBuf,
    extension: String,
    cache: CacheManager<String, String>,
}

impl SimpleTemplates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: "html".to_string(),
            cache: CacheManager::new(256, Duration::from_secs(300)),
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    fn lookup<'v>(data: &'v Value, key: &str) -> Option<&'v Value> {
        let mut current = data;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn substitute(template: &str, data: &Value) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let key = after[..end].trim();
                    match Self::lookup(data, key) {
                        Some(Value::String(s)) => out.push_str(s),
                        Some(value) => out.push_str(&value.to_string()),
                        None => {}
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl ViewEngine for SimpleTemplates {
    fn render(&self, name: &str, data: &Value) -> BoxFuture<'static, ServerResult<String>> {
        let dir = self.dir.clone();
        let extension = self.extension.clone();
        let cache = self.cache.clone();
        let name = name.to_string();
        let data = data.clone();
        Box::pin(async move {
            let source = match cache.get(&name).await {
                Some(source) => source,
                None => {
                    let path = dir.join(format!("{}.{}", name, extension));
                    let source = tokio::fs::read_to_string(&path).await.map_err(|err| {
                        ServerError::InternalError(format!(
                            "template {} not readable: {}",
                            name, err
                        ))
                    })?;
                    cache.set(name.clone(), source.clone()).await;
                    source
                }
            };
            Ok(Self::substitute(&source, &data))
        })
    }
}
