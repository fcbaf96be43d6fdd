//! File-based route discovery.
//!
//! Walks a routes directory and converts file paths into ordinary route
//! patterns, which are then registered through the normal [`Router`] API;
//! the router itself has no awareness of files. Naming convention, relative
//! to the routes directory:
//!
//! - `index.*`          -> the directory's own path
//! - `about.*`          -> `/about`
//! - `[id].*`           -> `/:id`
//! - `[...slug].*`      -> `/*slug` (matched literally by the core router;
//!   a warning is logged when one is discovered)
//! - `create.post.*`    -> method POST (same for `put`, `patch`, `delete`)

use crate::handler::RouteHandler;
use crate::http::Method;
use crate::router::{MethodRule, Router};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DiscoveredRoute {
    pub method: Method,
    pub pattern: String,
    pub source: PathBuf,
}

#[derive(Clone, Default)]
pub struct FileRouter {
    routes: Vec<DiscoveredRoute>,
}

impl FileRouter {
    /// Scans `dir` recursively. Files are visited in sorted order so the
    /// resulting registration order is stable across platforms.
    pub fn scan(dir: impl AsRef<Path>) -> FileRouter {
        let mut routes = Vec::new();
        walk(dir.as_ref(), "", &mut routes);
        routes.sort_by(|a, b| a.pattern.cmp(&b.pattern));
        FileRouter { routes }
    }

    /// Discovered routes, for introspection.
    pub fn get_routes(&self) -> &[DiscoveredRoute] {
        &self.routes
    }

    /// Registers every discovered route the resolver can supply a handler
    /// for; unresolved entries are skipped with a debug trace.
    pub fn apply<F>(&self, router: &mut Router, resolve: F)
    where
        F: Fn(&DiscoveredRoute) -> Option<RouteHandler>,
    {
        for discovered in &self.routes {
            match resolve(discovered) {
                Some(handler) => {
                    router.route_with(
                        MethodRule::Exact(discovered.method),
                        &discovered.pattern,
                        Vec::new(),
                        handler,
                    );
                }
                None => {
                    tracing::debug!(pattern = %discovered.pattern, "no handler resolved, skipped");
                }
            }
        }
    }
}

fn walk(dir: &Path, prefix: &str, routes: &mut Vec<DiscoveredRoute>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if path.is_dir() {
            let segment = convert_segment(name, &path);
            walk(&path, &format!("{}/{}", prefix, segment), routes);
        } else {
            let (stem, method) = split_method(name);
            let pattern = if stem == "index" {
                let p = prefix.to_string();
                if p.is_empty() {
                    "/".to_string()
                } else {
                    p
                }
            } else {
                format!("{}/{}", prefix, convert_segment(&stem, &path))
            };
            routes.push(DiscoveredRoute {
                method,
                pattern,
                source: path,
            });
        }
    }
}

/// `[id]` -> `:id`, `[...slug]` -> `*slug`, anything else stays literal.
fn convert_segment(segment: &str, source: &Path) -> String {
    if let Some(inner) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        if let Some(rest) = inner.strip_prefix("...") {
            tracing::warn!(
                source = %source.display(),
                "catch-all segment *{} is matched literally by the router",
                rest
            );
            return format!("*{}", rest);
        }
        return format!(":{}", inner);
    }
    segment.to_string()
}

/// Splits a trailing method suffix off a file stem: `create.post` -> POST.
fn split_method(stem: &str) -> (String, Method) {
    if let Some((base, suffix)) = stem.rsplit_once('.') {
        let method = match suffix {
            "get" => Some(Method::GET),
            "post" => Some(Method::POST),
            "put" => Some(Method::PUT),
            "patch" => Some(Method::PATCH),
            "delete" => Some(Method::DELETE),
            _ => None,
        };
        if let Some(method) = method {
            return (base.to_string(), method);
        }
    }
    (stem.to_string(), Method::GET)
}
