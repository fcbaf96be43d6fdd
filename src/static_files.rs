//! Static file serving.
//!
//! A returned `Some(response)` means the request is fully handled and
//! dispatch stops; `None` hands the request back to routing.

use crate::http::Response;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Clone)]
pub struct StaticServer {
    root: PathBuf,
}

impl StaticServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Serves the file at `path` under the configured root, or `None` when
    /// the path escapes the root or is not a regular file.
    pub fn handle(&self, path: &str) -> Option<Response> {
        let file_path = self.root.join(path.trim_start_matches('/'));
        let canonical_path = fs::canonicalize(&file_path).ok()?;
        if !canonical_path.starts_with(fs::canonicalize(&self.root).ok()?)
            || !canonical_path.is_file()
        {
            return None;
        }
        self.serve_file(&canonical_path)
    }

    fn serve_file(&self, path: &Path) -> Option<Response> {
        let contents = fs::read(path).ok()?;
        let mut response = Response::new(200);

        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            let content_type = match ext {
                "html" => "text/html",
                "css" => "text/css",
                "js" => "text/javascript",
                "json" => "application/json",
                "png" => "image/png",
                "jpg" | "jpeg" => "image/jpeg",
                "gif" => "image/gif",
                "svg" => "image/svg+xml",
                "ico" => "image/x-icon",
                "txt" => "text/plain",
                _ => "application/octet-stream",
            };
            response.header("Content-Type", content_type);
        }

        response.header("Cache-Control", "public, max-age=31536000");

        if let Ok(metadata) = fs::metadata(path) {
            if let Ok(modified) = metadata.modified() {
                if let Ok(duration) = modified.duration_since(SystemTime::UNIX_EPOCH) {
                    response.header(
                        "Last-Modified",
                        &httpdate::fmt_http_date(std::time::UNIX_EPOCH + duration),
                    );
                }
            }

            // Size + mtime makes a good-enough validator.
            let etag = format!(
                "\"{}-{}\"",
                metadata.len(),
                metadata
                    .modified()
                    .ok()
                    .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0)
            );
            response.header("ETag", &etag);
        }

        response.raw_body = Some(contents);
        Some(response)
    }
}
