use crate::context::Context;
use crate::handler::ChainResult;
use crate::middleware::{Middleware, Next};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use futures::future::BoxFuture;
use std::io::Write;

#[derive(Clone)]
pub struct CompressionConfig {
    pub level: Compression,
    pub min_size: usize,
    pub skip_types: Vec<String>,
}

impl CompressionConfig {
    fn should_compress(&self, content_type: Option<&str>, content_length: usize) -> bool {
        if content_length < self.min_size {
            return false;
        }
        if let Some(ct) = content_type {
            for skip_type in &self.skip_types {
                if ct.starts_with(skip_type) {
                    return false;
                }
            }
        }
        true
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: Compression::default(),
            min_size: 1024,
            skip_types: vec![
                "image/".to_string(),
                "video/".to_string(),
                "audio/".to_string(),
                "application/pdf".to_string(),
                "application/zip".to_string(),
            ],
        }
    }
}

/// Compresses the finished response body when the client accepts it.
/// Compressed bytes go into `raw_body` so they are written byte-exact.
pub struct CompressionMiddleware {
    config: CompressionConfig,
}

impl CompressionMiddleware {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }
}

impl Middleware for CompressionMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, ChainResult> {
        let config = self.config.clone();
        Box::pin(async move {
            let accept_encoding = ctx.header("accept-encoding").map(|h| h.to_lowercase());

            next.run(ctx.clone()).await?;

            let Some(accepted) = accept_encoding else {
                return Ok(());
            };

            ctx.with_response(|response| {
                if response.raw_body.is_some() {
                    return;
                }
                let content_type = response.headers.get("Content-Type").cloned();
                if !config.should_compress(content_type.as_deref(), response.body.len()) {
                    return;
                }

                let encoded = if accepted.contains("gzip") {
                    let mut encoder = GzEncoder::new(Vec::new(), config.level);
                    encoder
                        .write_all(response.body.as_bytes())
                        .and_then(|_| encoder.finish())
                        .ok()
                        .map(|bytes| ("gzip", bytes))
                } else if accepted.contains("deflate") {
                    let mut encoder = DeflateEncoder::new(Vec::new(), config.level);
                    encoder
                        .write_all(response.body.as_bytes())
                        .and_then(|_| encoder.finish())
                        .ok()
                        .map(|bytes| ("deflate", bytes))
                } else {
                    None
                };

                if let Some((encoding, bytes)) = encoded {
                    response.header("Content-Encoding", encoding);
                    response.vary(&["Accept-Encoding"]);
                    response.raw_body = Some(bytes);
                }
            });
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "compression"
    }
}
