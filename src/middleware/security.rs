use crate::context::Context;
use crate::error::ServerError;
use crate::handler::ChainResult;
use crate::http::Method;
use crate::middleware::{Middleware, Next};
use futures::future::BoxFuture;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct SecurityConfig {
    pub hsts: bool,
    pub xss_protection: bool,
    pub content_type_options: bool,
    pub frame_options: Option<String>,
    pub content_security_policy: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            hsts: true,
            xss_protection: true,
            content_type_options: true,
            frame_options: Some("DENY".to_string()),
            content_security_policy: None,
        }
    }
}

/// Stamps the usual security headers on every response.
pub struct SecurityHeaders {
    config: SecurityConfig,
}

impl SecurityHeaders {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }
}

impl Middleware for SecurityHeaders {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, ChainResult> {
        let config = self.config.clone();
        Box::pin(async move {
            next.run(ctx.clone()).await?;
            ctx.with_response(|response| {
                if config.hsts {
                    response.header("Strict-Transport-Security", "max-age=31536000");
                }
                if config.xss_protection {
                    response.header("X-XSS-Protection", "1; mode=block");
                }
                if config.content_type_options {
                    response.header("X-Content-Type-Options", "nosniff");
                }
                if let Some(frame_options) = &config.frame_options {
                    response.header("X-Frame-Options", frame_options);
                }
                if let Some(csp) = &config.content_security_policy {
                    response.header("Content-Security-Policy", csp);
                }
            });
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "security-headers"
    }
}

#[derive(Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 10,
        }
    }
}

lazy_static! {
    // Request log keyed by (client IP, path), shared process-wide.
    static ref REQUESTS: Arc<Mutex<HashMap<(String, String), Vec<Instant>>>> =
        Arc::new(Mutex::new(HashMap::new()));
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    async fn is_allowed(&self, client_ip: &str, path: &str) -> bool {
        let mut requests = REQUESTS.lock().await;
        let now = Instant::now();
        let minute_ago = now - Duration::from_secs(60);
        let key = (client_ip.to_string(), path.to_string());

        if let Some(times) = requests.get_mut(&key) {
            times.retain(|&time| time > minute_ago);

            if times.len() >= self.config.burst_size as usize {
                return false;
            }
            if times.len() as u32 >= self.config.requests_per_minute {
                return false;
            }
            times.push(now);
        } else {
            requests.insert(key, vec![now]);
        }

        true
    }
}

impl Middleware for RateLimiter {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, ChainResult> {
        let limiter = self.clone();
        Box::pin(async move {
            let client_ip = ctx
                .header("x-forwarded-for")
                .or_else(|| ctx.header("x-real-ip"))
                .unwrap_or_else(|| "unknown".to_string());

            if limiter.is_allowed(&client_ip, ctx.path()).await {
                next.run(ctx).await
            } else {
                Err(ServerError::TooManyRequests)
            }
        })
    }

    fn name(&self) -> &str {
        "rate-limiter"
    }
}

#[derive(Clone)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Option<u32>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "DELETE".to_string(),
                "OPTIONS".to_string(),
            ],
            allow_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            allow_credentials: false,
            max_age: Some(86400),
        }
    }
}

pub struct Cors {
    config: CorsConfig,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    fn origin_allowed(config: &CorsConfig, origin: &str) -> bool {
        config.allow_origins.iter().any(|o| o == "*" || o == origin)
    }
}

impl Middleware for Cors {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, ChainResult> {
        let config = self.config.clone();
        Box::pin(async move {
            let origin = ctx.header("origin");

            // Preflight requests are answered here and never reach the
            // handler.
            if ctx.method() == Method::OPTIONS {
                ctx.status(204);
                if let Some(origin) = &origin {
                    if Cors::origin_allowed(&config, origin) {
                        ctx.set_header("Access-Control-Allow-Origin", origin);
                    }
                }
                ctx.set_header("Access-Control-Allow-Methods", &config.allow_methods.join(", "));
                ctx.set_header("Access-Control-Allow-Headers", &config.allow_headers.join(", "));
                if config.allow_credentials {
                    ctx.set_header("Access-Control-Allow-Credentials", "true");
                }
                if let Some(max_age) = config.max_age {
                    ctx.set_header("Access-Control-Max-Age", &max_age.to_string());
                }
                return ctx.send("");
            }

            next.run(ctx.clone()).await?;

            if let Some(origin) = &origin {
                if Cors::origin_allowed(&config, origin) {
                    ctx.with_response(|response| {
                        response.header("Access-Control-Allow-Origin", origin);
                        if config.allow_credentials {
                            response.header("Access-Control-Allow-Credentials", "true");
                        }
                    });
                }
            }
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "cors"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionStore;
    use crate::http::Request;
    use crate::middleware::MiddlewareEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx_with_headers(method: Method, path: &str, headers: &[(&str, &str)]) -> Context {
        let store = SessionStore::new("s", Duration::from_secs(1));
        let mut req = Request::new(method, path);
        for (name, value) in headers {
            req.headers.insert(name.to_string(), value.to_string());
        }
        Context::new(req, store)
    }

    fn counting_terminal(counter: Arc<AtomicUsize>) -> Arc<dyn crate::handler::ContextHandler> {
        Arc::new(move |ctx: Context| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.text("handled")
            }
        })
    }

    #[tokio::test]
    async fn preflight_is_answered_without_reaching_the_handler() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ctx = ctx_with_headers(
            Method::OPTIONS,
            "/api/data",
            &[("origin", "https://app.example")],
        );
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Cors::new(CorsConfig::default()))];

        MiddlewareEngine::run_chain(chain, ctx.clone(), counting_terminal(Arc::clone(&counter)))
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        let response = ctx.take_response();
        assert_eq!(response.status, 204);
        assert_eq!(
            response.headers.get("Access-Control-Allow-Origin").unwrap(),
            "https://app.example"
        );
    }

    #[tokio::test]
    async fn simple_requests_get_origin_headers_after_the_handler() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ctx = ctx_with_headers(Method::GET, "/api/data", &[("origin", "https://app.example")]);
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Cors::new(CorsConfig::default()))];

        MiddlewareEngine::run_chain(chain, ctx.clone(), counting_terminal(Arc::clone(&counter)))
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let response = ctx.take_response();
        assert_eq!(
            response.headers.get("Access-Control-Allow-Origin").unwrap(),
            "https://app.example"
        );
    }

    #[tokio::test]
    async fn rate_limiter_rejects_once_the_burst_is_spent() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 2,
        });
        // Unique key per test run so parallel tests don't interfere.
        let path = format!("/limited/{}", rand::random::<u64>());

        assert!(limiter.is_allowed("10.0.0.1", &path).await);
        assert!(limiter.is_allowed("10.0.0.1", &path).await);
        assert!(!limiter.is_allowed("10.0.0.1", &path).await);
        // A different client key is unaffected.
        assert!(limiter.is_allowed("10.0.0.2", &path).await);
    }

    #[tokio::test]
    async fn security_headers_are_stamped_on_the_response() {
        let ctx = ctx_with_headers(Method::GET, "/", &[]);
        let chain: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(SecurityHeaders::new(SecurityConfig::default()))];
        let counter = Arc::new(AtomicUsize::new(0));

        MiddlewareEngine::run_chain(chain, ctx.clone(), counting_terminal(counter))
            .await
            .unwrap();

        let response = ctx.take_response();
        assert!(response.headers.contains_key("Strict-Transport-Security"));
        assert_eq!(
            response.headers.get("X-Content-Type-Options").unwrap(),
            "nosniff"
        );
    }
}
