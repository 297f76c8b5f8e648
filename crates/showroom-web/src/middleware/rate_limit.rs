//! Fixed-window limits for sign-in attempts and admin API calls.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::session::session_token;

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Sign-in attempts per client address.
    pub login_per_minute: u64,
    /// Admin API calls per session.
    pub admin_per_minute: u64,
    pub window: Duration,
    /// Key sign-in attempts on the first `X-Forwarded-For` hop. Only safe
    /// behind a proxy that overwrites the header.
    pub trust_forwarded: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_per_minute: 10,
            admin_per_minute: 300,
            window: Duration::from_secs(60),
            trust_forwarded: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum Bucket {
    Login,
    Admin,
}

impl Bucket {
    fn for_route(method: &Method, path: &str) -> Option<Self> {
        if path == "/api/v1/admin/login" {
            (method == Method::POST).then_some(Bucket::Login)
        } else if path == "/api/v1/admin" || path.starts_with("/api/v1/admin/") {
            Some(Bucket::Admin)
        } else {
            None
        }
    }

    fn name(self) -> &'static str {
        match self {
            Bucket::Login => "login",
            Bucket::Admin => "admin",
        }
    }
}

#[derive(Debug)]
struct Window {
    opened: Instant,
    hits: u64,
}

/// Shared hit counters, handed to [`enforce`] as middleware state.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    windows: Arc<Mutex<HashMap<(Bucket, String), Window>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn limit(&self, bucket: Bucket) -> u64 {
        match bucket {
            Bucket::Login => self.config.login_per_minute,
            Bucket::Admin => self.config.admin_per_minute,
        }
    }

    /// Counts one hit; `Err` carries how long the caller has to wait.
    fn admit(&self, bucket: Bucket, caller: &str, now: Instant) -> Result<(), Duration> {
        let span = self.config.window;
        let limit = self.limit(bucket);
        let mut windows = self.windows.lock();
        windows.retain(|_, window| now.saturating_duration_since(window.opened) < span);

        let window = windows
            .entry((bucket, caller.to_owned()))
            .or_insert(Window {
                opened: now,
                hits: 0,
            });
        if window.hits >= limit {
            let waited = now.saturating_duration_since(window.opened);
            return Err(span.saturating_sub(waited).max(Duration::from_secs(1)));
        }
        window.hits += 1;
        Ok(())
    }
}

#[derive(Serialize)]
struct TooManyRequests {
    error: &'static str,
    retry_after_seconds: u64,
}

pub async fn enforce(State(limiter): State<RateLimiter>, request: Request, next: Next) -> Response {
    let Some(bucket) = Bucket::for_route(request.method(), request.uri().path()) else {
        return next.run(request).await;
    };
    let caller = match bucket {
        Bucket::Login => client_address(&request, limiter.config.trust_forwarded),
        Bucket::Admin => credential_digest(request.headers()),
    };

    match limiter.admit(bucket, &caller, Instant::now()) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!(
                bucket = bucket.name(),
                caller = %caller,
                limit = limiter.limit(bucket),
                "rate limit exceeded"
            );
            too_many_requests(retry_after)
        }
    }
}

fn too_many_requests(retry_after: Duration) -> Response {
    let seconds = retry_after.as_secs().max(1);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, seconds.to_string())],
        Json(TooManyRequests {
            error: "too many requests",
            retry_after_seconds: seconds,
        }),
    )
        .into_response()
}

/// Peer address, or the first `X-Forwarded-For` hop when the proxy is trusted.
fn client_address(request: &Request, trust_forwarded: bool) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .filter(|_| trust_forwarded)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match forwarded {
        Some(client) => client.to_string(),
        None => request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "anonymous".to_string()),
    }
}

/// Session tokens are never logged or kept raw.
fn credential_digest(headers: &HeaderMap) -> String {
    match session_token(headers) {
        Some(token) => STANDARD_NO_PAD.encode(Sha256::digest(token.as_bytes())),
        None => "anonymous".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware::from_fn_with_state, routing::get, Router};
    use tower::Service;

    fn limiter(login: u64, admin: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            login_per_minute: login,
            admin_per_minute: admin,
            window: Duration::from_secs(60),
            trust_forwarded: false,
        })
    }

    fn login_attempt(forwarded_for: &str) -> axum::http::Request<Body> {
        let mut request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/v1/admin/login")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 7], 52_000))));
        request
    }

    fn login_app(limiter: RateLimiter) -> Router {
        Router::new()
            .route("/api/v1/admin/login", axum::routing::post(|| async { "ok" }))
            .layer(from_fn_with_state(limiter, enforce))
    }

    #[test]
    fn routes_map_to_buckets() {
        assert_eq!(
            Bucket::for_route(&Method::POST, "/api/v1/admin/login"),
            Some(Bucket::Login)
        );
        assert_eq!(Bucket::for_route(&Method::GET, "/api/v1/admin/login"), None);
        assert_eq!(
            Bucket::for_route(&Method::DELETE, "/api/v1/admin/cars/4"),
            Some(Bucket::Admin)
        );
        assert_eq!(Bucket::for_route(&Method::GET, "/api/v1/cars"), None);
        assert_eq!(Bucket::for_route(&Method::GET, "/media/cars/a.png"), None);
    }

    #[test]
    fn window_reopens_after_it_elapses() {
        let limiter = limiter(2, 5);
        let start = Instant::now();
        assert!(limiter.admit(Bucket::Login, "203.0.113.7", start).is_ok());
        assert!(limiter.admit(Bucket::Login, "203.0.113.7", start).is_ok());

        let wait = limiter
            .admit(Bucket::Login, "203.0.113.7", start + Duration::from_secs(15))
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(45));
        assert!(limiter.admit(Bucket::Login, "198.51.100.2", start).is_ok());

        let later = start + Duration::from_secs(60);
        assert!(limiter.admit(Bucket::Login, "203.0.113.7", later).is_ok());
    }

    #[test]
    fn zero_limit_blocks_everything() {
        let limiter = limiter(0, 5);
        assert!(limiter
            .admit(Bucket::Login, "203.0.113.7", Instant::now())
            .is_err());
    }

    #[tokio::test]
    async fn rotating_forwarded_header_does_not_reset_login_limit() {
        let mut app = login_app(limiter(2, 5));
        let mut accepted = 0;
        for hop in 0..10 {
            let response = app
                .call(login_attempt(&format!("198.51.100.{hop}")))
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                accepted += 1;
            } else {
                assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
            }
        }
        assert_eq!(accepted, 2);
    }

    #[tokio::test]
    async fn trusted_proxy_keys_on_forwarded_client() {
        let limiter = RateLimiter::new(RateLimitConfig {
            login_per_minute: 1,
            trust_forwarded: true,
            ..RateLimitConfig::default()
        });
        let mut app = login_app(limiter);

        let first = app.call(login_attempt("198.51.100.1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let repeat = app.call(login_attempt("198.51.100.1, 10.0.0.1")).await.unwrap();
        assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
        let other = app.call(login_attempt("198.51.100.2")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[test]
    fn credential_digest_hides_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "showroom_admin=alpha".parse().unwrap());
        let digest = credential_digest(&headers);
        assert!(!digest.contains("alpha"));
        assert_eq!(digest, credential_digest(&headers));
        assert_eq!(credential_digest(&HeaderMap::new()), "anonymous");
    }

    #[tokio::test]
    async fn middleware_rejects_with_retry_after() {
        let mut app = Router::new()
            .route("/api/v1/admin/dashboard", get(|| async { "ok" }))
            .route("/api/v1/cars", get(|| async { "ok" }))
            .layer(from_fn_with_state(limiter(5, 1), enforce));
        let request = |uri: &str| {
            axum::http::Request::builder()
                .uri(uri)
                .header(header::AUTHORIZATION, "Bearer alpha")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.call(request("/api/v1/admin/dashboard")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.call(request("/api/v1/admin/dashboard")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key(header::RETRY_AFTER));

        let public = app.call(request("/api/v1/cars")).await.unwrap();
        assert_eq!(public.status(), StatusCode::OK);
    }
}
