//! Rate limiting for credential endpoints.
//!
//! Uses a token bucket per client IP to slow down password guessing and
//! reset-email spam.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};

use crate::api::failure_response;

/// Key used when the connection address is unknown (e.g. in-process requests).
const UNKNOWN_CLIENT: &str = "unknown";

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Requests allowed per client before limiting kicks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitQuotas {
    /// Login attempts per minute
    pub login_per_minute: u32,
    /// Forgotten-password requests per minute
    pub reset_per_minute: u32,
}

impl Default for RateLimitQuotas {
    fn default() -> Self {
        Self {
            login_per_minute: 10,
            reset_per_minute: 3,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitConfig {
    pub login: Arc<IpLimiter>,
    pub forgotten_password: Arc<IpLimiter>,
}

impl RateLimitConfig {
    pub fn new(quotas: RateLimitQuotas) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(per_minute(quotas.login_per_minute))),
            forgotten_password: Arc::new(RateLimiter::keyed(per_minute(
                quotas.reset_per_minute,
            ))),
        }
    }
}

impl RateLimitConfig {
    /// Forget clients whose buckets have fully refilled.
    pub fn retain_recent(&self) {
        for limiter in [&self.login, &self.forgotten_password] {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(RateLimitQuotas::default())
    }
}

/// A zero quota is treated as one request per minute.
fn per_minute(count: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(count).unwrap_or(NonZeroU32::MIN))
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn check(limiter: &IpLimiter, request: &Request, message: &'static str) -> Result<(), Response> {
    let key = client_key(request);
    limiter.check_key(&key).map_err(|_| {
        tracing::warn!(client = %key, "Rate limit exceeded");
        failure_response(StatusCode::TOO_MANY_REQUESTS, message)
    })
}

/// Middleware for rate limiting login.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    match check(
        &config.login,
        &request,
        "Too many login attempts. Please wait before trying again.",
    ) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}

/// Middleware for rate limiting forgotten-password requests.
pub async fn rate_limit_forgotten_password(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    match check(
        &config.forgotten_password,
        &request,
        "Too many requests. Please try again later.",
    ) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}
