//! # Middleware Module
//!
//! Rate limiting for the Storyflow HTTP API.
//!
//! Two limiters run per process: a global one over every route and a
//! tighter one in front of the generation routes, which cost upstream
//! tokens. Both count requests per minute.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Process-wide rate limiter.
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

// =============================================================================
// RATE LIMITER
// =============================================================================

/// Create a limiter allowing `requests_per_minute`, or `None` when 0.
pub fn create_rate_limiter(requests_per_minute: u32) -> Option<GlobalRateLimiter> {
    let rpm = NonZeroU32::new(requests_per_minute)?;
    Some(Arc::new(RateLimiter::direct(Quota::per_minute(rpm))))
}

/// Rate limiting middleware.
///
/// Returns 429 Too Many Requests once the limiter's quota is spent.
pub async fn rate_limit_middleware(
    State(limiter): State<GlobalRateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    match limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            Err((StatusCode::TOO_MANY_REQUESTS, "Too Many Requests"))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
