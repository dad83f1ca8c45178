//! Rate limiting interceptor backed by [`SlidingWindowLimiter`].
//!
//! # Response Headers
//!
//! Every response that passes through carries:
//! - `X-RateLimit-Limit`: configured requests per window
//! - `X-RateLimit-Remaining`: admissions left in the current window
//!
//! A denied request additionally gets `Retry-After` (whole seconds, at least
//! one) and the standard 429 error body. Denied requests are not recorded, so
//! hammering a limited identity does not push its recovery further out.
//!
//! # Identity
//!
//! The limiter is keyed by [`RequestMetadata::identity`], which the chain
//! service resolves before any interceptor runs (see
//! [`resolve_client_identity`](super::ip::resolve_client_identity)).

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request};
use thiserror::Error;
use tracing::warn;

use crate::error::{AppResult, Rejection};
use crate::metrics;

use super::capture::ResponseSink;
use super::chain::{BoxFuture, Interceptor, Next};
use super::metadata::RequestMetadata;
use super::sliding_window::{Admission, SlidingWindowLimiter};

pub const RATE_LIMIT_LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING_HEADER: HeaderName =
    HeaderName::from_static("x-ratelimit-remaining");

/// Invalid limiter configuration.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("max requests must be greater than 0; set RATE_LIMIT_MAX_REQUESTS=0 to disable limiting")]
    ZeroMaxRequests,

    #[error("rate limit window must be greater than 0")]
    ZeroWindow,

    #[error("visitor retention must be greater than 0")]
    ZeroRetention,

    #[error("eviction sweep interval must be greater than 0")]
    ZeroSweepInterval,
}

/// Interceptor that admits or denies requests per client identity.
#[derive(Debug, Clone)]
pub struct RateLimit {
    limiter: Arc<SlidingWindowLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<SlidingWindowLimiter>) -> Self {
        Self { limiter }
    }
}

impl Interceptor for RateLimit {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn intercept<'a>(
        &'a self,
        req: Request<Body>,
        meta: &'a mut RequestMetadata,
        sink: &'a mut dyn ResponseSink,
        next: Next<'a>,
    ) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async move {
            let admission = self.limiter.admit(meta.identity());
            let limit = self.limiter.settings().max_requests();

            let headers = sink.headers_mut();
            headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(limit));

            match admission {
                Admission::Admitted { remaining } => {
                    headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(remaining));
                    metrics::record_admission();
                    next.run(req, meta, sink).await
                }
                Admission::Denied { retry_after } => {
                    headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(0u32));
                    warn!(
                        identity = %meta.identity(),
                        path = %req.uri().path(),
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Rate limit exceeded"
                    );
                    metrics::record_denial();
                    Rejection::RateLimited { retry_after }.write_to(sink);
                    Ok(())
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::middleware::capture::HttpResponseSink;
    use crate::middleware::chain::{HandlerFn, MiddlewareChain};
    use crate::middleware::sliding_window::LimiterSettings;
    use axum::http::header::RETRY_AFTER;
    use axum::http::{Response, StatusCode};
    use std::time::Duration;

    fn chain(max: usize) -> MiddlewareChain {
        let settings = LimiterSettings::new(
            Duration::from_secs(60),
            max,
            Duration::from_secs(600),
            Duration::from_secs(300),
        )
        .unwrap();
        let limiter = Arc::new(SlidingWindowLimiter::new(settings));
        MiddlewareChain::new(HandlerFn::new(|_req: Request<Body>, _meta: &RequestMetadata| {
            Ok(Response::new(Body::from("ok")))
        }))
        .with(RateLimit::new(limiter))
    }

    async fn call(chain: &MiddlewareChain, identity: &str) -> HttpResponseSink {
        let mut meta = RequestMetadata::new(identity);
        let mut sink = HttpResponseSink::new();
        let req = Request::builder().uri("/user/1").body(Body::empty()).unwrap();
        chain.run(req, &mut meta, &mut sink).await.unwrap();
        sink
    }

    #[test]
    fn test_error_messages() {
        assert!(RateLimitError::ZeroMaxRequests.to_string().contains("disable"));
    }

    #[tokio::test]
    async fn test_admitted_response_carries_quota_headers() {
        let chain = chain(2);

        let sink = call(&chain, "1.2.3.4").await;
        assert_eq!(sink.status(), StatusCode::OK);
        assert_eq!(sink.headers()[RATE_LIMIT_LIMIT_HEADER], "2");
        assert_eq!(sink.headers()[RATE_LIMIT_REMAINING_HEADER], "1");
    }

    #[tokio::test]
    async fn test_denied_response() {
        let chain = chain(1);
        call(&chain, "1.2.3.4").await;

        let sink = call(&chain, "1.2.3.4").await;
        assert_eq!(sink.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(sink.headers()[RATE_LIMIT_REMAINING_HEADER], "0");
        assert!(sink.headers().contains_key(RETRY_AFTER));

        let json: serde_json::Value = serde_json::from_slice(sink.body()).unwrap();
        assert_eq!(json["code"], 429);
        assert!(json["data"].is_null());

        // A different identity is unaffected
        assert_eq!(call(&chain, "5.6.7.8").await.status(), StatusCode::OK);
    }
}
