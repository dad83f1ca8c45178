//! Defensive response headers and request size enforcement.
//!
//! The size limit is enforced twice: [`SecurityGuard`] rejects a declared
//! `Content-Length` over the limit before anything downstream runs, and wraps
//! the body in [`Limited`] so a stream without a declared length fails once
//! it crosses the limit. Handlers read bodies with [`read_limited_body`],
//! which reports either failure as [`AppError::PayloadTooLarge`].

use std::error::Error as StdError;

use axum::body::{Body, Bytes};
use axum::http::header::{
    CONTENT_LENGTH, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
    X_XSS_PROTECTION,
};
use axum::http::{HeaderName, HeaderValue, Request};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, Rejection};

use super::capture::ResponseSink;
use super::chain::{BoxFuture, Interceptor, Next};
use super::metadata::RequestMetadata;

/// Default maximum request body size (10 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

pub const API_VERSION_HEADER: HeaderName = HeaderName::from_static("x-api-version");
pub const POWERED_BY_HEADER: HeaderName = HeaderName::from_static("x-powered-by");
pub const API_VERSION: &str = "1.0";

/// Sets service and security headers on every response and rejects
/// oversized bodies.
///
/// A declared `Content-Length` over the limit is rejected here with 413.
/// Otherwise the body is passed on wrapped in [`Limited`]; reading past the
/// limit fails, and [`read_limited_body`] turns that failure into a 413.
#[derive(Debug, Clone)]
pub struct SecurityGuard {
    max_body_size: usize,
}

impl Default for SecurityGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BODY_SIZE)
    }
}

impl SecurityGuard {
    pub fn new(max_body_size: usize) -> Self {
        Self { max_body_size }
    }

    fn apply_headers(sink: &mut dyn ResponseSink) {
        let headers = sink.headers_mut();
        headers.insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));
        headers.insert(POWERED_BY_HEADER, HeaderValue::from_static("gatehouse"));
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
        headers.insert(
            STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
}

impl Interceptor for SecurityGuard {
    fn name(&self) -> &'static str {
        "security"
    }

    fn intercept<'a>(
        &'a self,
        req: Request<Body>,
        meta: &'a mut RequestMetadata,
        sink: &'a mut dyn ResponseSink,
        next: Next<'a>,
    ) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async move {
            Self::apply_headers(sink);

            let declared = req
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            if let Some(actual) = declared
                && actual > self.max_body_size as u64
            {
                warn!(
                    identity = %meta.identity(),
                    path = %req.uri().path(),
                    actual,
                    limit = self.max_body_size,
                    "Request body too large"
                );
                Rejection::PayloadTooLarge {
                    limit: self.max_body_size,
                    actual,
                }
                .write_to(sink);
                return Ok(());
            }

            debug!(path = %req.uri().path(), "Security checks passed");
            let limit = self.max_body_size;
            let req = req.map(|body| Body::new(Limited::new(body, limit)));
            next.run(req, meta, sink).await
        })
    }
}

/// Collect a request body of at most `limit` bytes.
///
/// Exceeding the limit, here or in a [`Limited`] wrapper further out, yields
/// [`AppError::PayloadTooLarge`]. Any other read failure is a bad request.
pub async fn read_limited_body(body: Body, limit: usize) -> AppResult<Bytes> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if exceeds_limit(&*e) => Err(AppError::PayloadTooLarge(format!(
            "body exceeds {limit} bytes"
        ))),
        Err(e) => Err(AppError::BadRequest(format!("Failed to read body: {e}"))),
    }
}

fn exceeds_limit(err: &(dyn StdError + 'static)) -> bool {
    std::iter::successors(Some(err), |e| (*e).source()).any(|e| e.is::<LengthLimitError>())
}
