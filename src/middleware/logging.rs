//! Structured request/response logging.
//!
//! [`RequestLogger`] emits two records per request:
//!
//! - `Request started`: method, path, query, identity, principal (if already
//!   authenticated), user agent, request id, content type and, for small
//!   `POST`/`PUT`/`PATCH` bodies, the request body
//! - `Request completed`: status, duration, principal (once authenticated),
//!   response size and, for small non-empty responses, the response body
//!
//! Both the completion record and a handler's `Request failed` record are
//! logged at `error` for 5xx, `warn` for 4xx and `info` otherwise.
//!
//! The response is observed through a [`ResponseCapture`]; the logger flushes
//! it exactly once after logging, so what the caller receives is byte-for-byte
//! what the downstream stages wrote.

use std::borrow::Cow;

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use tokio::time::Instant;
use tracing::{Level, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::metrics;

use super::capture::{ResponseCapture, ResponseSink};
use super::chain::{BoxFuture, Interceptor, Next};
use super::metadata::RequestMetadata;

/// Bodies at or above this many bytes are logged by size only.
pub const DEFAULT_BODY_THRESHOLD: usize = 1000;

/// Interceptor that logs each request and its captured response.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    body_threshold: usize,
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new(DEFAULT_BODY_THRESHOLD)
    }
}

impl RequestLogger {
    pub fn new(body_threshold: usize) -> Self {
        Self { body_threshold }
    }

    pub fn body_threshold(&self) -> usize {
        self.body_threshold
    }

    /// Read a small request body for logging, handing back an equivalent
    /// request for the rest of the chain.
    async fn buffer_request_body(
        &self,
        req: Request<Body>,
    ) -> AppResult<(Request<Body>, Option<String>)> {
        if !matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH) {
            return Ok((req, None));
        }

        let declared = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        let Some(len) = declared.filter(|&len| len > 0 && len < self.body_threshold) else {
            return Ok((req, None));
        };

        let (parts, body) = req.into_parts();
        let bytes = axum::body::to_bytes(body, len)
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read request body: {e}")))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        Ok((Request::from_parts(parts, Body::from(bytes)), Some(text)))
    }

    fn response_snippet<'c>(&self, capture: &'c ResponseCapture<'_>) -> Option<Cow<'c, str>> {
        let size = capture.body_size();
        (size > 0 && size < self.body_threshold).then(|| capture.body_snippet(size))
    }
}

impl Interceptor for RequestLogger {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn intercept<'a>(
        &'a self,
        req: Request<Body>,
        meta: &'a mut RequestMetadata,
        sink: &'a mut dyn ResponseSink,
        next: Next<'a>,
    ) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = req.method().clone();
            let path = req.uri().path().to_string();

            let (req, request_body) = self.buffer_request_body(req).await?;

            info!(
                method = %method,
                path = %path,
                query = req.uri().query().unwrap_or(""),
                identity = %meta.identity(),
                principal = meta.principal().map(|p| p.subject()),
                user_agent = meta
                    .user_agent()
                    .or_else(|| req.headers().get("user-agent").and_then(|v| v.to_str().ok())),
                request_id = meta.request_id(),
                content_type = req.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
                request_body = request_body.as_deref(),
                "Request started"
            );

            let mut capture = ResponseCapture::new(sink);
            let outcome = next.run(req, meta, &mut capture).await;
            let elapsed = start.elapsed();

            let principal = meta.principal().map(|p| p.subject());
            let duration_ms = elapsed.as_millis() as u64;

            if let Err(err) = outcome {
                log_failure(&method, &path, principal, duration_ms, &err);
                return Err(err);
            }

            let status = capture.status();
            let response_size = capture.body_size();
            let response_body = self.response_snippet(&capture).map(Cow::into_owned);
            log_completion(
                &method,
                &path,
                principal,
                status,
                duration_ms,
                response_size,
                response_body.as_deref(),
            );
            metrics::record_request_duration(
                &path,
                method.as_str(),
                status.as_u16(),
                elapsed.as_secs_f64(),
            );

            capture
                .flush()
                .map_err(|e| AppError::Internal(e.to_string()))?;
            Ok(())
        })
    }
}

fn level_for(status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else if status.is_client_error() {
        Level::WARN
    } else {
        Level::INFO
    }
}

fn log_completion(
    method: &Method,
    path: &str,
    principal: Option<&str>,
    status: StatusCode,
    duration_ms: u64,
    response_size: usize,
    response_body: Option<&str>,
) {
    let level = level_for(status);
    let status = status.as_u16();
    match level {
        Level::ERROR => error!(method = %method, path, principal, status, duration_ms, response_size, response_body, "Request completed"),
        Level::WARN => warn!(method = %method, path, principal, status, duration_ms, response_size, response_body, "Request completed"),
        _ => info!(method = %method, path, principal, status, duration_ms, response_size, response_body, "Request completed"),
    }
}

fn log_failure(
    method: &Method,
    path: &str,
    principal: Option<&str>,
    duration_ms: u64,
    err: &AppError,
) {
    let status = err.status().as_u16();
    match level_for(err.status()) {
        Level::ERROR => error!(method = %method, path, principal, status, duration_ms, error = %err, "Request failed"),
        _ => warn!(method = %method, path, principal, status, duration_ms, error = %err, "Request failed"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::middleware::chain::{Handler, HandlerFn, MiddlewareChain};
    use axum::http::{HeaderMap, Response};

    /// Handler that echoes the request body back.
    struct Echo;

    impl Handler for Echo {
        fn call<'a>(
            &'a self,
            req: Request<Body>,
            _meta: &'a RequestMetadata,
        ) -> BoxFuture<'a, AppResult<Response<Body>>> {
            Box::pin(async move {
                let bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
                    .await
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                Ok(Response::new(Body::from(bytes)))
            })
        }
    }

    /// Sink that counts transmissions.
    #[derive(Default)]
    struct CountingSink {
        status_calls: usize,
        write_calls: usize,
        body: Vec<u8>,
        headers: HeaderMap,
    }

    impl ResponseSink for CountingSink {
        fn set_status(&mut self, _status: StatusCode) {
            self.status_calls += 1;
        }

        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write(&mut self, chunk: &[u8]) -> usize {
            self.write_calls += 1;
            self.body.extend_from_slice(chunk);
            chunk.len()
        }
    }

    fn post(body: &'static str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/user/login?x=1")
            .header(CONTENT_LENGTH, body.len())
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_request_body_restored_for_handler() {
        let chain = MiddlewareChain::new(Echo).with(RequestLogger::default());
        let mut meta = RequestMetadata::new("1.2.3.4");
        let mut sink = CountingSink::default();

        chain
            .run(post(r#"{"username":"a"}"#), &mut meta, &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.body, br#"{"username":"a"}"#);
    }

    #[tokio::test]
    async fn test_large_body_passes_through_unbuffered() {
        let chain = MiddlewareChain::new(Echo).with(RequestLogger::new(4));
        let mut meta = RequestMetadata::new("1.2.3.4");
        let mut sink = CountingSink::default();

        chain
            .run(post("longer than four"), &mut meta, &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.body, b"longer than four");
    }

    #[tokio::test]
    async fn test_response_flushed_exactly_once() {
        let chain = MiddlewareChain::new(HandlerFn::new(|_req: Request<Body>, _meta: &RequestMetadata| {
            let mut response = Response::new(Body::from("gone"));
            *response.status_mut() = StatusCode::NOT_FOUND;
            Ok(response)
        }))
        .with(RequestLogger::default());

        let mut meta = RequestMetadata::new("1.2.3.4");
        let mut sink = CountingSink::default();
        let req = Request::builder().uri("/user/info/9").body(Body::empty()).unwrap();
        chain.run(req, &mut meta, &mut sink).await.unwrap();

        assert_eq!(sink.status_calls, 1);
        assert_eq!(sink.write_calls, 1);
        assert_eq!(sink.body, b"gone");
    }

    #[test]
    fn test_level_for_status() {
        assert_eq!(level_for(StatusCode::OK), Level::INFO);
        assert_eq!(level_for(StatusCode::FORBIDDEN), Level::WARN);
        assert_eq!(level_for(AppError::NotFound("x".into()).status()), Level::WARN);
        assert_eq!(level_for(StatusCode::BAD_GATEWAY), Level::ERROR);
    }

    #[tokio::test]
    async fn test_principal_visible_after_downstream_auth() {
        use crate::middleware::metadata::Principal;

        /// Stand-in for an auth stage placed after the logger.
        struct Authenticate;

        impl Interceptor for Authenticate {
            fn name(&self) -> &'static str {
                "auth"
            }

            fn intercept<'a>(
                &'a self,
                req: Request<Body>,
                meta: &'a mut RequestMetadata,
                sink: &'a mut dyn ResponseSink,
                next: Next<'a>,
            ) -> BoxFuture<'a, AppResult<()>> {
                Box::pin(async move {
                    meta.attach_principal(Principal::new("user123", "valid-token-123"))?;
                    next.run(req, meta, sink).await
                })
            }
        }

        let chain = MiddlewareChain::new(HandlerFn::new(|_req: Request<Body>, _meta: &RequestMetadata| {
            Err(AppError::Forbidden("Permission denied".into()))
        }))
        .with(RequestLogger::default())
        .with(Authenticate);

        let mut meta = RequestMetadata::new("1.2.3.4");
        let mut sink = CountingSink::default();
        let req = Request::builder().uri("/user/456").body(Body::empty()).unwrap();
        let result = chain.run(req, &mut meta, &mut sink).await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert_eq!(meta.principal().map(|p| p.subject()), Some("user123"));
    }

    #[tokio::test]
    async fn test_handler_error_propagates_unflushed() {
        let chain = MiddlewareChain::new(HandlerFn::new(|_req: Request<Body>, _meta: &RequestMetadata| {
            Err(AppError::Internal("boom".into()))
        }))
        .with(RequestLogger::default());

        let mut meta = RequestMetadata::new("1.2.3.4");
        let mut sink = CountingSink::default();
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let result = chain.run(req, &mut meta, &mut sink).await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(sink.write_calls, 0);
    }
}
