//! Request ID propagation.
//!
//! [`RequestIdTagger`] reuses a client-supplied `X-Request-Id` when it is
//! reasonable (non-empty, at most [`MAX_REQUEST_ID_LEN`] printable ASCII
//! characters) and otherwise generates a UUIDv4. The id is stored in the
//! request metadata, recorded on the current tracing span and echoed in the
//! response headers.
//!
//! ```bash
//! curl -H "X-Request-Id: my-correlation-id" -X PUT http://localhost:3000/user/1
//! ```

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request};
use tracing::{Span, debug};
use uuid::Uuid;

use crate::error::AppResult;

use super::capture::ResponseSink;
use super::chain::{BoxFuture, Interceptor, Next};
use super::metadata::RequestMetadata;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Longest client-supplied id that is propagated verbatim.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Interceptor that assigns every request an id.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdTagger;

impl RequestIdTagger {
    pub fn new() -> Self {
        Self
    }
}

/// Client-supplied id, or a fresh UUIDv4 if absent or unusable.
pub fn extract_or_generate_request_id<B>(req: &Request<B>) -> String {
    if let Some(value) = req.headers().get(REQUEST_ID_HEADER)
        && let Ok(value) = value.to_str()
        && is_acceptable(value)
    {
        return value.to_string();
    }

    Uuid::new_v4().to_string()
}

fn is_acceptable(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id.bytes().all(|b| b.is_ascii_graphic())
}

impl Interceptor for RequestIdTagger {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn intercept<'a>(
        &'a self,
        req: Request<Body>,
        meta: &'a mut RequestMetadata,
        sink: &'a mut dyn ResponseSink,
        next: Next<'a>,
    ) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async move {
            let request_id = extract_or_generate_request_id(&req);

            Span::current().record("request_id", request_id.as_str());
            debug!(request_id = %request_id, "Processing request");

            if let Ok(value) = HeaderValue::from_str(&request_id) {
                sink.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            meta.set_request_id(request_id)?;

            next.run(req, meta, sink).await
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::middleware::capture::HttpResponseSink;
    use crate::middleware::chain::{HandlerFn, MiddlewareChain};
    use axum::http::Response;

    fn request_with_id(id: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder();
        if let Some(id) = id {
            builder = builder.header("x-request-id", id);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_existing_request_id_kept() {
        let req = request_with_id(Some("existing-id-123"));
        assert_eq!(extract_or_generate_request_id(&req), "existing-id-123");
    }

    #[test]
    fn test_missing_request_id_generated() {
        let id = extract_or_generate_request_id(&request_with_id(None));
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_unacceptable_request_id_replaced() {
        let too_long = "a".repeat(MAX_REQUEST_ID_LEN + 1);
        for bad in ["", "has space", too_long.as_str()] {
            let id = extract_or_generate_request_id(&request_with_id(Some(bad)));
            assert!(Uuid::parse_str(&id).is_ok(), "{bad:?} should be replaced");
        }
    }

    #[tokio::test]
    async fn test_tagger_sets_metadata_and_header() {
        let chain = MiddlewareChain::new(HandlerFn::new(|_req: Request<Body>, meta: &RequestMetadata| {
            Ok(Response::new(Body::from(meta.request_id().unwrap_or("").to_string())))
        }))
        .with(RequestIdTagger::new());

        let mut meta = RequestMetadata::new("1.2.3.4");
        let mut sink = HttpResponseSink::new();
        chain
            .run(request_with_id(Some("corr-7")), &mut meta, &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.body(), b"corr-7");
        assert_eq!(sink.headers()[REQUEST_ID_HEADER], "corr-7");
    }
}
