//! Response sinks and the buffering capture used by the request logger.
//!
//! Interceptors and handlers never build an `http::Response` directly; they
//! write into a [`ResponseSink`]. The outermost sink is an
//! [`HttpResponseSink`], which is converted into the response handed back to
//! hyper once the chain completes.
//!
//! [`ResponseCapture`] wraps another sink and holds the status code and body
//! back until [`ResponseCapture::flush`] is called:
//!
//! ```text
//!  handler ──write──▶ ResponseCapture ──flush (once)──▶ inner sink
//!                         │
//!                         └── status(), body_size(), body_snippet()
//! ```
//!
//! Headers are not buffered. `headers_mut` goes straight to the inner sink, so
//! a header set by any stage is visible to every other stage.

use std::borrow::Cow;

use axum::body::Body;
use axum::http::{HeaderMap, Response, StatusCode};
use axum::response::IntoResponse;
use thiserror::Error;
use tracing::debug;

/// Destination for a response under construction.
pub trait ResponseSink: Send {
    /// Set the response status code.
    fn set_status(&mut self, status: StatusCode);

    /// Mutable access to the response headers.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Append bytes to the response body, returning how many were accepted.
    fn write(&mut self, chunk: &[u8]) -> usize;
}

/// Errors from misusing a [`ResponseCapture`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    /// `flush` was called a second time. Nothing was transmitted.
    #[error("response capture was already flushed")]
    AlreadyFlushed,
}

/// The transport-facing sink: accumulates the response for hyper.
#[derive(Debug, Default)]
pub struct HttpResponseSink {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl HttpResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status that will be sent (200 if never set).
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl ResponseSink for HttpResponseSink {
    fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write(&mut self, chunk: &[u8]) -> usize {
        self.body.extend_from_slice(chunk);
        chunk.len()
    }
}

impl IntoResponse for HttpResponseSink {
    fn into_response(self) -> Response<Body> {
        let status = self.status();
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Buffers status and body for one request so they can be inspected before
/// being sent on.
///
/// `flush` transmits exactly once: one `set_status` followed by one `write` of
/// the whole body on the inner sink. A second `flush` is rejected with
/// [`CaptureError::AlreadyFlushed`] and transmits nothing.
pub struct ResponseCapture<'a> {
    inner: &'a mut dyn ResponseSink,
    status: Option<StatusCode>,
    body: Vec<u8>,
    flushed: bool,
}

impl<'a> ResponseCapture<'a> {
    pub fn new(inner: &'a mut dyn ResponseSink) -> Self {
        Self {
            inner,
            status: None,
            body: Vec::new(),
            flushed: false,
        }
    }

    /// Captured status, defaulting to 200 when the handler never set one.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    /// Up to `max_bytes` of the captured body as text.
    ///
    /// Invalid UTF-8 (including a multi-byte character cut at the boundary)
    /// is replaced rather than rejected.
    pub fn body_snippet(&self, max_bytes: usize) -> Cow<'_, str> {
        let end = max_bytes.min(self.body.len());
        String::from_utf8_lossy(self.body.get(..end).unwrap_or_default())
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Send the buffered status and body to the inner sink.
    ///
    /// Returns the number of body bytes the inner sink accepted.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::AlreadyFlushed`] on any call after the first.
    pub fn flush(&mut self) -> Result<usize, CaptureError> {
        if self.flushed {
            return Err(CaptureError::AlreadyFlushed);
        }
        self.flushed = true;

        self.inner.set_status(self.status());
        Ok(self.inner.write(&self.body))
    }
}

impl ResponseSink for ResponseCapture<'_> {
    fn set_status(&mut self, status: StatusCode) {
        if self.flushed {
            debug!(%status, "Ignoring status set after flush");
            return;
        }
        self.status = Some(status);
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write(&mut self, chunk: &[u8]) -> usize {
        if self.flushed {
            debug!(bytes = chunk.len(), "Ignoring body write after flush");
            return 0;
        }
        self.body.extend_from_slice(chunk);
        chunk.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    /// Sink that records every call made on it.
    #[derive(Default)]
    struct RecordingSink {
        statuses: Vec<StatusCode>,
        writes: Vec<Vec<u8>>,
        headers: HeaderMap,
    }

    impl ResponseSink for RecordingSink {
        fn set_status(&mut self, status: StatusCode) {
            self.statuses.push(status);
        }

        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write(&mut self, chunk: &[u8]) -> usize {
            self.writes.push(chunk.to_vec());
            chunk.len()
        }
    }

    #[test]
    fn test_capture_buffers_until_flush() {
        let mut sink = RecordingSink::default();
        {
            let mut capture = ResponseCapture::new(&mut sink);
            capture.set_status(StatusCode::CREATED);
            assert_eq!(capture.write(b"hello "), 6);
            assert_eq!(capture.write(b"world"), 5);

            assert_eq!(capture.status(), StatusCode::CREATED);
            assert_eq!(capture.body_size(), 11);
        }
        // Dropped without flushing: nothing reached the sink
        assert!(sink.statuses.is_empty());
        assert!(sink.writes.is_empty());
    }

    #[test]
    fn test_flush_transmits_exactly_once() {
        let mut sink = RecordingSink::default();
        let mut capture = ResponseCapture::new(&mut sink);
        capture.set_status(StatusCode::ACCEPTED);
        capture.write(b"a");
        capture.write(b"b");

        assert_eq!(capture.flush(), Ok(2));
        assert_eq!(capture.flush(), Err(CaptureError::AlreadyFlushed));
        assert!(capture.is_flushed());

        assert_eq!(sink.statuses, vec![StatusCode::ACCEPTED]);
        assert_eq!(sink.writes, vec![b"ab".to_vec()]);
    }

    #[test]
    fn test_flush_defaults_to_ok() {
        let mut sink = RecordingSink::default();
        let mut capture = ResponseCapture::new(&mut sink);
        capture.flush().unwrap();

        assert_eq!(sink.statuses, vec![StatusCode::OK]);
        assert_eq!(sink.writes, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_writes_after_flush_are_dropped() {
        let mut sink = RecordingSink::default();
        let mut capture = ResponseCapture::new(&mut sink);
        capture.write(b"first");
        capture.flush().unwrap();

        assert_eq!(capture.write(b"late"), 0);
        capture.set_status(StatusCode::IM_A_TEAPOT);
        assert_eq!(capture.status(), StatusCode::OK);

        assert_eq!(sink.writes.len(), 1);
    }

    #[test]
    fn test_headers_pass_through() {
        let mut sink = RecordingSink::default();
        sink.headers
            .insert("x-upstream", HeaderValue::from_static("1"));
        {
            let mut capture = ResponseCapture::new(&mut sink);
            assert!(capture.headers_mut().contains_key("x-upstream"));
            capture
                .headers_mut()
                .insert("x-downstream", HeaderValue::from_static("2"));
        }
        assert_eq!(sink.headers["x-downstream"], "2");
    }

    #[test]
    fn test_body_snippet_truncates() {
        let mut sink = RecordingSink::default();
        let mut capture = ResponseCapture::new(&mut sink);
        capture.write(b"0123456789");

        assert_eq!(capture.body_snippet(4), "0123");
        assert_eq!(capture.body_snippet(100), "0123456789");
    }

    #[test]
    fn test_body_snippet_cut_inside_utf8_char() {
        let mut sink = RecordingSink::default();
        let mut capture = ResponseCapture::new(&mut sink);
        capture.write("héllo".as_bytes());

        // 'é' is two bytes; cutting after its first byte must not panic
        let snippet = capture.body_snippet(2);
        assert!(snippet.starts_with('h'));
    }

    #[test]
    fn test_http_sink_into_response() {
        let mut sink = HttpResponseSink::new();
        sink.set_status(StatusCode::NOT_FOUND);
        sink.headers_mut()
            .insert("x-test", HeaderValue::from_static("yes"));
        sink.write(b"missing");

        assert_eq!(sink.body(), b"missing");
        let response = sink.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-test"], "yes");
    }
}
