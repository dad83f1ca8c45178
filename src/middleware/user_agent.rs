//! User agent tagging.

use axum::body::Body;
use axum::http::Request;
use axum::http::header::USER_AGENT;
use tracing::info;

use crate::error::AppResult;

use super::capture::ResponseSink;
use super::chain::{BoxFuture, Interceptor, Next};
use super::metadata::RequestMetadata;

/// Value recorded when the client sends no usable `User-Agent`.
pub const UNKNOWN_USER_AGENT: &str = "Unknown";

/// Copies the `User-Agent` header into the request metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAgentTagger;

impl UserAgentTagger {
    pub fn new() -> Self {
        Self
    }
}

pub fn user_agent_of<B>(req: &Request<B>) -> &str {
    req.headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ua| !ua.is_empty())
        .unwrap_or(UNKNOWN_USER_AGENT)
}

impl Interceptor for UserAgentTagger {
    fn name(&self) -> &'static str {
        "user_agent"
    }

    fn intercept<'a>(
        &'a self,
        req: Request<Body>,
        meta: &'a mut RequestMetadata,
        sink: &'a mut dyn ResponseSink,
        next: Next<'a>,
    ) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async move {
            let user_agent = user_agent_of(&req).to_string();
            info!(
                method = %req.method(),
                path = %req.uri().path(),
                user_agent = %user_agent,
                "Tagged user agent"
            );
            meta.set_user_agent(user_agent)?;
            next.run(req, meta, sink).await
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_read() {
        let req = Request::builder()
            .header(USER_AGENT, "curl/8.4.0")
            .body(Body::empty())
            .unwrap();
        assert_eq!(user_agent_of(&req), "curl/8.4.0");
    }

    #[test]
    fn test_user_agent_defaults_to_unknown() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(user_agent_of(&req), UNKNOWN_USER_AGENT);

        let req = Request::builder()
            .header(USER_AGENT, "   ")
            .body(Body::empty())
            .unwrap();
        assert_eq!(user_agent_of(&req), UNKNOWN_USER_AGENT);
    }
}
