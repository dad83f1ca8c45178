//! Request admission pipeline.
//!
//! Requests pass through an ordered [`MiddlewareChain`] of interceptors before
//! reaching a handler:
//!
//! - **Security**: service and defensive response headers, body size limit
//! - **Request ID**: propagation or generation of `X-Request-Id`
//! - **Logging**: start/completion records with captured response metadata
//! - **Rate Limiting**: per-identity sliding window with background eviction
//! - **Authentication**: bearer credential resolved to a principal
//! - **User Agent**: client user agent recorded in metadata
//!
//! # Architecture
//!
//! ```text
//! Request → Security → RequestId → Logger → RateLimit → Auth → Handler
//!              ↓                      ↓          ↓         ↓
//!          413 Too Large       ResponseCapture  429      401 / 500
//! ```
//!
//! Every stage sees the same [`RequestMetadata`] (identity, principal,
//! request id, user agent) and writes response headers straight to the
//! shared sink.

pub mod auth;
pub mod capture;
pub mod chain;
pub mod ip;
pub mod logging;
pub mod metadata;
pub mod rate_limit;
pub mod request_id;
pub mod security;
pub mod sliding_window;
pub mod user_agent;

pub use auth::{
    CredentialError, CredentialResolver, PrincipalValidator, ResolveError,
    StaticCredentialResolver, parse_credential,
};
pub use capture::{CaptureError, HttpResponseSink, ResponseCapture, ResponseSink};
pub use chain::{BoxFuture, ChainService, Handler, HandlerFn, Interceptor, MiddlewareChain, Next};
pub use ip::{CidrRange, TrustedProxyConfig, UNKNOWN_IP, resolve_client_identity};
pub use logging::RequestLogger;
pub use metadata::{MetadataError, Principal, RequestMetadata};
pub use rate_limit::{RateLimit, RateLimitError};
pub use request_id::{REQUEST_ID_HEADER, RequestIdTagger};
pub use security::{SecurityGuard, read_limited_body};
pub use sliding_window::{Admission, EvictionTask, LimiterSettings, SlidingWindowLimiter};
pub use user_agent::UserAgentTagger;
