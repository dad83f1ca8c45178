//! Bearer credential authentication.
//!
//! # Flow
//!
//! ```text
//!  Authorization header
//!     │ absent ─────────────────────────▶ 401 "Missing Authorization header"
//!     │ not "<scheme> <token>" ─────────▶ 401 "Invalid Authorization header format"
//!     │ empty token ────────────────────▶ 401 "Missing token"
//!     ▼
//!  CredentialResolver::resolve(token)
//!     │ NotFound ───────────────────────▶ 401 "Invalid token"
//!     │ Unavailable ────────────────────▶ 500 (detail logged only)
//!     ▼
//!  Principal attached to metadata ─────▶ next
//! ```
//!
//! The resolver is never consulted for a missing or malformed credential.
//! Every failure emits an audit record on the `audit` target carrying the
//! client identity and the reason. Tokens are never logged.
//!
//! # Bypassed Endpoints
//!
//! Bypass paths are matched exactly against the URI path (query excluded,
//! case-sensitive, no trailing-slash folding). Defaults: `/health`, `/ready`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Request};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{AppResult, Rejection};
use crate::metrics;

use super::capture::ResponseSink;
use super::chain::{BoxFuture, Interceptor, Next};
use super::metadata::{Principal, RequestMetadata};

/// Paths that skip authentication unless configured otherwise.
pub const DEFAULT_BYPASS_PATHS: [&str; 2] = ["/health", "/ready"];

/// Default authorization scheme.
pub const DEFAULT_SCHEME: &str = "Bearer";

/// Reason a credential could not be read from the request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Missing Authorization header")]
    Missing,

    #[error("Invalid Authorization header format")]
    Malformed,

    #[error("Missing token")]
    EmptyToken,
}

impl CredentialError {
    /// Short label for metrics and audit records.
    pub fn reason(&self) -> &'static str {
        match self {
            CredentialError::Missing => "missing_header",
            CredentialError::Malformed => "malformed_header",
            CredentialError::EmptyToken => "empty_token",
        }
    }
}

/// Failure reported by a [`CredentialResolver`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The token is not known. Maps to 401.
    #[error("credential not recognised")]
    NotFound,

    /// The backing store could not be consulted. Maps to 500.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Maps a raw token to a subject identifier.
pub trait CredentialResolver: Send + Sync + 'static {
    fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<String, ResolveError>>;
}

/// In-memory token table.
///
/// Lookups compare the presented token against every entry in constant time
/// and never exit early, so response timing does not reveal how close a guess
/// was or where in the table a match sits.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialResolver {
    entries: Vec<(String, String)>,
}

impl StaticCredentialResolver {
    pub fn new<I, T, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, S)>,
        T: Into<String>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(token, subject)| (token.into(), subject.into()))
                .collect(),
        }
    }

    /// The two accounts served by the demo binary.
    pub fn with_demo_users() -> Self {
        Self::new([
            ("valid-token-123", "user123"),
            ("admin-token-456", "admin456"),
        ])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, token: &str) -> Option<&str> {
        let mut found = None;
        for (candidate, subject) in &self.entries {
            let matches: bool = candidate.as_bytes().ct_eq(token.as_bytes()).into();
            if matches && found.is_none() {
                found = Some(subject.as_str());
            }
        }
        found
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<String, ResolveError>> {
        let result = self
            .lookup(token)
            .map(str::to_string)
            .ok_or(ResolveError::NotFound);
        Box::pin(async move { result })
    }
}

/// Parse `"<scheme> <token>"`.
///
/// The scheme matches case-insensitively. The token is trimmed and must not
/// contain inner whitespace.
pub fn parse_credential<'h>(
    header: Option<&'h str>,
    scheme: &str,
) -> Result<&'h str, CredentialError> {
    let header = header
        .filter(|h| !h.trim().is_empty())
        .ok_or(CredentialError::Missing)?;

    let Some((given_scheme, token)) = header.trim_start().split_once(' ') else {
        return Err(CredentialError::Malformed);
    };
    if !given_scheme.eq_ignore_ascii_case(scheme) {
        return Err(CredentialError::Malformed);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(CredentialError::EmptyToken);
    }
    if token.contains(char::is_whitespace) {
        return Err(CredentialError::Malformed);
    }
    Ok(token)
}

/// Read the credential from the `Authorization` header.
pub fn extract_credential<'h>(
    headers: &'h HeaderMap,
    scheme: &str,
) -> Result<&'h str, CredentialError> {
    let header = match headers.get(AUTHORIZATION) {
        Some(value) => Some(value.to_str().map_err(|_| CredentialError::Malformed)?),
        None => None,
    };
    parse_credential(header, scheme)
}

/// Interceptor that authenticates the caller and attaches a [`Principal`].
#[derive(Clone)]
pub struct PrincipalValidator {
    resolver: Arc<dyn CredentialResolver>,
    scheme: String,
    bypass_paths: Arc<[String]>,
}

impl PrincipalValidator {
    pub fn new(
        resolver: Arc<dyn CredentialResolver>,
        scheme: impl Into<String>,
        bypass_paths: Vec<String>,
    ) -> Self {
        Self {
            resolver,
            scheme: scheme.into(),
            bypass_paths: bypass_paths.into(),
        }
    }

    /// Bearer scheme with the default bypass paths.
    pub fn with_defaults(resolver: Arc<dyn CredentialResolver>) -> Self {
        Self::new(
            resolver,
            DEFAULT_SCHEME,
            DEFAULT_BYPASS_PATHS.iter().map(|p| (*p).to_string()).collect(),
        )
    }

    fn is_bypassed(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|p| p == path)
    }

    fn reject(
        &self,
        meta: &RequestMetadata,
        path: &str,
        reason: &'static str,
        rejection: Rejection,
        sink: &mut dyn ResponseSink,
    ) {
        warn!(
            target: "audit",
            identity = %meta.identity(),
            path = %path,
            reason,
            "Authentication failed"
        );
        metrics::record_auth_failure(reason);
        rejection.write_to(sink);
    }
}

impl Interceptor for PrincipalValidator {
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
            let path = req.uri().path().to_string();
            if self.is_bypassed(&path) {
                debug!(path = %path, "Bypassing auth");
                return next.run(req, meta, sink).await;
            }

            let token = match extract_credential(req.headers(), &self.scheme) {
                Ok(token) => token.to_string(),
                Err(err) => {
                    let rejection = Rejection::Unauthenticated(err.to_string());
                    self.reject(meta, &path, err.reason(), rejection, sink);
                    return Ok(());
                }
            };

            match self.resolver.resolve(&token).await {
                Ok(subject) => {
                    info!(subject = %subject, path = %path, "Authenticated request");
                    meta.attach_principal(Principal::new(subject, token))?;
                    next.run(req, meta, sink).await
                }
                Err(ResolveError::NotFound) => {
                    let rejection = Rejection::Unauthenticated("Invalid token".to_string());
                    self.reject(meta, &path, "invalid_token", rejection, sink);
                    Ok(())
                }
                Err(ResolveError::Unavailable(detail)) => {
                    let rejection =
                        Rejection::Internal(format!("credential resolver unavailable: {detail}"));
                    self.reject(meta, &path, "resolver_unavailable", rejection, sink);
                    Ok(())
                }
            }
        })
    }
}
