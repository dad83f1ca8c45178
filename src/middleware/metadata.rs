//! Request-scoped metadata shared along the middleware chain.
//!
//! One [`RequestMetadata`] is created per request by the chain service and
//! passed by `&mut` to every interceptor and by `&` to the terminal handler.
//! It is dropped when the request completes.
//!
//! Well-known keys have typed accessors. Anything else goes into the
//! type-keyed extension map, which is insert-once: a value stored by an
//! earlier interceptor cannot be replaced by a later one.

use std::fmt;

use axum::http::Extensions;
use thiserror::Error;
use tokio::time::Instant;

/// Errors raised when mutating request metadata.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataError {
    /// The key already holds a value and metadata is append-only.
    #[error("request metadata key '{0}' is already set")]
    AlreadySet(&'static str),
}

/// An authenticated caller.
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    subject: String,
    credential: String,
}

impl Principal {
    pub fn new(subject: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            credential: credential.into(),
        }
    }

    /// Opaque subject identifier returned by the credential resolver.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The raw credential the caller presented.
    pub fn credential(&self) -> &str {
        &self.credential
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("subject", &self.subject)
            .field("credential", &mask_credential(&self.credential))
            .finish()
    }
}

/// Mask a credential for display, keeping at most four characters on each end.
pub fn mask_credential(credential: &str) -> String {
    let chars: Vec<char> = credential.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars.iter().take(4).collect();
    let tail: String = chars.iter().skip(chars.len() - 4).collect();
    format!("{head}***{tail}")
}

/// Per-request metadata bag.
#[derive(Debug)]
pub struct RequestMetadata {
    identity: String,
    started_at: Instant,
    principal: Option<Principal>,
    request_id: Option<String>,
    user_agent: Option<String>,
    extensions: Extensions,
}

impl RequestMetadata {
    pub fn new(identity: impl Into<String>) -> Self {
        Self::with_start(identity, Instant::now())
    }

    pub fn with_start(identity: impl Into<String>, started_at: Instant) -> Self {
        Self {
            identity: identity.into(),
            started_at,
            principal: None,
            request_id: None,
            user_agent: None,
            extensions: Extensions::new(),
        }
    }

    /// Client identity used as the rate-limit and audit key. Never empty.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn attach_principal(&mut self, principal: Principal) -> Result<(), MetadataError> {
        set_once(&mut self.principal, principal, "principal")
    }

    pub fn set_request_id(&mut self, request_id: impl Into<String>) -> Result<(), MetadataError> {
        set_once(&mut self.request_id, request_id.into(), "request_id")
    }

    pub fn set_user_agent(&mut self, user_agent: impl Into<String>) -> Result<(), MetadataError> {
        set_once(&mut self.user_agent, user_agent.into(), "user_agent")
    }

    /// Store a typed value. Fails if a value of the same type is present.
    pub fn insert<T>(&mut self, value: T) -> Result<(), MetadataError>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.extensions.get::<T>().is_some() {
            return Err(MetadataError::AlreadySet(std::any::type_name::<T>()));
        }
        self.extensions.insert(value);
        Ok(())
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.extensions.get::<T>()
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, key: &'static str) -> Result<(), MetadataError> {
    if slot.is_some() {
        return Err(MetadataError::AlreadySet(key));
    }
    *slot = Some(value);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct TenantId(u32);

    #[test]
    fn test_principal_debug_masks_credential() {
        let principal = Principal::new("user123", "valid-token-123");
        let debug = format!("{principal:?}");

        assert!(debug.contains("user123"));
        assert!(!debug.contains("valid-token-123"));
        assert!(debug.contains("vali***-123"));
    }

    #[test]
    fn test_mask_short_credential() {
        assert_eq!(mask_credential("abc"), "***");
        assert_eq!(mask_credential("12345678"), "***");
        assert_eq!(mask_credential("123456789"), "1234***6789");
    }

    #[test]
    fn test_principal_attached_once() {
        let mut meta = RequestMetadata::new("1.2.3.4");
        assert!(meta.principal().is_none());

        meta.attach_principal(Principal::new("a", "t1")).unwrap();
        let err = meta.attach_principal(Principal::new("b", "t2")).unwrap_err();

        assert_eq!(err, MetadataError::AlreadySet("principal"));
        assert_eq!(meta.principal().unwrap().subject(), "a");
    }

    #[test]
    fn test_well_known_keys() {
        let mut meta = RequestMetadata::new("10.0.0.1");
        meta.set_request_id("req-1").unwrap();
        meta.set_user_agent("curl/8.0").unwrap();

        assert_eq!(meta.identity(), "10.0.0.1");
        assert_eq!(meta.request_id(), Some("req-1"));
        assert_eq!(meta.user_agent(), Some("curl/8.0"));
        assert!(meta.set_request_id("req-2").is_err());
    }

    #[test]
    fn test_extensions_are_insert_once() {
        let mut meta = RequestMetadata::new("unknown");
        assert!(meta.get::<TenantId>().is_none());

        meta.insert(TenantId(7)).unwrap();
        assert!(matches!(
            meta.insert(TenantId(8)),
            Err(MetadataError::AlreadySet(_))
        ));
        assert_eq!(meta.get::<TenantId>(), Some(&TenantId(7)));
    }
}
