//! Shared application state.
//!
//! Holds the pieces the interceptor chains are assembled from:
//!
//! - **Configuration**: runtime configuration access
//! - **Limiter**: the single [`SlidingWindowLimiter`] shared by every rate
//!   limited route, plus its eviction task
//! - **Resolver**: the credential resolver used by authentication
//! - **Trusted proxies**: parsed CIDR ranges for identity resolution
//!
//! # Structured Concurrency
//!
//! The eviction task is started by [`AppState::new`] (which must run inside a
//! Tokio runtime) and stopped by [`AppState::shutdown`]. Dropping the last
//! clone of the state cancels it as well.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::config::Config;
use crate::error::AppResult;
use crate::middleware::auth::CredentialResolver;
use crate::middleware::ip::TrustedProxyConfig;
use crate::middleware::sliding_window::{EvictionTask, SlidingWindowLimiter};

/// Shared application state, cheap to clone.
///
/// ```rust,ignore
/// let state = AppState::new(config, Arc::new(StaticCredentialResolver::with_demo_users()))?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Application configuration
    pub config: Arc<Config>,
    /// Credential resolver for authentication
    pub resolver: Arc<dyn CredentialResolver>,
    /// Ranges allowed to set forwarding headers
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// `None` when rate limiting is disabled
    limiter: Option<Arc<SlidingWindowLimiter>>,
    eviction: Option<Arc<EvictionTask>>,
}

impl AppState {
    /// Build state and start the eviction task if rate limiting is enabled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` for invalid rate limit settings.
    pub fn new(config: Config, resolver: Arc<dyn CredentialResolver>) -> AppResult<Self> {
        let (limiter, eviction) = match config.limiter_settings()? {
            Some(settings) => {
                let limiter = Arc::new(SlidingWindowLimiter::new(settings));
                let eviction = Arc::new(limiter.spawn_eviction());
                (Some(limiter), Some(eviction))
            }
            None => {
                info!("Rate limiting disabled");
                (None, None)
            }
        };

        Ok(Self {
            started_at: Instant::now(),
            trusted_proxies: Arc::new(TrustedProxyConfig::new(&config.trusted_proxies)),
            config: Arc::new(config),
            resolver,
            limiter,
            eviction,
        })
    }

    pub fn limiter(&self) -> Option<&Arc<SlidingWindowLimiter>> {
        self.limiter.as_ref()
    }

    /// Ready while the eviction task (if any) is still running.
    pub fn is_ready(&self) -> bool {
        self.eviction.as_ref().is_none_or(|task| !task.is_finished())
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");
        if let Some(eviction) = &self.eviction {
            eviction.shutdown().await;
        }
        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::middleware::auth::StaticCredentialResolver;
    use std::time::Duration;

    fn resolver() -> Arc<dyn CredentialResolver> {
        Arc::new(StaticCredentialResolver::with_demo_users())
    }

    #[tokio::test]
    async fn test_state_with_rate_limiting() {
        let state = AppState::new(Config::default(), resolver()).unwrap();

        assert!(state.limiter().is_some());
        assert!(!state.trusted_proxies.is_enabled());
        assert!(state.is_ready());
        state.shutdown().await;
        assert!(state.eviction.as_ref().unwrap().is_finished());
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_state_without_rate_limiting() {
        let config = Config {
            rate_limit_max_requests: 0,
            ..Config::default()
        };
        let state = AppState::new(config, resolver()).unwrap();

        assert!(state.limiter().is_none());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_limiter_settings_rejected() {
        let config = Config {
            rate_limit_sweep_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(AppState::new(config, resolver()).is_err());
    }
}
