//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_WINDOW_SECS`: Sliding window length (default: 60)
//! - `RATE_LIMIT_MAX_REQUESTS`: Admissions per window per client (default: 100, 0 = disabled)
//! - `RATE_LIMIT_RETENTION_SECS`: Idle time before a client is forgotten (default: 600)
//! - `RATE_LIMIT_SWEEP_INTERVAL_SECS`: Eviction sweep period (default: 300)
//!
//! # Security Configuration
//!
//! - `AUTH_SCHEME`: Authorization scheme expected before the token (default: `Bearer`)
//! - `AUTH_BYPASS_PATHS`: Comma-separated paths served without credentials
//! - `TRUSTED_PROXIES`: CIDR ranges allowed to set forwarding headers
//! - `CORS_ALLOWED_ORIGINS`: Comma-separated list of allowed origins (default: `*` for dev)
//! - `MAX_REQUEST_BODY_SIZE`: Largest accepted request body in bytes (default: 10 MiB)
//!
//! # Observability
//!
//! - `RUST_LOG`: Log filter (default: `info`)
//! - `LOG_FORMAT`: `json` for JSON lines, anything else for human-readable output
//! - `LOG_BODY_THRESHOLD`: Bodies below this size are logged verbatim (default: 1000)
//! - `METRICS_PORT`: Prometheus listener port (default: 0 = disabled)

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::middleware::sliding_window::LimiterSettings;

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Length of the sliding window
    pub rate_limit_window: Duration,

    /// Admissions allowed per client per window. 0 disables rate limiting.
    pub rate_limit_max_requests: usize,

    /// Idle time after which a client's history is dropped
    pub rate_limit_retention: Duration,

    /// How often the eviction task runs
    pub rate_limit_sweep_interval: Duration,

    // =========================================================================
    // Request Limits
    // =========================================================================
    /// Maximum request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Scheme expected in the `Authorization` header
    pub auth_scheme: String,

    /// Paths that bypass authentication (exact match).
    /// Default: ["/health", "/ready"]
    pub auth_bypass_paths: Vec<String>,

    /// Allowed CORS origins. `*` allows all (not recommended for production).
    pub cors_allowed_origins: Vec<String>,

    /// Trusted proxy CIDR ranges.
    ///
    /// Forwarding headers are only believed from peers inside these ranges.
    /// Empty trusts every peer, which allows identity spoofing when the
    /// service is reachable directly.
    ///
    /// Common values:
    /// - Private networks: "10.0.0.0/8,172.16.0.0/12,192.168.0.0/16"
    /// - Docker: "172.17.0.0/16"
    /// - Localhost: "127.0.0.0/8,::1/128"
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log filter (e.g., "info", "gatehouse=debug")
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable output
    pub log_json: bool,

    /// Request and response bodies smaller than this are logged verbatim
    pub log_body_threshold: usize,

    /// Port for Prometheus metrics endpoint (0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a value does not parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,

            // Rate limiting
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_max_requests: Self::parse_env("RATE_LIMIT_MAX_REQUESTS", 100)?,
            rate_limit_retention: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_RETENTION_SECS",
                600,
            )?),
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                300,
            )?),

            // Request limits
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024)?, // 10MB

            // Security
            auth_scheme: env::var("AUTH_SCHEME")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Bearer".to_string()),
            auth_bypass_paths: Self::parse_auth_bypass_paths(),
            cors_allowed_origins: Self::parse_cors_origins(),
            trusted_proxies: Self::parse_trusted_proxies(),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            log_body_threshold: Self::parse_env("LOG_BODY_THRESHOLD", 1000)?,
            metrics_port: Self::parse_env("METRICS_PORT", 0)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    fn validate(&self) -> AppResult<()> {
        self.limiter_settings()?;

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.auth_scheme.contains(char::is_whitespace) {
            return Err(AppError::ConfigError(format!(
                "AUTH_SCHEME must be a single word, got '{}'",
                self.auth_scheme
            )));
        }

        Ok(())
    }

    /// Limiter parameters, or `None` when rate limiting is disabled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any rate limit duration is zero.
    pub fn limiter_settings(&self) -> AppResult<Option<LimiterSettings>> {
        if !self.rate_limiting_enabled() {
            return Ok(None);
        }
        LimiterSettings::new(
            self.rate_limit_window,
            self.rate_limit_max_requests,
            self.rate_limit_retention,
            self.rate_limit_sweep_interval,
        )
        .map(Some)
        .map_err(|e| AppError::ConfigError(e.to_string()))
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_max_requests > 0
    }

    /// Check if trusted proxy validation is enabled.
    pub fn proxy_validation_enabled(&self) -> bool {
        !self.trusted_proxies.is_empty()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address, or `None` if metrics are disabled.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn parse_cors_origins() -> Vec<String> {
        let raw = env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string());
        Self::split_list(&raw).collect()
    }

    /// Parse auth bypass paths. Entries not starting with `/` are ignored.
    ///
    /// Default: "/health,/ready"
    fn parse_auth_bypass_paths() -> Vec<String> {
        let raw = env::var("AUTH_BYPASS_PATHS").unwrap_or_else(|_| "/health,/ready".to_string());
        Self::split_list(&raw).filter(|p| p.starts_with('/')).collect()
    }

    /// Parse trusted proxy CIDR ranges. Default: empty (trust all sources).
    fn parse_trusted_proxies() -> Vec<String> {
        env::var("TRUSTED_PROXIES")
            .map(|raw| Self::split_list(&raw).collect())
            .unwrap_or_default()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 100,
            rate_limit_retention: Duration::from_secs(600),
            rate_limit_sweep_interval: Duration::from_secs(300),
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            auth_scheme: "Bearer".to_string(),
            auth_bypass_paths: vec!["/health".to_string(), "/ready".to_string()],
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![], // Empty = trust all (dev mode)
            log_level: "info".to_string(),
            log_json: false,
            log_body_threshold: 1000,
            metrics_port: 0,
        }
    }
}
