//! # Gatehouse
//!
//! A request admission pipeline for Axum services:
//!
//! - **Interceptor chains**: ordered, per-route cross-cutting stages with
//!   short-circuit support and a shared metadata bag
//! - **Rate limiting**: per-client sliding window with background eviction
//! - **Authentication**: bearer credentials resolved to a principal
//! - **Observability**: request IDs, structured request logs with captured
//!   response metadata, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport layers (Trace → CORS → Body limit)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ChainService (client identity, metadata, response sink)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MiddlewareChain (Security → RequestId → Logger → ...)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, users)                                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gatehouse::middleware::StaticCredentialResolver;
//! use gatehouse::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config, Arc::new(StaticCredentialResolver::with_demo_users()))?;
//!     let app = build_router(state.clone());
//!
//!     // Start the server...
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Rate Limiting
//!
//! ```bash
//! RATE_LIMIT_WINDOW_SECS=60 RATE_LIMIT_MAX_REQUESTS=100 cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
