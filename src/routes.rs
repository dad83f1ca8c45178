//! Application routing.
//!
//! Cross-cutting behavior is attached per route as a [`MiddlewareChain`],
//! mounted through [`ChainService`](crate::middleware::ChainService). Router
//! level layers only cover transport concerns (tracing, CORS).
//!
//! # Route Groups
//!
//! ```text
//! GET    /health, /ready, /stats   no interceptors
//! POST   /user/login               Security → handler
//! GET    /user/info/{id}           Security → UserAgent → Logger → handler
//! PUT    /user/{id}                Security → RequestId → Logger → RateLimit → Auth → handler
//! DELETE /user/{id}                Security → RequestId → Logger → RateLimit → Auth → handler
//! ```
//!
//! Both protected routes share one limiter, so a client's budget covers
//! updates and deletes together.

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::routing::{get, get_service, post_service, put_service};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, info, info_span};

use crate::handlers;
use crate::middleware::{
    Handler, HandlerFn, MiddlewareChain, PrincipalValidator, RateLimit, RequestIdTagger,
    RequestLogger, SecurityGuard, UserAgentTagger,
};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Middleware Configuration
///
/// - **Rate Limiting**: added to protected chains if the state has a limiter
/// - **Authentication**: bearer scheme and bypass paths from config
/// - **CORS**: Configured from `cors_allowed_origins`
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    // =========================================================================
    // Interceptor Chains
    // =========================================================================
    let login_chain = MiddlewareChain::new(handlers::Login::new(config.max_request_body_size))
        .with(SecurityGuard::new(config.max_request_body_size));

    let info_chain = MiddlewareChain::new(HandlerFn::new(handlers::user_info))
        .with(SecurityGuard::new(config.max_request_body_size))
        .with(UserAgentTagger::new())
        .with(RequestLogger::new(config.log_body_threshold));

    let update_chain = protected_chain(
        &state,
        handlers::UpdateUser::new(config.max_request_body_size),
    );
    let delete_chain = protected_chain(&state, HandlerFn::new(handlers::delete_user));
    info!(
        interceptors = ?update_chain.names(),
        "Protected chain configured"
    );

    let proxies = state.trusted_proxies.clone();
    info!(
        max_body_bytes = config.max_request_body_size,
        "Request body size limit configured"
    );

    // =========================================================================
    // Build Router with Routes
    // =========================================================================
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/stats", get(handlers::stats))
        .route(
            "/user/login",
            post_service(login_chain.into_service(proxies.clone())),
        )
        .route(
            "/user/info/{id}",
            get_service(info_chain.into_service(proxies.clone())),
        )
        .route(
            "/user/{id}",
            put_service(update_chain.into_service(proxies.clone()))
                .delete_service(delete_chain.into_service(proxies)),
        );

    // =========================================================================
    // Apply Transport Layers (order matters - applied bottom to top)
    // =========================================================================

    // 1. CORS
    router = router.layer(build_cors_layer(&config.cors_allowed_origins));

    // 2. Tracing; request_id is filled in by RequestIdTagger
    router = router.layer(TraceLayer::new_for_http().make_span_with(make_request_span));

    router.with_state(state)
}

/// Security → RequestId → Logger → RateLimit → Auth → `handler`.
fn protected_chain(state: &AppState, handler: impl Handler) -> MiddlewareChain {
    let config = &state.config;

    let mut chain = MiddlewareChain::new(handler)
        .with(SecurityGuard::new(config.max_request_body_size))
        .with(RequestIdTagger::new())
        .with(RequestLogger::new(config.log_body_threshold));

    if let Some(limiter) = state.limiter() {
        chain = chain.with(RateLimit::new(limiter.clone()));
    }

    chain.with(PrincipalValidator::new(
        state.resolver.clone(),
        config.auth_scheme.clone(),
        config.auth_bypass_paths.clone(),
    ))
}

fn make_request_span(req: &Request<Body>) -> Span {
    info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
        request_id = tracing::field::Empty,
    )
}

/// Build CORS layer from configuration.
///
/// # Security Note
///
/// Using `*` (any origin) is convenient for development but should be
/// avoided in production. Specify explicit origins instead.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if allowed_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}
