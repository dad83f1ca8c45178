//! Demo user endpoints.
//!
//! # Endpoints
//!
//! - `POST /user/login` - Exchange username/password for a bearer token (security chain)
//! - `GET /user/info/{id}` - Public profile (user agent + logging chain)
//! - `PUT /user/{id}` - Update a profile (full protected chain)
//! - `DELETE /user/{id}` - Delete a profile (full protected chain)
//!
//! Handlers behind a chain read what the interceptors recorded from
//! [`RequestMetadata`]: the authenticated principal, the user agent and the
//! request start time. Nothing is persisted.
//!
//! # Permissions
//!
//! Subjects starting with `admin` may modify any user. Other subjects may
//! only modify themselves (`user123` owns id `123`).

use axum::Json;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::middleware::chain::{BoxFuture, Handler};
use crate::middleware::metadata::{Principal, RequestMetadata, mask_credential};
use crate::middleware::security::read_limited_body;
use crate::models::{LoginRequest, LoginResponse, UpdateUserRequest, UserResponse};

struct DemoAccount {
    username: &'static str,
    password: &'static str,
    token: &'static str,
    id: i64,
}

/// Accounts matching `StaticCredentialResolver::with_demo_users`.
const DEMO_ACCOUNTS: [DemoAccount; 2] = [
    DemoAccount {
        username: "user123",
        password: "password123",
        token: "valid-token-123",
        id: 123,
    },
    DemoAccount {
        username: "admin456",
        password: "admin123",
        token: "admin-token-456",
        id: 456,
    },
];

const DEFAULT_AGE: u32 = 25;

// =============================================================================
// Login
// =============================================================================

/// Check demo credentials and issue the matching bearer token.
///
/// Unknown users and wrong passwords get the same 401 response.
#[instrument(skip(req), fields(username = %req.username))]
pub fn authenticate(req: &LoginRequest) -> AppResult<LoginResponse> {
    let account = DEMO_ACCOUNTS
        .iter()
        .find(|a| a.username == req.username)
        .filter(|a| bool::from(a.password.as_bytes().ct_eq(req.password.as_bytes())))
        .ok_or_else(|| {
            warn!(username = %req.username, "Login failed");
            AppError::Unauthorized("Invalid username or password".to_string())
        })?;

    info!(username = account.username, user_id = account.id, "User logged in");

    Ok(LoginResponse {
        token: account.token.to_string(),
        user: UserResponse {
            id: account.id,
            name: account.username.to_string(),
            age: DEFAULT_AGE,
        },
    })
}

/// `POST /user/login`
#[derive(Debug, Clone)]
pub struct Login {
    max_body_size: usize,
}

impl Login {
    pub fn new(max_body_size: usize) -> Self {
        Self { max_body_size }
    }
}

impl Handler for Login {
    fn call<'a>(
        &'a self,
        req: Request<Body>,
        _meta: &'a RequestMetadata,
    ) -> BoxFuture<'a, AppResult<Response<Body>>> {
        Box::pin(async move {
            let bytes = read_limited_body(req.into_body(), self.max_body_size).await?;
            let credentials: LoginRequest = serde_json::from_slice(&bytes)?;
            Ok(Json(authenticate(&credentials)?).into_response())
        })
    }
}

// =============================================================================
// Chain handlers
// =============================================================================

/// Parse the trailing `{id}` segment of the request path.
pub fn user_id_from_path(path: &str) -> AppResult<i64> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::BadRequest("Invalid user id".to_string()))
}

/// Whether `subject` may modify the user with `target_id`.
pub fn can_modify(subject: &str, target_id: i64) -> bool {
    subject.starts_with("admin") || subject == format!("user{target_id}")
}

fn authorize(meta: &RequestMetadata, target_id: i64, action: &str) -> AppResult<Principal> {
    // The chain guarantees auth ran before the handler
    let principal = meta
        .principal()
        .cloned()
        .ok_or_else(|| AppError::Internal(format!("{action} reached without a principal")))?;

    if !can_modify(principal.subject(), target_id) {
        warn!(
            subject = %principal.subject(),
            target_id,
            action,
            "Permission denied"
        );
        return Err(AppError::Forbidden("Permission denied".to_string()));
    }
    Ok(principal)
}

/// `GET /user/info/{id}`
pub fn user_info(req: Request<Body>, meta: &RequestMetadata) -> AppResult<Response<Body>> {
    let id = user_id_from_path(req.uri().path())?;

    info!(
        user_id = id,
        user_agent = meta.user_agent().unwrap_or_default(),
        elapsed_ms = meta.started_at().elapsed().as_millis() as u64,
        "Serving user info"
    );

    Ok(Json(UserResponse {
        id,
        name: format!("user{id}"),
        age: DEFAULT_AGE,
    })
    .into_response())
}

/// `PUT /user/{id}`
///
/// The body is optional; missing fields fall back to placeholder values.
#[derive(Debug, Clone)]
pub struct UpdateUser {
    max_body_size: usize,
}

impl UpdateUser {
    pub fn new(max_body_size: usize) -> Self {
        Self { max_body_size }
    }

    async fn update(&self, req: Request<Body>, meta: &RequestMetadata) -> AppResult<Response<Body>> {
        let id = user_id_from_path(req.uri().path())?;
        let principal = authorize(meta, id, "update")?;

        let bytes = read_limited_body(req.into_body(), self.max_body_size).await?;
        let update: UpdateUserRequest = if bytes.is_empty() {
            UpdateUserRequest::default()
        } else {
            serde_json::from_slice(&bytes)?
        };

        info!(
            subject = %principal.subject(),
            token = %mask_credential(principal.credential()),
            user_agent = meta.user_agent().unwrap_or_default(),
            user_id = id,
            "Updating user"
        );

        Ok(Json(UserResponse {
            id,
            name: update.name.unwrap_or_else(|| format!("updated_user_{id}")),
            age: update.age.unwrap_or(DEFAULT_AGE + 1),
        })
        .into_response())
    }
}

impl Handler for UpdateUser {
    fn call<'a>(
        &'a self,
        req: Request<Body>,
        meta: &'a RequestMetadata,
    ) -> BoxFuture<'a, AppResult<Response<Body>>> {
        Box::pin(self.update(req, meta))
    }
}

/// `DELETE /user/{id}`
pub fn delete_user(req: Request<Body>, meta: &RequestMetadata) -> AppResult<Response<Body>> {
    let id = user_id_from_path(req.uri().path())?;
    let principal = authorize(meta, id, "delete")?;

    info!(subject = %principal.subject(), user_id = id, "Deleted user");
    Ok(StatusCode::NO_CONTENT.into_response())
}
