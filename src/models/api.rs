//! Request and response bodies for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credentials submitted to `POST /user/login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Successful login: the bearer token to use on protected routes.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

/// Optional fields accepted by `PUT /user/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub age: Option<u32>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserResponse {
    pub id: i64,
    pub name: String,
    pub age: u32,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Service version
    pub version: String,
    /// Whether the rate limiter is active
    pub rate_limiting: bool,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Admission statistics.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Identities with a live rate limit record
    pub tracked_visitors: usize,
    /// Sliding window length, `None` when rate limiting is disabled
    pub window_secs: Option<u64>,
    /// Requests admitted per window
    pub max_requests: Option<usize>,
    /// Service uptime in seconds
    pub uptime_seconds: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_login_request_deserialization() {
        let json = r#"{"username": "user123", "password": "password123"}"#;
        let req: LoginRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.username, "user123");
        assert_eq!(req.password, "password123");
    }

    #[test]
    fn test_update_request_fields_optional() {
        let req: UpdateUserRequest = serde_json::from_str("{}").unwrap();
        assert!(req.name.is_none());
        assert!(req.age.is_none());
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.1.0".to_string(),
            rate_limiting: true,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&response).expect("Serialization should succeed");
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"rate_limiting\":true"));
    }
}
