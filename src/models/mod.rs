mod api;

pub use api::{
    HealthResponse, LoginRequest, LoginResponse, StatsResponse, UpdateUserRequest, UserResponse,
};
