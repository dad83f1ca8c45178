mod health;
pub mod users;

pub use health::{health_check, readiness_check, stats};
pub use users::{Login, UpdateUser, authenticate, delete_user, user_info};
