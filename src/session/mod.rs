pub mod manager;
pub mod schedule;
pub mod store;

pub use manager::{AuthPhase, AuthStatus, TokenManager};
