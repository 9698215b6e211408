//! Utility modules for connector development.

pub mod health;
pub mod payload;

// Re-export commonly used types
pub use health::{HealthState, LifecycleState};
pub use payload::json_or_string;
