// Risk controls for settlement attempts
pub mod controls;

pub use controls::{BreakerConfig, BreakerState, CircuitBreaker};
