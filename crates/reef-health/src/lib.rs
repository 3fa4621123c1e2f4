//! # Reef Health
//!
//! Failure isolation for plugin operations:
//! - Consecutive-failure circuit breaker with a single half-open probe
//! - Per-subject breaker registry
//! - Audited administrative reset/trip
//! - Panic-recovering guarded execution (sync and async)

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod circuit_breaker;
pub mod execute;

pub use circuit_breaker::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
    AUDIT_TARGET,
};
pub use execute::{safe_execute, safe_execute_async, ExecuteError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::circuit_breaker::{
        BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    };
    pub use crate::execute::{safe_execute, safe_execute_async, ExecuteError};
}
