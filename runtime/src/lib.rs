//! # Eventgate Runtime
//!
//! Resilience primitives shared by the Eventgate broker frontend.
//!
//! Currently this is the per-broker circuit breaking used on the publish
//! path: a registry of small state machines, one per broker id, consulted
//! before every producer send and fed with classified outcomes afterwards.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;

pub use circuit_breaker::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, State,
};
