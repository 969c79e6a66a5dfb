//! Outbound-call pacing and protection.
//!
//! - [`pacer`]: interval+jitter slot serializer; one shared instance per
//!   scanner account covers all of that account's REST calls.
//! - [`breaker`]: three-state circuit breaker per remote dependency.
//! - [`windows`]: count-within-window admission tiers for event intake.

mod breaker;
mod pacer;
mod windows;

pub use breaker::{BreakerState, CircuitBreaker};
pub use pacer::Pacer;
pub use windows::EventWindows;
