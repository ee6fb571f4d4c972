//! Request admission and failure-recovery primitives.
//!
//! - [`RateLimiter`] decides whether a new request may start at all.
//! - [`ConcurrencyGate`] caps how many upstream calls run at once.
//! - [`execute_with_retry_async`] re-runs transient failures with linear backoff.
//! - [`ErrorKind`] is the failure taxonomy every coordinator reports in.

mod gate;
mod kind;
mod rate_limit;
mod retry;
pub mod serde_millis;

pub use gate::{ConcurrencyGate, GateClosed, GatePermit, GateStats};
pub use kind::ErrorKind;
pub use rate_limit::{RateLimitConfig, RateLimitStats, RateLimiter};
pub use retry::{execute_with_retry_async, RetryConfig, RetryResult, Retryable};
