//! Retry and quality-acceptance policies.

mod acceptance;
mod retry;

pub use acceptance::{AcceptancePolicy, SkipReason, Verdict};
pub use retry::{
    BackoffPolicy, ExponentialBackoff, FixedBackoff, RetryDecision, RetryPolicy,
    ScheduledBackoff,
};
