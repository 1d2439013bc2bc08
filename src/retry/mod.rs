//! Retry decisions for classified failures.
//!
//! # Module Organization
//!
//! ```text
//! retry/
//! ├── backoff - Exponential backoff helpers
//! ├── context - Per-request attempt tracking
//! └── policy  - Per-kind retry policy
//! ```
//!
//! # Policy Table
//!
//! | Kind | Decision | Bounds | Routing refresh |
//! |------|----------|--------|-----------------|
//! | `RequestRateTooLarge` | `RetryAfter(server delay or backoff)` | `max_throttle_retries` and `max_throttle_wait_ms`, whichever is hit first | no |
//! | `Gone`, `InvalidPartition` | `RetryAfter(backoff)` | `max_gone_retries` + elapsed time | yes |
//! | `ServiceUnavailable`, `RequestTimeout`, `TransportFailure` | `RetryNow` on next replica | `max_transient_retries` + elapsed time | only when every replica failed |
//! | everything else | `Fail` | - | - |
//!
//! Each kind counts its own retries in [`AttemptContext`], so throttling does not use
//! up the budget of a later `Gone` or replica failure.

mod backoff;
mod context;
mod policy;

pub use backoff::{bounded_backoff, exponential_backoff};
pub use context::AttemptContext;
pub use policy::RetryPolicy;

use crate::error::ErrorKind;
use std::time::Duration;

/// What the pipeline should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-send immediately to the next replica of the same range
    RetryNow,
    /// Wait `delay`, optionally re-resolve routing, then re-send
    RetryAfter {
        /// How long to wait before re-sending
        delay: Duration,
        /// Whether the partition routing must be refreshed first
        refresh_routing: bool,
    },
    /// Surface the error
    Fail(ErrorKind),
}

impl RetryDecision {
    /// Whether the request will be sent again.
    pub fn is_retry(&self) -> bool {
        !matches!(self, Self::Fail(_))
    }
}
