use std::time::Duration;

/// Exponential backoff delay calculation.
///
/// `base_ms * 2^attempt`, with the exponent clamped at 10 and saturating arithmetic.
///
/// # Examples
///
/// ```
/// use docdb_direct::retry::exponential_backoff;
/// use std::time::Duration;
///
/// assert_eq!(exponential_backoff(0, 100), Duration::from_millis(100));
/// assert_eq!(exponential_backoff(2, 100), Duration::from_millis(400));
/// ```
pub fn exponential_backoff(attempt: u32, base_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2_u64.pow(attempt.min(10)));
    Duration::from_millis(delay_ms)
}

/// [`exponential_backoff`] capped at `max`.
pub fn bounded_backoff(attempt: u32, base_ms: u64, max: Duration) -> Duration {
    exponential_backoff(attempt, base_ms).min(max)
}
