use super::{bounded_backoff, AttemptContext, RetryDecision};
use crate::config::RetryOptions;
use crate::error::{ClientError, ErrorKind};
use std::time::Duration;

/// Decides whether and how a failed attempt is retried.
///
/// Every decision is bounded: once the retry count or the elapsed-time bound of the
/// failure's kind is exceeded the policy returns [`RetryDecision::Fail`], whatever the
/// kind. Retry counts are kept per kind, so retries of one kind never spend the
/// budget of another.
///
/// # Examples
///
/// ```
/// use docdb_direct::{classify, protocol::Headers, AttemptContext, RetryDecision, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// let mut ctx = AttemptContext::new();
///
/// let headers = Headers::from_pairs([("x-ms-retry-after-ms", "50")]);
/// let throttled = classify(429, Some(&headers), b"", None).unwrap();
///
/// assert_eq!(
///     policy.decide(&throttled, &mut ctx),
///     RetryDecision::RetryAfter { delay: Duration::from_millis(50), refresh_routing: false },
/// );
/// assert_eq!(ctx.attempt_number, 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    /// Create a policy with the given bounds.
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    /// The configured bounds.
    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Decide what to do after `error` ended the attempt tracked by `ctx`.
    ///
    /// Records the kind in `ctx.last_error_kind`; on a retry also advances
    /// `ctx.attempt_number`, the retry count of the kind and, where applicable, the
    /// replica rotation or routing epoch.
    pub fn decide(&self, error: &ClientError, ctx: &mut AttemptContext) -> RetryDecision {
        let kind = error.kind();
        ctx.last_error_kind = Some(kind);

        let decision = match kind {
            ErrorKind::RequestRateTooLarge => self.decide_throttled(error, ctx),
            ErrorKind::Gone | ErrorKind::InvalidPartition => {
                self.decide_topology_change(ctx)
            }
            ErrorKind::ServiceUnavailable
            | ErrorKind::RequestTimeout
            | ErrorKind::TransportFailure => self.decide_transient(ctx),
            _ => None,
        };

        match decision {
            Some(decision) => {
                if let RetryDecision::RetryAfter {
                    refresh_routing: true,
                    ..
                } = decision
                {
                    ctx.begin_routing_epoch();
                }
                ctx.attempt_number += 1;
                tracing::debug!(
                    kind = %kind,
                    next_attempt = ctx.attempt_number,
                    ?decision,
                    "retrying failed attempt"
                );
                decision
            }
            None => RetryDecision::Fail(kind),
        }
    }

    // The header, not the metadata, decides between server delay and backoff: the
    // metadata of a header-less 429 already holds the floor.
    fn decide_throttled(
        &self,
        error: &ClientError,
        ctx: &mut AttemptContext,
    ) -> Option<RetryDecision> {
        if ctx.throttle_retries >= self.options.max_throttle_retries {
            return None;
        }
        let delay = match error.headers().retry_after_ms() {
            Some(ms) => Duration::from_millis(ms),
            None => bounded_backoff(
                ctx.throttle_retries,
                self.options.default_retry_after_ms,
                self.options.max_backoff(),
            ),
        };
        within_budget(ctx.elapsed(), delay, self.options.max_throttle_wait())?;
        ctx.throttle_retries += 1;
        Some(RetryDecision::RetryAfter {
            delay,
            refresh_routing: false,
        })
    }

    fn decide_topology_change(&self, ctx: &mut AttemptContext) -> Option<RetryDecision> {
        if ctx.gone_retries >= self.options.max_gone_retries {
            return None;
        }
        let delay = bounded_backoff(
            ctx.gone_retries,
            self.options.gone_backoff_ms,
            self.options.max_backoff(),
        );
        within_budget(ctx.elapsed(), delay, self.options.transient_time_budget())?;
        ctx.gone_retries += 1;
        Some(RetryDecision::RetryAfter {
            delay,
            refresh_routing: true,
        })
    }

    fn decide_transient(&self, ctx: &mut AttemptContext) -> Option<RetryDecision> {
        if ctx.transient_retries >= self.options.max_transient_retries {
            return None;
        }
        let budget = self.options.transient_time_budget();
        within_budget(ctx.elapsed(), Duration::ZERO, budget)?;

        ctx.advance_replica();
        if ctx.has_untried_replica() {
            ctx.transient_retries += 1;
            return Some(RetryDecision::RetryNow);
        }
        if ctx.routing_epoch >= self.options.max_routing_refreshes {
            return None;
        }
        let delay = bounded_backoff(
            ctx.routing_epoch,
            self.options.gone_backoff_ms,
            self.options.max_backoff(),
        );
        within_budget(ctx.elapsed(), delay, budget)?;
        ctx.transient_retries += 1;
        Some(RetryDecision::RetryAfter {
            delay,
            refresh_routing: true,
        })
    }
}

fn within_budget(elapsed: Duration, delay: Duration, budget: Duration) -> Option<()> {
    (elapsed.saturating_add(delay) < budget).then_some(())
}
