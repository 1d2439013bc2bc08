use crate::error::{AttemptSummary, ErrorKind};
use std::time::Duration;
use tokio::time::Instant;

/// Attempt history of one logical request.
///
/// Owned exclusively by the request it tracks; the [`RetryPolicy`](super::RetryPolicy)
/// mutates it after every failed attempt.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// Current attempt across every kind, starting at 1
    pub attempt_number: u32,
    /// Retries granted after `RequestRateTooLarge`
    pub throttle_retries: u32,
    /// Retries granted after `Gone` / `InvalidPartition`
    pub gone_retries: u32,
    /// Retries granted after transient failures
    pub transient_retries: u32,
    /// When the first attempt started
    pub start_time: Instant,
    /// Kind observed on the most recent failure
    pub last_error_kind: Option<ErrorKind>,
    /// Number of routing refreshes performed for this request
    pub routing_epoch: u32,
    /// Replicas in the currently resolved set
    pub replica_count: usize,
    /// Index of the replica the next attempt targets
    pub replica_index: usize,
    /// Replicas of the current routing epoch that failed transiently
    pub replicas_tried: usize,
}

impl AttemptContext {
    /// Start tracking a request now.
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// Start tracking a request that began at `start_time`.
    pub fn started_at(start_time: Instant) -> Self {
        Self {
            attempt_number: 1,
            throttle_retries: 0,
            gone_retries: 0,
            transient_retries: 0,
            start_time,
            last_error_kind: None,
            routing_epoch: 0,
            replica_count: 0,
            replica_index: 0,
            replicas_tried: 0,
        }
    }

    /// Set the size of a freshly resolved replica set.
    pub fn with_replicas(mut self, count: usize) -> Self {
        self.replica_count = count;
        self
    }

    /// Time since the first attempt started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Whether a replica of the current set has not failed yet.
    pub fn has_untried_replica(&self) -> bool {
        self.replicas_tried < self.replica_count
    }

    /// Record a transient failure of the current replica and move to the next one.
    pub(crate) fn advance_replica(&mut self) {
        self.replicas_tried += 1;
        if self.replica_count > 0 {
            self.replica_index = (self.replica_index + 1) % self.replica_count;
        }
    }

    /// Start a new routing epoch; the replica set is re-resolved before the next send.
    pub(crate) fn begin_routing_epoch(&mut self) {
        self.routing_epoch += 1;
        self.replicas_tried = 0;
        self.replica_index = 0;
    }

    /// Snapshot for surfacing with an error.
    pub fn summary(&self) -> AttemptSummary {
        AttemptSummary {
            attempts: self.attempt_number,
            last_kind: self.last_error_kind,
            elapsed: self.elapsed(),
        }
    }
}

impl Default for AttemptContext {
    fn default() -> Self {
        Self::new()
    }
}
