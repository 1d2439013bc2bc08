//! Per-session LSN tracking for read-your-write consistency.
//!
//! Requests of one session are routed to different replicas of the same partition key
//! range. To keep observing its own writes, the client remembers the highest LSN it
//! has seen per range and asks every later request to that range to be served at
//! least at that LSN.
//!
//! # Thread Safety
//!
//! [`SessionState`] is shared by every in-flight request on a session. Each range owns
//! an `AtomicI64` updated with `fetch_max`, so concurrent observers never lose the
//! larger value and never coordinate across ranges. The outer map lock is only taken
//! for writing when a range is seen for the first time.

use crate::protocol::constants::NO_LSN;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Highest observed LSN per partition key range.
///
/// Cloning yields another handle to the same state.
///
/// # Examples
///
/// ```
/// use docdb_direct::SessionState;
///
/// let session = SessionState::new();
/// session.observe("0", 10);
/// session.observe("0", 7); // stale response, ignored
///
/// assert_eq!(session.required_lsn("0"), 10);
/// assert_eq!(session.required_lsn("1"), -1);
/// assert_eq!(session.session_token("0").as_deref(), Some("0:10"));
/// ```
#[derive(Clone, Default)]
pub struct SessionState {
    ranges: Arc<RwLock<HashMap<String, Arc<AtomicI64>>>>,
}

impl SessionState {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `lsn` was observed on `partition_key_range_id`.
    ///
    /// Monotone: a value lower than the tracked one is a no-op. Responses without a
    /// range or without an LSN (`< 0`) are ignored. Returns the tracked value after
    /// the update, or `None` when ignored.
    pub fn observe(&self, partition_key_range_id: &str, lsn: i64) -> Option<i64> {
        if partition_key_range_id.is_empty() || lsn < 0 {
            return None;
        }

        let slot = self.slot(partition_key_range_id);
        let previous = slot.fetch_max(lsn, Ordering::AcqRel);
        let current = previous.max(lsn);

        if previous > lsn {
            tracing::debug!(
                partition_key_range_id,
                lsn,
                tracked = previous,
                "ignoring stale lsn"
            );
        } else if previous < lsn {
            tracing::debug!(partition_key_range_id, lsn, "session lsn advanced");
        }
        Some(current)
    }

    /// Minimum LSN a read on `partition_key_range_id` must observe; `-1` if unknown.
    pub fn required_lsn(&self, partition_key_range_id: &str) -> i64 {
        self.ranges
            .read()
            .get(partition_key_range_id)
            .map(|slot| slot.load(Ordering::Acquire))
            .unwrap_or(NO_LSN)
    }

    /// Session token for one range, `"<range>:<lsn>"`, if the range was observed.
    pub fn session_token(&self, partition_key_range_id: &str) -> Option<String> {
        let lsn = self.required_lsn(partition_key_range_id);
        (lsn != NO_LSN).then(|| format!("{}:{}", partition_key_range_id, lsn))
    }

    /// Merge a session token header of comma-separated `<range>:<lsn>` pairs.
    ///
    /// The LSN part may be a `#`-separated vector (`<version>#<lsn>#...`), in which case
    /// the second element is the LSN. Malformed entries are skipped. Returns the number
    /// of entries applied.
    pub fn merge_session_token(&self, token: &str) -> usize {
        token
            .split(',')
            .filter_map(parse_token_entry)
            .filter(|(range, lsn)| self.observe(range, *lsn).is_some())
            .count()
    }

    /// Copy of every tracked range and its LSN.
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.ranges
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Acquire)))
            .collect()
    }

    /// Number of tracked ranges.
    pub fn len(&self) -> usize {
        self.ranges.read().len()
    }

    /// Whether no range was observed yet.
    pub fn is_empty(&self) -> bool {
        self.ranges.read().is_empty()
    }

    fn slot(&self, partition_key_range_id: &str) -> Arc<AtomicI64> {
        if let Some(slot) = self.ranges.read().get(partition_key_range_id) {
            return slot.clone();
        }
        self.ranges
            .write()
            .entry(partition_key_range_id.to_string())
            .or_insert_with(|| Arc::new(AtomicI64::new(NO_LSN)))
            .clone()
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("ranges", &self.snapshot())
            .finish()
    }
}

fn parse_token_entry(entry: &str) -> Option<(&str, i64)> {
    let (range, value) = entry.trim().split_once(':')?;
    let range = range.trim();
    if range.is_empty() {
        return None;
    }
    let mut parts = value.trim().split('#');
    let first = parts.next()?;
    let lsn = parts.next().unwrap_or(first);
    lsn.trim().parse().ok().map(|lsn| (range, lsn))
}
