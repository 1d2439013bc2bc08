//! Partition routing collaborator.
//!
//! The pipeline does not own the partition-key-range table; it consults one through
//! [`RoutingTable`] and asks it to refresh when a replica reports that the range moved.

use crate::error::{ClientError, ErrorKind, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

/// The range and replica set currently serving a request key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRange {
    /// Partition key range id
    pub partition_key_range_id: String,
    /// Replica addresses, preferred first
    pub replicas: Vec<Url>,
}

impl ResolvedRange {
    /// Create a resolved range.
    pub fn new(partition_key_range_id: impl Into<String>, replicas: Vec<Url>) -> Self {
        Self {
            partition_key_range_id: partition_key_range_id.into(),
            replicas,
        }
    }
}

/// Resolves request keys to partition key ranges and their replicas.
#[async_trait]
pub trait RoutingTable: Send + Sync {
    /// Resolve the range and replica set serving `request_key`.
    async fn resolve_range(&self, request_key: &str) -> Result<ResolvedRange>;

    /// Invalidate cached routing for a range so the next resolve sees current topology.
    async fn refresh(&self, partition_key_range_id: &str) -> Result<()>;
}

#[async_trait]
impl<T: RoutingTable + ?Sized> RoutingTable for Arc<T> {
    async fn resolve_range(&self, request_key: &str) -> Result<ResolvedRange> {
        (**self).resolve_range(request_key).await
    }

    async fn refresh(&self, partition_key_range_id: &str) -> Result<()> {
        (**self).refresh(partition_key_range_id).await
    }
}

/// In-memory routing table.
///
/// Keys are assigned to ranges explicitly with [`assign`](Self::assign); unknown keys
/// fall back to the default range, if one is set. Topology changes are simulated with
/// [`assign`](Self::assign) or [`set_replicas`](Self::set_replicas). Refreshes are
/// counted for inspection.
///
/// # Examples
///
/// ```
/// use docdb_direct::routing::StaticRoutingTable;
/// use url::Url;
///
/// let table = StaticRoutingTable::new();
/// table.set_replicas("0", vec![Url::parse("https://replica-0:10253/").unwrap()]);
/// table.set_default_range("0");
/// assert_eq!(table.refresh_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct StaticRoutingTable {
    ranges: RwLock<HashMap<String, Vec<Url>>>,
    keys: RwLock<HashMap<String, String>>,
    default_range: RwLock<Option<String>>,
    refreshes: AtomicUsize,
}

impl StaticRoutingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with a single default range.
    pub fn single_range(partition_key_range_id: &str, replicas: Vec<Url>) -> Self {
        let table = Self::new();
        table.set_replicas(partition_key_range_id, replicas);
        table.set_default_range(partition_key_range_id);
        table
    }

    /// Replace the replica set of a range.
    pub fn set_replicas(&self, partition_key_range_id: &str, replicas: Vec<Url>) {
        self.ranges
            .write()
            .insert(partition_key_range_id.to_string(), replicas);
    }

    /// Route `request_key` to a range.
    pub fn assign(&self, request_key: &str, partition_key_range_id: &str) {
        self.keys
            .write()
            .insert(request_key.to_string(), partition_key_range_id.to_string());
    }

    /// Range used for keys without an explicit assignment.
    pub fn set_default_range(&self, partition_key_range_id: &str) {
        *self.default_range.write() = Some(partition_key_range_id.to_string());
    }

    /// How many times [`RoutingTable::refresh`] was called.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl RoutingTable for StaticRoutingTable {
    async fn resolve_range(&self, request_key: &str) -> Result<ResolvedRange> {
        let range = self
            .keys
            .read()
            .get(request_key)
            .cloned()
            .or_else(|| self.default_range.read().clone())
            .ok_or_else(|| {
                ClientError::builder(ErrorKind::NotFound)
                    .message(format!("no partition key range serves key '{}'", request_key))
                    .build()
            })?;

        let replicas = self.ranges.read().get(&range).cloned().unwrap_or_default();
        Ok(ResolvedRange::new(range, replicas))
    }

    async fn refresh(&self, partition_key_range_id: &str) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::AcqRel);
        tracing::info!(partition_key_range_id, "routing refresh requested");
        Ok(())
    }
}
