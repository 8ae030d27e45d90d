//! Per-identifier counts and the mismatches derived from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::range::BlobId;

/// One `(identifier, count)` row as returned by a stored-count or recount query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountRecord {
    pub blob_id: BlobId,
    pub count: u64,
}

impl CountRecord {
    pub fn new(blob_id: BlobId, count: u64) -> Self {
        Self { blob_id, count }
    }
}

/// Aggregated counts keyed by identifier, ordered ascending.
///
/// Adding a record for an identifier that is already present sums the counts,
/// so a set can be built from the rows of several tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountSet(BTreeMap<BlobId, u64>);

impl CountSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` to the total for `blob_id`.
    pub fn add(&mut self, blob_id: BlobId, count: u64) {
        *self.0.entry(blob_id).or_insert(0) += count;
    }

    /// Count for `blob_id`; identifiers never added count as zero.
    pub fn get(&self, blob_id: BlobId) -> u64 {
        self.0.get(&blob_id).copied().unwrap_or(0)
    }

    /// Fold another set into this one.
    pub fn merge(&mut self, other: CountSet) {
        if self.0.is_empty() {
            self.0 = other.0;
            return;
        }
        for (blob_id, count) in other.0 {
            self.add(blob_id, count);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(identifier, count)` pairs in ascending identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (BlobId, u64)> + '_ {
        self.0.iter().map(|(id, count)| (*id, *count))
    }
}

impl FromIterator<CountRecord> for CountSet {
    fn from_iter<I: IntoIterator<Item = CountRecord>>(iter: I) -> Self {
        let mut set = CountSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<CountRecord> for CountSet {
    fn extend<I: IntoIterator<Item = CountRecord>>(&mut self, iter: I) {
        for record in iter {
            self.add(record.blob_id, record.count);
        }
    }
}

impl<const N: usize> From<[(BlobId, u64); N]> for CountSet {
    fn from(pairs: [(BlobId, u64); N]) -> Self {
        pairs
            .into_iter()
            .map(|(blob_id, count)| CountRecord::new(blob_id, count))
            .collect()
    }
}

/// A stored counter that disagrees with the recount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub blob_id: BlobId,
    pub stored_count: u64,
    pub recounted_count: u64,
}

impl Mismatch {
    pub fn new(blob_id: BlobId, stored_count: u64, recounted_count: u64) -> Self {
        Self {
            blob_id,
            stored_count,
            recounted_count,
        }
    }

    /// Human-readable report line, labelled with the blob table's column names.
    pub fn report_line(&self, id_column: &str, count_column: &str) -> String {
        format!(
            "[{}:{}] {}={}, but recount={}",
            id_column, self.blob_id, count_column, self.stored_count, self.recounted_count
        )
    }
}
