//! Identifier ranges and the balanced range partition.
//!
//! Blob identifiers are sparse because rows get deleted, so ranges are not cut
//! at fixed identifier widths. Instead a sampling query returns every
//! `stride + 1`-th existing identifier and the partition is built from those
//! boundaries, giving each range roughly `stride` rows.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::FusedIterator;

use crate::error::{AuditError, Result};

/// Identifier of one blob row.
pub type BlobId = u64;

/// Upper end of the identifier universe. A range ending here is unbounded.
pub const ID_MAX: BlobId = u64::MAX;

/// Half-open identifier interval `[min_id, max_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdRange {
    /// Lower bound (inclusive).
    pub min_id: BlobId,
    /// Upper bound (exclusive), or [`ID_MAX`] for the open-ended last range.
    pub max_id: BlobId,
}

impl IdRange {
    /// Create a new range. `min_id` must be below `max_id`.
    pub fn new(min_id: BlobId, max_id: BlobId) -> Self {
        debug_assert!(min_id < max_id, "empty range {}..{}", min_id, max_id);
        Self { min_id, max_id }
    }

    /// The single range covering the whole identifier universe.
    pub fn full() -> Self {
        Self::new(0, ID_MAX)
    }

    /// Whether this range extends to the top of the identifier universe.
    pub fn is_unbounded(&self) -> bool {
        self.max_id == ID_MAX
    }

    /// Whether `id` falls inside this range.
    pub fn contains(&self, id: BlobId) -> bool {
        id >= self.min_id && (self.is_unbounded() || id < self.max_id)
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "[{}, MAX)", self.min_id)
        } else {
            write!(f, "[{}, {})", self.min_id, self.max_id)
        }
    }
}

/// Partition of `[0, ID_MAX]` derived from sampled boundaries.
///
/// The collection is immutable; [`RangeCollection::iter`] can be called any
/// number of times and always yields the same ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeCollection {
    boundaries: Vec<BlobId>,
}

impl RangeCollection {
    /// Build a partition from sampled boundaries.
    ///
    /// Boundaries must be strictly increasing. The first boundary is always
    /// the smallest existing identifier, which the forced lower bound of 0
    /// already covers, so it does not start a range of its own. A trailing
    /// [`ID_MAX`] is dropped: the open last range already contains it.
    pub fn from_boundaries(mut boundaries: Vec<BlobId>) -> Result<Self> {
        if let Some(pair) = boundaries.windows(2).find(|w| w[0] >= w[1]) {
            return Err(AuditError::Sampling(format!(
                "boundaries are not strictly increasing ({} followed by {})",
                pair[0], pair[1]
            )));
        }
        if boundaries.last() == Some(&ID_MAX) {
            boundaries.pop();
        }
        Ok(Self { boundaries })
    }

    /// Sampled boundaries this partition was built from.
    pub fn boundaries(&self) -> &[BlobId] {
        &self.boundaries
    }

    /// Number of ranges in the partition.
    pub fn len(&self) -> usize {
        self.boundaries.len().max(1)
    }

    /// A partition always holds at least one range.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterate over the ranges in ascending order.
    pub fn iter(&self) -> Ranges<'_> {
        Ranges {
            boundaries: &self.boundaries,
            position: 0,
            remaining: self.len(),
        }
    }
}

impl<'a> IntoIterator for &'a RangeCollection {
    type Item = IdRange;
    type IntoIter = Ranges<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the ranges of a [`RangeCollection`].
#[derive(Debug, Clone)]
pub struct Ranges<'a> {
    boundaries: &'a [BlobId],
    position: usize,
    remaining: usize,
}

impl Iterator for Ranges<'_> {
    type Item = IdRange;

    fn next(&mut self) -> Option<IdRange> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let b = self.boundaries;
        let position = self.position;
        self.position += 1;

        if b.len() < 2 {
            return Some(IdRange::full());
        }

        // position 0 -> [0, b1), then [b_i, b_i+1), then [b_last, MAX)
        let range = if position == 0 {
            IdRange::new(0, b[1])
        } else if position + 1 < b.len() {
            IdRange::new(b[position], b[position + 1])
        } else {
            IdRange::new(b[position], ID_MAX)
        };
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Ranges<'_> {}

impl FusedIterator for Ranges<'_> {}
