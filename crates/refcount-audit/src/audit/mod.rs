//! Range audit pipeline.
//!
//! The blob table is sampled once into a [`RangeCollection`](crate::core::RangeCollection).
//! Each range is then read from both sides at the same time:
//!
//! - [`CountFetcher`]: stored counters from the blob table
//! - [`RecountAggregator`]: references summed across every configured check
//!
//! and [`reconcile`] lists the identifiers where the two disagree.
//! [`RangeAuditor`] ties these together for one range, with retries, and
//! streams the result to a [`MismatchSink`](crate::core::MismatchSink).

mod auditor;
mod fetcher;
mod reconcile;
mod recount;
mod sampler;
mod sink;

pub use auditor::{RangeAuditor, RangeOutcome, RetryPolicy};
pub use fetcher::CountFetcher;
pub use reconcile::reconcile;
pub use recount::RecountAggregator;
pub use sampler::RangeSampler;
pub use sink::{CollectingSink, LogSink};

use serde::{Deserialize, Serialize};

/// Progress update for an audit run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditProgressUpdate {
    /// Total number of ranges in the plan.
    pub ranges_total: usize,
    /// Ranges checked so far.
    pub ranges_completed: usize,
    /// Ranges given up on under the skip policy.
    pub ranges_skipped: usize,
    /// Number of mismatches found so far.
    pub mismatches_found: usize,
}
