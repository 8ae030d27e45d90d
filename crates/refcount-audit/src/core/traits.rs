//! Seams between the audit core and its collaborators.
//!
//! - [`ConnectionProvider`]: executes audit queries against named databases
//! - [`MismatchSink`]: receives every mismatch as soon as its range completes

use async_trait::async_trait;

use super::counts::{CountRecord, Mismatch};
use super::range::BlobId;
use crate::error::Result;
use crate::query::AuditQuery;

/// Execute audit queries against the configured databases.
///
/// Implementations own one connection pool per logical database and convert
/// driver rows into typed records before returning.
///
/// # Thread Safety
///
/// Providers are shared by every range worker, so they must be `Send + Sync`
/// and must not run two queries on one connection at the same time.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Name of the database holding the blob table.
    fn authoritative_database(&self) -> &str;

    /// Run a query returning `(blob_id, ref_count)` rows on `database`.
    async fn query_counts(&self, database: &str, query: &AuditQuery) -> Result<Vec<CountRecord>>;

    /// Run a query returning `(blob_id, ref_count)` rows on the blob database.
    async fn query_authoritative_counts(&self, query: &AuditQuery) -> Result<Vec<CountRecord>> {
        self.query_counts(self.authoritative_database(), query).await
    }

    /// Run a query returning a single `blob_id` column on the blob database.
    async fn query_authoritative_ids(&self, query: &AuditQuery) -> Result<Vec<BlobId>>;

    /// Check that `database` is reachable.
    async fn ping(&self, database: &str) -> Result<()>;

    /// Names of all databases this provider can reach.
    fn databases(&self) -> Vec<String>;

    /// Close every pool.
    async fn close(&self);
}

/// Destination for detected mismatches.
pub trait MismatchSink: Send + Sync {
    fn report(&self, mismatch: &Mismatch);
}

impl<F> MismatchSink for F
where
    F: Fn(&Mismatch) + Send + Sync,
{
    fn report(&self, mismatch: &Mismatch) {
        self(mismatch)
    }
}
