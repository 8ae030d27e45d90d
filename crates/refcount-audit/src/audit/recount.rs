//! Ground-truth reference counts for one range.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::core::{CheckPlan, CheckSpec, ConnectionProvider, CountSet, IdRange};
use crate::error::{AuditError, Result};
use crate::query::QueryBuilder;

/// Recounts every configured check for a range and sums the results.
///
/// Each check yields its own partial set; partials are folded into the total
/// as they arrive, so no collection is shared between concurrent scans.
#[derive(Clone)]
pub struct RecountAggregator {
    provider: Arc<dyn ConnectionProvider>,
    builder: Arc<QueryBuilder>,
    checks: Arc<CheckPlan>,
    parallelism: usize,
}

impl RecountAggregator {
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        builder: Arc<QueryBuilder>,
        checks: Arc<CheckPlan>,
        parallelism: usize,
    ) -> Self {
        Self {
            provider,
            builder,
            checks,
            parallelism: parallelism.max(1),
        }
    }

    /// Sum of references to each blob inside `range` across all checks.
    ///
    /// The first failing check fails the whole range; scans still in flight
    /// are dropped.
    pub async fn recount(&self, range: IdRange) -> Result<CountSet> {
        let checks: Vec<CheckSpec> = self.checks.iter().cloned().collect();
        let aggregator = self.clone();

        let recounted = stream::iter(checks)
            .map(move |check| {
                let aggregator = aggregator.clone();
                async move { aggregator.recount_check(range, check).await }
            })
            .buffer_unordered(self.parallelism)
            .try_fold(CountSet::new(), |mut total, partial| async move {
                total.merge(partial);
                Ok(total)
            })
            .await?;

        debug!(
            "{}: {} referenced blobs across {} checks",
            range,
            recounted.len(),
            self.checks.len()
        );
        Ok(recounted)
    }

    async fn recount_check(&self, range: IdRange, check: CheckSpec) -> Result<CountSet> {
        let query = self
            .builder
            .recount(range, &check)
            .map_err(|e| AuditError::recount(range, &check, e))?;

        let records = self
            .provider
            .query_counts(&check.database, &query)
            .await
            .map_err(|e| AuditError::recount(range, &check, e))?;

        Ok(records.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlobTableConfig;
    use crate::drivers::memory::MemoryProvider;
    use crate::query::QueryKind;
    use std::time::Duration;

    fn builder() -> Arc<QueryBuilder> {
        Arc::new(
            QueryBuilder::new(&BlobTableConfig {
                database: "Global".to_string(),
                table: "BlobStorage".to_string(),
                id_column: "BlobStorageID".to_string(),
                count_column: "NumReferences".to_string(),
            })
            .unwrap(),
        )
    }

    fn checks() -> Vec<CheckSpec> {
        vec![
            CheckSpec::new("Mail", "Attachment", "BlobStorageID"),
            CheckSpec::new("Mail", "MessageData", "BlobStorageID"),
            CheckSpec::new("Drive", "FileBlock", "BlobStorageID"),
        ]
    }

    fn provider() -> MemoryProvider {
        let checks = checks();
        MemoryProvider::new("Global")
            .with_references(&checks[0], 5, 1)
            .with_references(&checks[0], 9, 2)
            .with_references(&checks[1], 5, 1)
            .with_references(&checks[2], 9, 1)
            .with_references(&checks[2], 12, 3)
    }

    #[tokio::test]
    async fn test_recount_sums_across_checks() {
        let aggregator = RecountAggregator::new(
            Arc::new(provider()),
            builder(),
            Arc::new(CheckPlan::from_checks(checks())),
            2,
        );

        let recounted = aggregator.recount(IdRange::new(0, 10)).await.unwrap();
        assert_eq!(recounted, CountSet::from([(5, 2), (9, 3)]));
    }

    #[tokio::test]
    async fn test_recount_is_independent_of_check_order() {
        let provider: Arc<dyn ConnectionProvider> = Arc::new(provider());
        let mut reversed = checks();
        reversed.reverse();

        let forward = RecountAggregator::new(
            provider.clone(),
            builder(),
            Arc::new(CheckPlan::from_checks(checks())),
            1,
        );
        let backward = RecountAggregator::new(
            provider,
            builder(),
            Arc::new(CheckPlan::from_checks(reversed)),
            3,
        );

        let range = IdRange::full();
        assert_eq!(
            forward.recount(range).await.unwrap(),
            backward.recount(range).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_check_without_rows_adds_nothing() {
        let only_empty = vec![CheckSpec::new("Mail", "Archive", "BlobStorageID")];
        let aggregator = RecountAggregator::new(
            Arc::new(provider()),
            builder(),
            Arc::new(CheckPlan::from_checks(only_empty)),
            2,
        );

        let recounted = aggregator.recount(IdRange::full()).await.unwrap();
        assert!(recounted.is_empty());
    }

    #[tokio::test]
    async fn test_parallel_scans_are_bounded() {
        let provider = Arc::new(provider().with_latency(Duration::from_millis(20)));
        let aggregator = RecountAggregator::new(
            provider.clone(),
            builder(),
            Arc::new(CheckPlan::from_checks(checks())),
            2,
        );

        let recounted = aggregator.recount(IdRange::new(0, 10)).await.unwrap();
        assert_eq!(recounted, CountSet::from([(5, 2), (9, 3)]));
        assert_eq!(provider.peak_recounts(), 2);
    }

    #[tokio::test]
    async fn test_recount_runs_on_spawned_task() {
        let aggregator = RecountAggregator::new(
            Arc::new(provider()),
            builder(),
            Arc::new(CheckPlan::from_checks(checks())),
            3,
        );

        let recounted = tokio::spawn(async move { aggregator.recount(IdRange::full()).await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recounted, CountSet::from([(5, 2), (9, 3), (12, 3)]));
    }

    #[tokio::test]
    async fn test_failing_check_fails_the_range() {
        let provider = provider().fail_on(1, |kind| {
            matches!(kind, QueryKind::Recount { check, .. } if check.table == "FileBlock")
        });
        let aggregator = RecountAggregator::new(
            Arc::new(provider),
            builder(),
            Arc::new(CheckPlan::from_checks(checks())),
            2,
        );

        let range = IdRange::new(0, 10);
        let err = aggregator.recount(range).await.unwrap_err();
        match err {
            AuditError::Recount {
                range: failed,
                check,
                ..
            } => {
                assert_eq!(failed, range);
                assert_eq!(check, "Drive.FileBlock.BlobStorageID");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
