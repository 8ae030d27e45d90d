//! Boundary sampling over the blob table.

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::{ConnectionProvider, RangeCollection};
use crate::error::{AuditError, Result};
use crate::query::QueryBuilder;

/// Samples the blob identifier space once and partitions it.
#[derive(Clone)]
pub struct RangeSampler {
    provider: Arc<dyn ConnectionProvider>,
    builder: Arc<QueryBuilder>,
}

impl RangeSampler {
    pub fn new(provider: Arc<dyn ConnectionProvider>, builder: Arc<QueryBuilder>) -> Self {
        Self { provider, builder }
    }

    /// Partition the identifier space into ranges of roughly `stride` rows.
    ///
    /// An empty blob table yields the single range covering everything.
    pub async fn sample(&self, stride: u64) -> Result<RangeCollection> {
        if stride == 0 {
            return Err(AuditError::Sampling("stride must be at least 1".into()));
        }

        let query = self.builder.sample_boundaries(stride);
        debug!("Sampling boundaries every {} rows", stride.saturating_add(1));

        let boundaries = self
            .provider
            .query_authoritative_ids(&query)
            .await
            .map_err(|e| AuditError::Sampling(format!("boundary query failed: {}", e)))?;

        let sampled = boundaries.len();
        let ranges = RangeCollection::from_boundaries(boundaries)?;

        info!(
            "Sampled {} boundaries from {}, planned {} ranges",
            sampled,
            self.provider.authoritative_database(),
            ranges.len()
        );

        Ok(ranges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlobTableConfig;
    use crate::core::{IdRange, ID_MAX};
    use crate::drivers::memory::MemoryProvider;

    fn sampler(provider: MemoryProvider) -> RangeSampler {
        let builder = QueryBuilder::new(&BlobTableConfig {
            database: "Global".to_string(),
            table: "BlobStorage".to_string(),
            id_column: "BlobStorageID".to_string(),
            count_column: "NumReferences".to_string(),
        })
        .unwrap();
        RangeSampler::new(Arc::new(provider), Arc::new(builder))
    }

    #[tokio::test]
    async fn test_sample_every_stride_plus_one_row() {
        let mut provider = MemoryProvider::new("Global");
        for id in 1..=9 {
            provider = provider.with_blob(id * 10, 1);
        }

        // stride 2 keeps rows 1, 4, 7 -> ids 10, 40, 70
        let ranges = sampler(provider).sample(2).await.unwrap();
        assert_eq!(ranges.boundaries(), &[10, 40, 70]);
        assert_eq!(
            ranges.iter().collect::<Vec<_>>(),
            vec![
                IdRange::new(0, 40),
                IdRange::new(40, 70),
                IdRange::new(70, ID_MAX)
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_table_gives_one_range() {
        let ranges = sampler(MemoryProvider::new("Global")).sample(100).await.unwrap();
        assert_eq!(ranges.iter().collect::<Vec<_>>(), vec![IdRange::full()]);
    }

    #[tokio::test]
    async fn test_non_increasing_boundaries_fail() {
        let provider = MemoryProvider::new("Global").with_sample(vec![0, 20, 20, 30]);
        let err = sampler(provider).sample(10).await.unwrap_err();
        assert!(matches!(err, AuditError::Sampling(_)));
    }

    #[tokio::test]
    async fn test_query_failure_is_a_sampling_error() {
        let provider = MemoryProvider::new("Global")
            .with_blob(1, 1)
            .fail_on(1, |_| true);
        let err = sampler(provider).sample(10).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_zero_stride_is_rejected() {
        let err = sampler(MemoryProvider::new("Global")).sample(0).await.unwrap_err();
        assert!(matches!(err, AuditError::Sampling(_)));
    }
}
