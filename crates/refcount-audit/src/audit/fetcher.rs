//! Stored counters for one range.

use std::sync::Arc;

use tracing::debug;

use crate::core::{ConnectionProvider, CountSet, IdRange};
use crate::error::{AuditError, Result};
use crate::query::QueryBuilder;

/// Reads the stored reference counters from the blob table.
#[derive(Clone)]
pub struct CountFetcher {
    provider: Arc<dyn ConnectionProvider>,
    builder: Arc<QueryBuilder>,
}

impl CountFetcher {
    pub fn new(provider: Arc<dyn ConnectionProvider>, builder: Arc<QueryBuilder>) -> Self {
        Self { provider, builder }
    }

    /// Stored counters of every blob inside `range`.
    pub async fn fetch(&self, range: IdRange) -> Result<CountSet> {
        let query = self.builder.stored_counts(range);
        let records = self
            .provider
            .query_authoritative_counts(&query)
            .await
            .map_err(|e| AuditError::fetch(range, e))?;

        let stored: CountSet = records.into_iter().collect();
        debug!("{}: {} stored counters", range, stored.len());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlobTableConfig;
    use crate::drivers::memory::MemoryProvider;
    use crate::query::QueryKind;

    fn fetcher(provider: MemoryProvider) -> CountFetcher {
        let builder = QueryBuilder::new(&BlobTableConfig {
            database: "Global".to_string(),
            table: "BlobStorage".to_string(),
            id_column: "BlobStorageID".to_string(),
            count_column: "NumReferences".to_string(),
        })
        .unwrap();
        CountFetcher::new(Arc::new(provider), Arc::new(builder))
    }

    #[tokio::test]
    async fn test_fetch_only_returns_rows_in_range() {
        let provider = MemoryProvider::new("Global")
            .with_blob(5, 2)
            .with_blob(7, 1)
            .with_blob(10, 4);

        let stored = fetcher(provider).fetch(IdRange::new(0, 10)).await.unwrap();
        assert_eq!(stored, CountSet::from([(5, 2), (7, 1)]));
    }

    #[tokio::test]
    async fn test_fetch_failure_names_the_range() {
        let provider = MemoryProvider::new("Global")
            .with_blob(5, 2)
            .fail_on(1, |kind| matches!(kind, QueryKind::StoredCounts { .. }));

        let range = IdRange::new(0, 10);
        let err = fetcher(provider).fetch(range).await.unwrap_err();
        assert!(matches!(err, AuditError::Fetch { .. }));
        assert_eq!(err.range(), Some(range));
    }
}
