//! In-memory connection provider for tests.
//!
//! Answers audit queries from their [`QueryKind`] instead of their SQL, over a
//! blob table and per-check reference rows held in memory.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{BlobId, CheckSpec, ConnectionProvider, CountRecord};
use crate::error::{AuditError, Result};
use crate::query::{AuditQuery, QueryKind};

type Matcher = Box<dyn Fn(&QueryKind) -> bool + Send + Sync>;

struct Failure {
    matcher: Matcher,
    remaining: u32,
}

pub(crate) struct MemoryProvider {
    authoritative: String,
    blobs: BTreeMap<BlobId, u64>,
    references: HashMap<CheckSpec, Vec<BlobId>>,
    databases: BTreeSet<String>,
    sample_override: Option<Vec<BlobId>>,
    unreachable: BTreeSet<String>,
    failures: Mutex<Vec<Failure>>,
    latency: Duration,
    queries: AtomicUsize,
    fetches: InFlight,
    recounts: InFlight,
    closed: AtomicBool,
}

/// Current and highest number of concurrent queries of one kind.
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self)
    }
}

/// Leaves on drop, so a query dropped mid-flight is not counted forever.
struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryProvider {
    pub(crate) fn new(authoritative: &str) -> Self {
        Self {
            authoritative: authoritative.to_string(),
            blobs: BTreeMap::new(),
            references: HashMap::new(),
            databases: BTreeSet::from([authoritative.to_string()]),
            sample_override: None,
            unreachable: BTreeSet::new(),
            failures: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            queries: AtomicUsize::new(0),
            fetches: InFlight::default(),
            recounts: InFlight::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Add a blob row with its stored counter.
    pub(crate) fn with_blob(mut self, blob_id: BlobId, stored: u64) -> Self {
        self.blobs.insert(blob_id, stored);
        self
    }

    /// Add `rows` rows of `check` pointing at `blob_id`.
    pub(crate) fn with_references(mut self, check: &CheckSpec, blob_id: BlobId, rows: usize) -> Self {
        self.databases.insert(check.database.clone());
        self.references
            .entry(check.clone())
            .or_default()
            .extend(std::iter::repeat(blob_id).take(rows));
        self
    }

    /// Return these boundaries from the sampling query, whatever the data.
    pub(crate) fn with_sample(mut self, boundaries: Vec<BlobId>) -> Self {
        self.sample_override = Some(boundaries);
        self
    }

    /// Make `ping` fail for `database`.
    pub(crate) fn with_unreachable(mut self, database: &str) -> Self {
        self.databases.insert(database.to_string());
        self.unreachable.insert(database.to_string());
        self
    }

    /// Hold every stored-count and recount query open for `latency`.
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `times` queries matching `matcher`.
    pub(crate) fn fail_on(
        self,
        times: u32,
        matcher: impl Fn(&QueryKind) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.failures
            .lock()
            .unwrap()
            .push(Failure {
                matcher: Box::new(matcher),
                remaining: times,
            });
        self
    }

    /// Number of queries executed so far.
    pub(crate) fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Most stored-count queries ever running at once.
    pub(crate) fn peak_fetches(&self) -> usize {
        self.fetches.peak.load(Ordering::SeqCst)
    }

    /// Most recount queries ever running at once.
    pub(crate) fn peak_recounts(&self) -> usize {
        self.recounts.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, query: &AuditQuery) -> Result<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let mut failures = self.failures.lock().unwrap();
        for failure in failures.iter_mut() {
            if failure.remaining > 0 && (failure.matcher)(&query.kind) {
                failure.remaining -= 1;
                return Err(AuditError::database("injected failure", query.kind.to_string()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionProvider for MemoryProvider {
    fn authoritative_database(&self) -> &str {
        &self.authoritative
    }

    async fn query_counts(&self, database: &str, query: &AuditQuery) -> Result<Vec<CountRecord>> {
        self.record(query)?;

        let _guard = match &query.kind {
            QueryKind::StoredCounts { .. } => Some(self.fetches.enter()),
            QueryKind::Recount { .. } => Some(self.recounts.enter()),
            QueryKind::SampleBoundaries { .. } => None,
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match &query.kind {
            QueryKind::StoredCounts { range } => {
                if database != self.authoritative {
                    return Err(AuditError::database("no blob table here", database));
                }
                Ok(self
                    .blobs
                    .iter()
                    .filter(|(id, _)| range.contains(**id))
                    .map(|(id, count)| CountRecord::new(*id, *count))
                    .collect())
            }
            QueryKind::Recount { range, check } => {
                if database != check.database {
                    return Err(AuditError::database("check runs on another database", database));
                }
                let mut grouped: BTreeMap<BlobId, u64> = BTreeMap::new();
                for id in self.references.get(check).into_iter().flatten() {
                    if range.contains(*id) {
                        *grouped.entry(*id).or_insert(0) += 1;
                    }
                }
                Ok(grouped
                    .into_iter()
                    .map(|(id, count)| CountRecord::new(id, count))
                    .collect())
            }
            QueryKind::SampleBoundaries { .. } => Err(AuditError::database(
                "sampling returns identifiers, not counts",
                database,
            )),
        }
    }

    async fn query_authoritative_ids(&self, query: &AuditQuery) -> Result<Vec<BlobId>> {
        self.record(query)?;

        match &query.kind {
            QueryKind::SampleBoundaries { stride } => {
                if let Some(sample) = &self.sample_override {
                    return Ok(sample.clone());
                }
                let step = usize::try_from(stride.saturating_add(1)).unwrap_or(usize::MAX);
                Ok(self.blobs.keys().copied().step_by(step).collect())
            }
            other => Err(AuditError::database(
                format!("{} does not return identifiers", other),
                &self.authoritative,
            )),
        }
    }

    async fn ping(&self, database: &str) -> Result<()> {
        if !self.databases.contains(database) {
            return Err(AuditError::Config(format!(
                "database '{}' is not configured",
                database
            )));
        }
        if self.unreachable.contains(database) {
            return Err(AuditError::database("connection refused", database));
        }
        Ok(())
    }

    fn databases(&self) -> Vec<String> {
        self.databases.iter().cloned().collect()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
