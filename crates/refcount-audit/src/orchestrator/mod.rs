//! Audit orchestrator - main workflow coordinator.

use crate::audit::{
    AuditProgressUpdate, CountFetcher, RangeAuditor, RangeOutcome, RangeSampler,
    RecountAggregator, RetryPolicy,
};
use crate::config::{Config, FailurePolicy};
use crate::core::{CheckPlan, ConnectionProvider, IdRange, MismatchSink, RangeCollection};
use crate::drivers::MysqlConnector;
use crate::error::{AuditError, Result};
use crate::query::QueryBuilder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Audit orchestrator.
pub struct Orchestrator {
    config: Config,
    provider: Arc<dyn ConnectionProvider>,
    builder: Arc<QueryBuilder>,
    checks: Arc<CheckPlan>,
    progress_tx: Option<mpsc::Sender<AuditProgressUpdate>>,
}

/// Final status of an audit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Every range was checked.
    Completed,
    /// Some ranges failed and were skipped.
    CompletedWithSkips,
    /// Cancellation stopped the run early.
    Cancelled,
}

/// Result of an audit run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: AuditStatus,

    /// When the audit started.
    pub started_at: DateTime<Utc>,

    /// When the audit completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Ranges in the plan.
    pub ranges_total: usize,

    /// Ranges fully checked.
    pub ranges_checked: usize,

    /// Ranges left unchecked after failing under the skip policy.
    pub ranges_skipped: Vec<IdRange>,

    /// Mismatches reported to the sink.
    pub mismatches_found: usize,
}

impl AuditResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Reachability of every configured database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// True when every database answered.
    pub healthy: bool,
    /// One entry per database, in name order.
    pub databases: Vec<DatabaseHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub database: String,
    pub connected: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Running totals while ranges complete.
#[derive(Default)]
struct Tally {
    checked: usize,
    skipped: Vec<IdRange>,
    cancelled: usize,
    mismatches: usize,
    failure: Option<AuditError>,
}

impl Orchestrator {
    /// Create a new orchestrator connected to every configured database.
    pub async fn new(config: Config) -> Result<Self> {
        let provider = MysqlConnector::connect(&config).await?;
        Self::with_provider(config, Arc::new(provider))
    }

    /// Create an orchestrator on top of an existing connection provider.
    pub fn with_provider(config: Config, provider: Arc<dyn ConnectionProvider>) -> Result<Self> {
        config.validate()?;
        let builder = QueryBuilder::new(&config.blob_table)?;
        let checks = CheckPlan::from_databases(&config.databases)?;

        Ok(Self {
            config,
            provider,
            builder: Arc::new(builder),
            checks: Arc::new(checks),
            progress_tx: None,
        })
    }

    /// Set progress channel for updates.
    pub fn with_progress(mut self, tx: mpsc::Sender<AuditProgressUpdate>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Send progress update if channel is configured.
    async fn send_progress(&self, update: AuditProgressUpdate) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(update).await;
        }
    }

    /// Sample the blob table and compute the range plan.
    pub async fn plan(&self) -> Result<RangeCollection> {
        RangeSampler::new(self.provider.clone(), self.builder.clone())
            .sample(self.config.audit.get_chunk_size())
            .await
    }

    /// Run the audit, streaming mismatches to `sink` as ranges complete.
    ///
    /// Under the abort policy the first failed range cancels the remaining
    /// work and its error is returned; mismatches of ranges that completed
    /// before it have already been reported.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        sink: Arc<dyn MismatchSink>,
    ) -> Result<AuditResult> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        info!("Starting audit run: {}", run_id);

        // Phase 1: Sample ranges
        info!(
            "Phase 1: Sampling {} every {} rows",
            self.provider.authoritative_database(),
            self.config.audit.get_chunk_size()
        );
        let ranges = self.plan().await?;
        let ranges_total = ranges.len();

        // Phase 2: Check ranges
        let workers = self.config.audit.get_concurrent_recounts().max(1);
        let policy = self.config.audit.failure_policy;
        info!(
            "Phase 2: Checking {} ranges against {} checks with {} workers (on failure: {:?})",
            ranges_total,
            self.checks.len(),
            workers,
            policy
        );

        let auditor = RangeAuditor::new(
            CountFetcher::new(self.provider.clone(), self.builder.clone()),
            RecountAggregator::new(
                self.provider.clone(),
                self.builder.clone(),
                self.checks.clone(),
                self.config.audit.get_parallel_checks(),
            ),
            sink,
            RetryPolicy::new(
                self.config.audit.range_retries,
                self.config.audit.retry_backoff_ms,
            ),
        );

        // Child token: an aborting range stops the run without touching the caller's token
        let run_token = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks: JoinSet<RangeOutcome> = JoinSet::new();
        let mut tally = Tally::default();
        let mut started = 0;

        for range in ranges.iter() {
            // Settle finished ranges while waiting for a free worker
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = run_token.cancelled() => break None,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        self.settle(joined, policy, &run_token, &mut tally, ranges_total).await;
                    }
                    permit = semaphore.clone().acquire_owned() => {
                        break Some(permit.map_err(|e| AuditError::Worker(e.to_string()))?);
                    }
                }
            };
            let Some(permit) = permit else {
                info!("Cancellation requested, stopping new ranges");
                break;
            };

            let auditor = auditor.clone();
            let token = run_token.clone();
            tasks.spawn(async move {
                let outcome = auditor.audit(range, token).await;
                drop(permit);
                outcome
            });
            started += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            self.settle(joined, policy, &run_token, &mut tally, ranges_total)
                .await;
        }

        if let Some(e) = tally.failure {
            error!("Audit aborted: {}", e);
            return Err(e);
        }

        let completed_at = Utc::now();
        let status = if tally.cancelled > 0 || started < ranges_total {
            AuditStatus::Cancelled
        } else if !tally.skipped.is_empty() {
            AuditStatus::CompletedWithSkips
        } else {
            AuditStatus::Completed
        };

        let result = AuditResult {
            run_id,
            status,
            started_at,
            completed_at,
            duration_seconds: timer.elapsed().as_secs_f64(),
            ranges_total,
            ranges_checked: tally.checked,
            ranges_skipped: tally.skipped,
            mismatches_found: tally.mismatches,
        };

        info!(
            "Audit {:?}: {}/{} ranges checked, {} skipped, {} mismatches in {:.1}s",
            result.status,
            result.ranges_checked,
            result.ranges_total,
            result.ranges_skipped.len(),
            result.mismatches_found,
            result.duration_seconds
        );

        Ok(result)
    }

    /// Fold one finished range into the tally.
    async fn settle(
        &self,
        joined: std::result::Result<RangeOutcome, JoinError>,
        policy: FailurePolicy,
        run_token: &CancellationToken,
        tally: &mut Tally,
        ranges_total: usize,
    ) {
        let outcome = joined.unwrap_or_else(|e| RangeOutcome::Failed {
            range: IdRange::full(),
            error: AuditError::Worker(e.to_string()),
        });

        match outcome {
            RangeOutcome::Checked { mismatches, .. } => {
                tally.checked += 1;
                tally.mismatches += mismatches;
            }
            RangeOutcome::Cancelled { .. } => {
                tally.cancelled += 1;
                return;
            }
            RangeOutcome::Failed { range, error } => {
                // A crashed worker has no range to skip
                let fatal = matches!(error, AuditError::Worker(_));
                if policy == FailurePolicy::Skip && !fatal {
                    error!("{}: skipped after failure: {}", range, error);
                    tally.skipped.push(range);
                } else {
                    error!("{}: failed: {}", range, error);
                    if tally.failure.is_none() {
                        tally.failure = Some(error);
                    }
                    run_token.cancel();
                    return;
                }
            }
        }

        self.send_progress(AuditProgressUpdate {
            ranges_total,
            ranges_completed: tally.checked,
            ranges_skipped: tally.skipped.len(),
            mismatches_found: tally.mismatches,
        })
        .await;
    }

    /// Ping every configured database.
    pub async fn health_check(&self) -> HealthCheckResult {
        let mut databases = Vec::new();

        for database in self.provider.databases() {
            let timer = Instant::now();
            let result = self.provider.ping(&database).await;
            let latency_ms = timer.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    info!("{}: reachable ({} ms)", database, latency_ms);
                    databases.push(DatabaseHealth {
                        database,
                        connected: true,
                        latency_ms,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("{}: unreachable: {}", database, e);
                    databases.push(DatabaseHealth {
                        database,
                        connected: false,
                        latency_ms,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        HealthCheckResult {
            healthy: databases.iter().all(|d| d.connected),
            databases,
        }
    }

    /// Close every connection pool.
    pub async fn close(&self) {
        self.provider.close().await;
    }
}
