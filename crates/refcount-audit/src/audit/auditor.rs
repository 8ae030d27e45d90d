//! Audit of a single range: fetch and recount, reconcile, report.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::fetcher::CountFetcher;
use super::reconcile::reconcile;
use super::recount::RecountAggregator;
use crate::core::{IdRange, Mismatch, MismatchSink};
use crate::error::{AuditError, Result};

/// How a range ended.
#[derive(Debug)]
pub enum RangeOutcome {
    /// Both sides were read and every mismatch was reported.
    Checked { range: IdRange, mismatches: usize },
    /// The range kept failing after its retries.
    Failed { range: IdRange, error: AuditError },
    /// Cancellation arrived before the range finished; nothing was reported.
    Cancelled { range: IdRange },
}

/// Retry schedule for a failing range.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Delay before the first retry; doubles every attempt.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff_ms: u64) -> Self {
        Self {
            retries,
            backoff: Duration::from_millis(backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Checks ranges and streams their mismatches to a sink.
///
/// Cheap to clone; every range task gets its own copy.
#[derive(Clone)]
pub struct RangeAuditor {
    fetcher: CountFetcher,
    aggregator: RecountAggregator,
    sink: Arc<dyn MismatchSink>,
    retry: RetryPolicy,
}

impl RangeAuditor {
    pub fn new(
        fetcher: CountFetcher,
        aggregator: RecountAggregator,
        sink: Arc<dyn MismatchSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            aggregator,
            sink,
            retry,
        }
    }

    /// Mismatches of `range`, without reporting them.
    pub async fn check(&self, range: IdRange) -> Result<Vec<Mismatch>> {
        let (stored, recounted) =
            tokio::try_join!(self.fetcher.fetch(range), self.aggregator.recount(range))?;
        Ok(reconcile(&stored, &recounted))
    }

    /// Check `range` with retries and report its mismatches.
    ///
    /// Mismatches reach the sink only once the whole range has been read, so
    /// a failed or cancelled range reports nothing.
    pub async fn audit(&self, range: IdRange, cancel: CancellationToken) -> RangeOutcome {
        let mut attempt = 0;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return RangeOutcome::Cancelled { range },
                result = self.check(range) => result,
            };

            match result {
                Ok(mismatches) => {
                    if cancel.is_cancelled() {
                        return RangeOutcome::Cancelled { range };
                    }
                    for mismatch in &mismatches {
                        self.sink.report(mismatch);
                    }
                    debug!("{}: checked, {} mismatches", range, mismatches.len());
                    return RangeOutcome::Checked {
                        range,
                        mismatches: mismatches.len(),
                    };
                }
                Err(e) if attempt < self.retry.retries => {
                    let delay = self.retry.delay(attempt);
                    attempt += 1;
                    warn!(
                        "{}: attempt {}/{} failed, retrying in {:?}: {}",
                        range,
                        attempt,
                        self.retry.retries + 1,
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return RangeOutcome::Cancelled { range },
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => return RangeOutcome::Failed { range, error },
            }
        }
    }
}
