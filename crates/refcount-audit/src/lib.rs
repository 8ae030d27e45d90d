//! # refcount-audit
//!
//! Audit of blob reference counters against the rows that actually reference
//! each blob.
//!
//! A blob table keeps a cached `NumReferences`-style counter per blob, while
//! the references themselves live in many tables, possibly in other
//! databases. This library finds every blob whose counter has drifted:
//!
//! - **Balanced ranges** sampled from the sparse identifier space
//! - **Concurrent recounts** across all referencing tables of each range
//! - **Streaming reports** of mismatches as soon as a range completes
//! - **Failure policy** to abort the run or skip a failing range after retries
//!
//! Each range is read at READ COMMITTED, so the audit never locks the blob
//! table and never writes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use refcount_audit::{Config, LogSink, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator
//!         .run(CancellationToken::new(), Arc::new(LogSink))
//!         .await?;
//!     println!("Found {} mismatches", result.mismatches_found);
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod query;

// Re-exports for convenient access
pub use audit::{AuditProgressUpdate, CollectingSink, LogSink};
pub use config::{AuditConfig, BlobTableConfig, Config, DatabaseConfig, FailurePolicy};
pub use crate::core::{
    BlobId, CheckPlan, CheckSpec, ConnectionProvider, CountSet, IdRange, Mismatch, MismatchSink,
    RangeCollection, ID_MAX,
};
pub use drivers::MysqlConnector;
pub use error::{AuditError, Result};
pub use orchestrator::{AuditResult, AuditStatus, HealthCheckResult, Orchestrator};
