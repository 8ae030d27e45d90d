//! Configuration type definitions with auto-tuning based on system resources.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use sysinfo::System;
use tracing::info;

/// Upper limit for `audit.concurrent_recounts`.
pub const MAX_CONCURRENT_RECOUNTS: usize = 1024;

/// Upper limit for `audit.parallel_checks`.
pub const MAX_PARALLEL_CHECKS: usize = 256;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            total_memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Audit behavior configuration.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Location of the blob table holding the stored counters.
    pub blob_table: BlobTableConfig,

    /// Connection settings and checks, keyed by database name.
    pub databases: BTreeMap<String, DatabaseConfig>,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.audit = self.audit.with_auto_tuning(&resources);
        self
    }

    /// Connection settings of the blob table's database.
    pub fn authoritative(&self) -> Option<&DatabaseConfig> {
        self.databases.get(&self.blob_table.database)
    }
}

/// What to do with a range that keeps failing after its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the whole run.
    #[default]
    Abort,
    /// Record the range as unchecked and keep going.
    Skip,
}

/// Audit behavior configuration.
/// Performance-related fields use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Blob rows per range. Auto-tuned based on RAM if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,

    /// Ranges checked at the same time. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent_recounts: Option<usize>,

    /// Recount queries in flight per range. Auto-tuned if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_checks: Option<usize>,

    /// Policy for ranges that still fail after retries (default: abort).
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Extra attempts for a failed range (default: 0).
    #[serde(default)]
    pub range_retries: u32,

    /// Delay before the first retry, doubled on every further attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            chunk_size: None,
            concurrent_recounts: None,
            parallel_checks: None,
            failure_policy: FailurePolicy::default(),
            range_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl AuditConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let cores = resources.cpu_cores;

        // One range per two cores, between 2 and 16
        if self.concurrent_recounts.is_none() {
            self.concurrent_recounts = Some((cores / 2).clamp(2, 16));
        }

        if self.parallel_checks.is_none() {
            self.parallel_checks = Some((cores / 4).clamp(1, 4));
        }

        // Base: 10K rows, +10K per 8GB of RAM, cap at 100K
        if self.chunk_size.is_none() {
            let chunk = 10_000 + (resources.total_memory_gb / 8.0) as u64 * 10_000;
            self.chunk_size = Some(chunk.clamp(10_000, 100_000));
        }

        info!(
            "Auto-tuned config: chunk_size={}, concurrent_recounts={}, parallel_checks={}",
            self.get_chunk_size(),
            self.get_concurrent_recounts(),
            self.get_parallel_checks(),
        );

        self
    }

    pub fn get_chunk_size(&self) -> u64 {
        self.chunk_size.unwrap_or(10_000)
    }

    pub fn get_concurrent_recounts(&self) -> usize {
        self.concurrent_recounts.unwrap_or(4)
    }

    pub fn get_parallel_checks(&self) -> usize {
        self.parallel_checks.unwrap_or(2)
    }

    /// Default pool size: enough connections for every range in flight to run
    /// its stored-count fetch and its recounts in parallel against one database.
    pub fn default_pool_size(&self) -> u32 {
        let per_range = self.get_parallel_checks().saturating_add(1);
        self.get_concurrent_recounts()
            .saturating_mul(per_range)
            .clamp(2, 64) as u32
    }
}

/// Location of the blob table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobTableConfig {
    /// Database holding the blob table; must appear under `databases`.
    pub database: String,

    /// Blob table name (default: "BlobStorage").
    #[serde(default = "default_blob_table")]
    pub table: String,

    /// Identifier column (default: "BlobStorageID").
    #[serde(default = "default_blob_id_column")]
    pub id_column: String,

    /// Stored counter column (default: "NumReferences").
    #[serde(default = "default_count_column")]
    pub count_column: String,
}

/// Connection settings for one database plus the checks it hosts.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode: disabled, preferred, required, verify_ca, verify_identity
    /// (default: "preferred").
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Pool size. Derived from the audit concurrency if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,

    /// Referencing locations in this database, as "table.idColumn".
    #[serde(default)]
    pub checks: Vec<String>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .field("checks", &self.checks)
            .finish()
    }
}

// Default value functions for serde
fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_blob_table() -> String {
    "BlobStorage".to_string()
}

fn default_blob_id_column() -> String {
    "BlobStorageID".to_string()
}

fn default_count_column() -> String {
    "NumReferences".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_ssl_mode() -> String {
    "preferred".to_string()
}
