//! SQL generation for the audit queries (MySQL dialect).
//!
//! Three requests are built here:
//! - boundary sampling over the blob table
//! - stored counters for one range
//! - grouped recount of one referencing table for one range
//!
//! Range bounds are bound as parameters; only configured identifiers are
//! spliced into the text, after validation and quoting.

use serde::Serialize;
use std::fmt;

use crate::config::BlobTableConfig;
use crate::core::identifier::{qualify_mysql, quote_mysql};
use crate::core::{CheckSpec, IdRange};
use crate::error::Result;

/// Column alias carrying the blob identifier in every query.
pub const BLOB_ID_ALIAS: &str = "blob_id";

/// Column alias carrying the count in stored-count and recount queries.
pub const COUNT_ALIAS: &str = "ref_count";

/// Session isolation applied before a query runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IsolationLevel {
    /// Dirty reads allowed; only used to balance work.
    ReadUncommitted,
    /// Does not block concurrent writers.
    ReadCommitted,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
        }
    }

    /// Statement switching the session to this level.
    pub fn set_session_sql(&self) -> String {
        format!("SET SESSION TRANSACTION ISOLATION LEVEL {}", self.as_sql())
    }
}

/// What a query asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueryKind {
    SampleBoundaries { stride: u64 },
    StoredCounts { range: IdRange },
    Recount { range: IdRange, check: CheckSpec },
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::SampleBoundaries { stride } => write!(f, "sample(stride={})", stride),
            QueryKind::StoredCounts { range } => write!(f, "stored{}", range),
            QueryKind::Recount { range, check } => write!(f, "recount({}){}", check, range),
        }
    }
}

/// A ready-to-execute request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditQuery {
    pub kind: QueryKind,
    pub isolation: IsolationLevel,
    pub sql: String,
    /// Positional parameters, in order of the `?` placeholders.
    pub binds: Vec<u64>,
}

/// Builds audit queries for one blob table.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    blob_table: String,
    id_column: String,
    count_column: String,
}

impl QueryBuilder {
    /// Create a builder, validating and quoting the blob table identifiers.
    pub fn new(config: &BlobTableConfig) -> Result<Self> {
        Ok(Self {
            blob_table: qualify_mysql(&config.database, &config.table)?,
            id_column: quote_mysql(&config.id_column)?,
            count_column: quote_mysql(&config.count_column)?,
        })
    }

    /// Every `stride + 1`-th identifier of the blob table, ascending.
    ///
    /// Row numbers start at 1 and a row is kept when `(rownum - 1)` is a
    /// multiple of `stride + 1`, so the smallest identifier is always first and
    /// the boundary row itself belongs to the following range.
    pub fn sample_boundaries(&self, stride: u64) -> AuditQuery {
        let sql = format!(
            r#"SELECT {alias}
FROM (
    SELECT CAST({id} AS UNSIGNED) AS {alias},
           ROW_NUMBER() OVER (ORDER BY {id}) AS rownum
    FROM {table}
) AS numbered
WHERE (rownum - 1) % ? = 0
ORDER BY {alias}"#,
            alias = BLOB_ID_ALIAS,
            id = self.id_column,
            table = self.blob_table,
        );

        AuditQuery {
            kind: QueryKind::SampleBoundaries { stride },
            isolation: IsolationLevel::ReadUncommitted,
            sql,
            binds: vec![stride.saturating_add(1)],
        }
    }

    /// Stored counters of the blob rows inside `range`.
    pub fn stored_counts(&self, range: IdRange) -> AuditQuery {
        let (predicate, binds) = range_predicate(&self.id_column, range);
        let sql = format!(
            r#"SELECT CAST({id} AS UNSIGNED) AS {alias}, CAST({count} AS SIGNED) AS {count_alias}
FROM {table}
WHERE {predicate}
ORDER BY {id}"#,
            id = self.id_column,
            alias = BLOB_ID_ALIAS,
            count = self.count_column,
            count_alias = COUNT_ALIAS,
            table = self.blob_table,
            predicate = predicate,
        );

        AuditQuery {
            kind: QueryKind::StoredCounts { range },
            isolation: IsolationLevel::ReadCommitted,
            sql,
            binds,
        }
    }

    /// Number of rows of `check` referencing each identifier inside `range`.
    pub fn recount(&self, range: IdRange, check: &CheckSpec) -> Result<AuditQuery> {
        let table = qualify_mysql(&check.database, &check.table)?;
        let column = quote_mysql(&check.id_column)?;
        let (predicate, binds) = range_predicate(&column, range);

        let sql = format!(
            r#"SELECT CAST({col} AS UNSIGNED) AS {alias}, COUNT(*) AS {count_alias}
FROM {table} FORCE INDEX ({col})
WHERE {predicate}
GROUP BY {col}
ORDER BY {col}"#,
            col = column,
            alias = BLOB_ID_ALIAS,
            count_alias = COUNT_ALIAS,
            table = table,
            predicate = predicate,
        );

        Ok(AuditQuery {
            kind: QueryKind::Recount {
                range,
                check: check.clone(),
            },
            isolation: IsolationLevel::ReadCommitted,
            sql,
            binds,
        })
    }
}

/// `col >= ? AND col < ?`, dropping the upper bound for the open last range.
fn range_predicate(column: &str, range: IdRange) -> (String, Vec<u64>) {
    if range.is_unbounded() {
        (format!("{} >= ?", column), vec![range.min_id])
    } else {
        (
            format!("{col} >= ? AND {col} < ?", col = column),
            vec![range.min_id, range.max_id],
        )
    }
}
