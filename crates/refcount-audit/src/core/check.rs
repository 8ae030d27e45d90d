//! Locations that may hold a reference to a blob.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::identifier::validate_identifier;
use crate::config::DatabaseConfig;
use crate::error::{AuditError, Result};

/// One `(database, table, id column)` triple to recount.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckSpec {
    pub database: String,
    pub table: String,
    pub id_column: String,
}

impl CheckSpec {
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        id_column: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            id_column: id_column.into(),
        }
    }

    /// Parse a `"table.idColumn"` entry configured under `database`.
    pub fn parse(database: &str, spec: &str) -> Result<Self> {
        let malformed = || AuditError::MalformedCheckSpec {
            database: database.to_string(),
            spec: spec.to_string(),
        };

        let (table, id_column) = spec.trim().split_once('.').ok_or_else(malformed)?;
        if table.is_empty() || id_column.is_empty() || id_column.contains('.') {
            return Err(malformed());
        }

        validate_identifier(database)?;
        validate_identifier(table)?;
        validate_identifier(id_column)?;

        Ok(Self::new(database, table, id_column))
    }
}

impl fmt::Display for CheckSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.table, self.id_column)
    }
}

/// All checks of a run, grouped by database.
#[derive(Debug, Clone, Default)]
pub struct CheckPlan {
    by_database: BTreeMap<String, Vec<CheckSpec>>,
}

impl CheckPlan {
    /// Parse every configured check, failing on the first malformed one.
    pub fn from_databases(databases: &BTreeMap<String, DatabaseConfig>) -> Result<Self> {
        let mut by_database = BTreeMap::new();
        for (name, db) in databases {
            let checks = db
                .checks
                .iter()
                .map(|spec| CheckSpec::parse(name, spec))
                .collect::<Result<Vec<_>>>()?;
            if !checks.is_empty() {
                by_database.insert(name.clone(), checks);
            }
        }
        Ok(Self { by_database })
    }

    /// Build a plan from already parsed checks.
    pub fn from_checks(checks: impl IntoIterator<Item = CheckSpec>) -> Self {
        let mut by_database: BTreeMap<String, Vec<CheckSpec>> = BTreeMap::new();
        for check in checks {
            by_database
                .entry(check.database.clone())
                .or_default()
                .push(check);
        }
        Self { by_database }
    }

    /// All checks, database by database.
    pub fn iter(&self) -> impl Iterator<Item = &CheckSpec> {
        self.by_database.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_database.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_database.is_empty()
    }
}
