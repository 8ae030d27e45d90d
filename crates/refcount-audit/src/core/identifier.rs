//! Identifier validation and quoting for generated SQL.
//!
//! Database, table and column names come from configuration and cannot be
//! passed as bind parameters, so they are validated and backtick-quoted before
//! being spliced into query text. Identifier values (blob ids) are always bound.

use crate::error::{AuditError, Result};

/// Maximum identifier length accepted by MySQL.
const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AuditError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(AuditError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(AuditError::Config(format!(
            "Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a MySQL identifier using backticks.
///
/// Escapes backticks by doubling them and wraps in backticks.
/// Validates the identifier before quoting.
///
/// ```ignore
/// assert_eq!(quote_mysql("users")?, "`users`");
/// assert_eq!(quote_mysql("table`name")?, "`table``name`");
/// ```
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Qualify a MySQL table name with its database.
pub fn qualify_mysql(database: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mysql(database)?, quote_mysql(table)?))
}
