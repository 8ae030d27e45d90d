//! Configuration validation.

use super::{Config, MAX_CONCURRENT_RECOUNTS, MAX_PARALLEL_CHECKS};
use crate::core::identifier::validate_identifier;
use crate::core::CheckPlan;
use crate::error::{AuditError, Result};

const SSL_MODES: &[&str] = &[
    "disabled",
    "preferred",
    "required",
    "verify_ca",
    "verify_identity",
];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.databases.is_empty() {
        return Err(AuditError::Config("at least one database is required".into()));
    }

    // Blob table validation
    let blob = &config.blob_table;
    validate_identifier(&blob.database)?;
    validate_identifier(&blob.table)?;
    validate_identifier(&blob.id_column)?;
    validate_identifier(&blob.count_column)?;
    if config.authoritative().is_none() {
        return Err(AuditError::Config(format!(
            "blob_table.database '{}' is not listed under databases",
            blob.database
        )));
    }

    // Database validation
    for (name, db) in &config.databases {
        validate_identifier(name)?;
        if db.host.is_empty() {
            return Err(AuditError::Config(format!("databases.{}.host is required", name)));
        }
        if db.user.is_empty() {
            return Err(AuditError::Config(format!("databases.{}.user is required", name)));
        }
        if !SSL_MODES.contains(&db.ssl_mode.to_lowercase().as_str()) {
            return Err(AuditError::Config(format!(
                "databases.{}.ssl_mode must be one of {:?}, got '{}'",
                name, SSL_MODES, db.ssl_mode
            )));
        }
        if let Some(0) = db.max_connections {
            return Err(AuditError::Config(format!(
                "databases.{}.max_connections must be at least 1",
                name
            )));
        }
    }

    // Every check must parse before any query runs
    let plan = CheckPlan::from_databases(&config.databases)?;
    if plan.is_empty() {
        return Err(AuditError::Config(
            "no checks configured: add \"table.idColumn\" entries under databases.<name>.checks"
                .into(),
        ));
    }

    // Audit config validation - only check if explicitly set
    if let Some(0) = config.audit.chunk_size {
        return Err(AuditError::Config("audit.chunk_size must be at least 1".into()));
    }
    if let Some(0) = config.audit.concurrent_recounts {
        return Err(AuditError::Config(
            "audit.concurrent_recounts must be at least 1".into(),
        ));
    }
    if let Some(0) = config.audit.parallel_checks {
        return Err(AuditError::Config("audit.parallel_checks must be at least 1".into()));
    }
    if let Some(n) = config.audit.concurrent_recounts.filter(|n| *n > MAX_CONCURRENT_RECOUNTS) {
        return Err(AuditError::Config(format!(
            "audit.concurrent_recounts must be at most {}, got {}",
            MAX_CONCURRENT_RECOUNTS, n
        )));
    }
    if let Some(n) = config.audit.parallel_checks.filter(|n| *n > MAX_PARALLEL_CHECKS) {
        return Err(AuditError::Config(format!(
            "audit.parallel_checks must be at most {}, got {}",
            MAX_PARALLEL_CHECKS, n
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuditConfig, BlobTableConfig, DatabaseConfig};
    use std::collections::BTreeMap;

    fn database(checks: &[&str]) -> DatabaseConfig {
        DatabaseConfig {
            host: "localhost".to_string(),
            port: 3306,
            user: "audit".to_string(),
            password: "password".to_string(),
            ssl_mode: "disabled".to_string(),
            max_connections: None,
            checks: checks.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn valid_config() -> Config {
        let mut databases = BTreeMap::new();
        databases.insert("ProtonMailGlobal".to_string(), database(&[]));
        databases.insert(
            "ProtonMail".to_string(),
            database(&["Attachment.BlobStorageID", "MessageData.BlobStorageID"]),
        );

        Config {
            audit: AuditConfig::default(),
            blob_table: BlobTableConfig {
                database: "ProtonMailGlobal".to_string(),
                table: "BlobStorage".to_string(),
                id_column: "BlobStorageID".to_string(),
                count_column: "NumReferences".to_string(),
            },
            databases,
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_blob_database_must_be_configured() {
        let mut config = valid_config();
        config.blob_table.database = "Elsewhere".to_string();
        assert!(matches!(validate(&config), Err(AuditError::Config(_))));
    }

    #[test]
    fn test_malformed_check_is_rejected() {
        let mut config = valid_config();
        config
            .databases
            .get_mut("ProtonMail")
            .unwrap()
            .checks
            .push("AttachmentWithoutColumn".to_string());
        assert!(matches!(
            validate(&config),
            Err(AuditError::MalformedCheckSpec { .. })
        ));
    }

    #[test]
    fn test_no_checks_is_rejected() {
        let mut config = valid_config();
        config.databases.get_mut("ProtonMail").unwrap().checks.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let mut config = valid_config();
        config.audit.concurrent_recounts = Some(0);
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.audit.chunk_size = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_excessive_concurrency_is_rejected() {
        let mut config = valid_config();
        config.audit.concurrent_recounts = Some(usize::MAX);
        assert!(matches!(validate(&config), Err(AuditError::Config(_))));

        let mut config = valid_config();
        config.audit.parallel_checks = Some(MAX_PARALLEL_CHECKS + 1);
        assert!(matches!(validate(&config), Err(AuditError::Config(_))));

        let mut config = valid_config();
        config.audit.concurrent_recounts = Some(MAX_CONCURRENT_RECOUNTS);
        config.audit.parallel_checks = Some(MAX_PARALLEL_CHECKS);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_unknown_ssl_mode_is_rejected() {
        let mut config = valid_config();
        config.databases.get_mut("ProtonMail").unwrap().ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_database_config_debug_redacts_password() {
        let mut db = database(&[]);
        db.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", db);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
