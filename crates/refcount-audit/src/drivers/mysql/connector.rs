//! MySQL/MariaDB connection provider.
//!
//! Implements the `ConnectionProvider` trait on top of SQLx, with one pool per
//! configured database.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Executor, Row};
use tracing::{debug, info, warn};

use crate::config::{Config, DatabaseConfig};
use crate::core::{BlobId, ConnectionProvider, CountRecord};
use crate::error::{AuditError, Result};
use crate::query::{AuditQuery, BLOB_ID_ALIAS, COUNT_ALIAS};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// MySQL/MariaDB connection provider.
pub struct MysqlConnector {
    pools: BTreeMap<String, MySqlPool>,
    authoritative: String,
}

impl MysqlConnector {
    /// Open and test one pool per configured database.
    pub async fn connect(config: &Config) -> Result<Self> {
        let default_size = config.audit.default_pool_size();

        let pools = try_join_all(config.databases.iter().map(|(name, db)| async move {
            let max_conns = db.max_connections.unwrap_or(default_size);
            let pool = Self::open_pool(name, db, max_conns).await?;
            Ok::<_, AuditError>((name.clone(), pool))
        }))
        .await?;

        Ok(Self {
            pools: pools.into_iter().collect(),
            authoritative: config.blob_table.database.clone(),
        })
    }

    async fn open_pool(name: &str, config: &DatabaseConfig, max_conns: u32) -> Result<MySqlPool> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(name)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(parse_ssl_mode(&config.ssl_mode));

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| AuditError::database(e, format!("creating MySQL pool for {}", name)))?;

        // Test connection
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| AuditError::database(e, format!("testing MySQL connection to {}", name)))?;

        info!(
            "Connected to MySQL: {}:{}/{} (max {} connections)",
            config.host, config.port, name, max_conns
        );

        Ok(pool)
    }

    fn pool(&self, database: &str) -> Result<&MySqlPool> {
        self.pools
            .get(database)
            .ok_or_else(|| AuditError::Config(format!("database '{}' is not configured", database)))
    }

    /// Run `query` on one pooled connection after setting its isolation level.
    async fn fetch_rows(&self, database: &str, query: &AuditQuery) -> Result<Vec<MySqlRow>> {
        let context = format!("{} on {}", query.kind, database);
        let mut conn = self
            .pool(database)?
            .acquire()
            .await
            .map_err(|e| AuditError::database(e, format!("acquiring connection for {}", context)))?;

        // Session scoped: a pooled connection keeps the level of its previous query.
        (&mut *conn)
            .execute(query.isolation.set_session_sql().as_str())
            .await
            .map_err(|e| AuditError::database(e, format!("setting isolation for {}", context)))?;

        let mut statement = sqlx::query(&query.sql);
        for value in &query.binds {
            statement = statement.bind(*value);
        }

        let rows = statement
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| AuditError::database(e, context.clone()))?;

        debug!("{}: {} rows", context, rows.len());
        Ok(rows)
    }
}

#[async_trait]
impl ConnectionProvider for MysqlConnector {
    fn authoritative_database(&self) -> &str {
        &self.authoritative
    }

    async fn query_counts(&self, database: &str, query: &AuditQuery) -> Result<Vec<CountRecord>> {
        let rows = self.fetch_rows(database, query).await?;
        rows.iter().map(row_to_count_record).collect()
    }

    async fn query_authoritative_ids(&self, query: &AuditQuery) -> Result<Vec<BlobId>> {
        let rows = self.fetch_rows(&self.authoritative, query).await?;
        rows.iter().map(row_to_blob_id).collect()
    }

    async fn ping(&self, database: &str) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(self.pool(database)?)
            .await
            .map_err(|e| AuditError::database(e, format!("pinging {}", database)))?;
        Ok(())
    }

    fn databases(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    async fn close(&self) {
        for pool in self.pools.values() {
            pool.close().await;
        }
    }
}

fn row_to_blob_id(row: &MySqlRow) -> Result<BlobId> {
    row.try_get::<u64, _>(BLOB_ID_ALIAS)
        .map_err(|e| AuditError::database(e, format!("decoding column {}", BLOB_ID_ALIAS)))
}

fn row_to_count_record(row: &MySqlRow) -> Result<CountRecord> {
    let blob_id = row_to_blob_id(row)?;
    let count: i64 = row
        .try_get(COUNT_ALIAS)
        .map_err(|e| AuditError::database(e, format!("decoding column {}", COUNT_ALIAS)))?;

    let count = u64::try_from(count).map_err(|_| {
        AuditError::database(
            format!("negative count {} for blob {}", count, blob_id),
            "decoding count row",
        )
    })?;

    Ok(CountRecord::new(blob_id, count))
}

/// Map the configured ssl_mode to SQLx's mode, accepting the libpq-style
/// spellings as well.
fn parse_ssl_mode(mode: &str) -> MySqlSslMode {
    match mode.to_lowercase().as_str() {
        "disabled" | "disable" => MySqlSslMode::Disabled,
        "preferred" | "prefer" => MySqlSslMode::Preferred,
        "required" | "require" => MySqlSslMode::Required,
        "verify_ca" | "verify-ca" => MySqlSslMode::VerifyCa,
        "verify_identity" | "verify-full" => MySqlSslMode::VerifyIdentity,
        other => {
            warn!("Unknown ssl_mode '{}', defaulting to Preferred", other);
            MySqlSslMode::Preferred
        }
    }
}
