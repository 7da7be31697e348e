//! `MySQL`-backed implementation of [`BaselineStore`].
//!
//! Uses the sync `mysql` crate with a single `Mutex<Conn>`. Table swaps use
//! `DELETE FROM` rather than `TRUNCATE` — `TRUNCATE` is DDL in `MySQL` and
//! would implicitly commit, breaking the promotion transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use deltasync_types::{
    Delta, DeltaMetadata, FieldSet, HistoryEntry, RelationalConfig, Result, SyncError,
};
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, TxOpts, Value};
use uuid::Uuid;

use crate::backend::{BaselineStore, RelationalStoreExt};
use crate::relational::{projection_rows, require_pk_fields, table_name, TableKind};

/// Idempotent DDL for the static history table (`MySQL` dialect). The
/// `(client_id, created_at)` index is declared inline because `MySQL` has
/// no `CREATE INDEX IF NOT EXISTS`.
const CREATE_HISTORY: &str = "
CREATE TABLE IF NOT EXISTS delta_history (
    id VARCHAR(36) NOT NULL PRIMARY KEY,
    client_id VARCHAR(100) NOT NULL,
    added_count INT NOT NULL DEFAULT 0,
    updated_count INT NOT NULL DEFAULT 0,
    removed_count INT NOT NULL DEFAULT 0,
    delta_metadata TEXT,
    created_at VARCHAR(64) NOT NULL,
    INDEX idx_delta_history_client_created (client_id, created_at)
)";

/// `MySQL`-backed baseline storage.
pub struct MysqlStore {
    conn: Arc<Mutex<Conn>>,
    initialized: AtomicBool,
    auto_sync: bool,
    logging: bool,
}

impl MysqlStore {
    /// Build from a relational configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for unusable settings (missing
    /// database, ssl requested without a TLS connector) and
    /// [`SyncError::Io`] on connection failure.
    pub fn from_config(config: &RelationalConfig) -> Result<Self> {
        if config.ssl {
            return Err(SyncError::config(
                "ssl connections are not supported by this build",
            ));
        }
        let database = config
            .database
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| SyncError::config("mysql store requires a database name"))?;
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.as_deref().unwrap_or("localhost")))
            .tcp_port(config.port.unwrap_or(3306))
            .user(config.username.as_deref())
            .pass(config.password.as_deref())
            .db_name(Some(database));
        let conn = Conn::new(opts).map_err(|e| db_err("connect", e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            initialized: AtomicBool::new(false),
            auto_sync: config.auto_sync,
            logging: config.logging,
        })
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SyncError::not_initialized(
                "mysql store used before initialize()",
            ))
        }
    }

    fn trace_sql(&self, client_id: &str, op: &str) {
        if self.logging {
            tracing::debug!(client_id, op, "mysql statement batch");
        }
    }
}

fn db_err(op: &str, e: mysql::Error) -> SyncError {
    SyncError::io_with(format!("mysql {op}"), e)
}

fn lock(conn: &Arc<Mutex<Conn>>) -> Result<MutexGuard<'_, Conn>> {
    conn.lock()
        .map_err(|_| SyncError::io("mysql connection lock poisoned"))
}

async fn on_blocking_pool<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| SyncError::io(format!("mysql task panicked: {e}")))?
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn ensure_client_tables(conn: &mut Conn, client_id: &str) -> Result<()> {
    for kind in [TableKind::Current, TableKind::Previous] {
        let table = table_name(client_id, kind);
        conn.query_drop(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                pk VARCHAR(255) NOT NULL PRIMARY KEY,
                hash VARCHAR(255) NOT NULL,
                created_at VARCHAR(64) NOT NULL
            )"
        ))
        .map_err(|e| db_err("create client tables", e))?;
    }
    Ok(())
}

fn insert_rows(
    tx: &mut mysql::Transaction<'_>,
    table: &str,
    rows: &[(String, String)],
) -> Result<u64> {
    let now = now_iso();
    let mut count = 0u64;
    for (pk, hash) in rows {
        tx.exec_drop(
            format!("INSERT INTO {table} (pk, hash, created_at) VALUES (?, ?, ?)"),
            (pk.as_str(), hash.as_str(), now.as_str()),
        )
        .map_err(|e| db_err("insert row", e))?;
        count += 1;
    }
    Ok(count)
}

fn select_pairs(conn: &mut Conn, sql: &str) -> Result<Vec<(String, String)>> {
    conn.query_map(sql, |(pk, hash): (String, String)| (pk, hash))
        .map_err(|e| db_err("query", e))
}

fn pairs_to_records(pairs: Vec<(String, String)>, pk_fields: &[String]) -> Vec<FieldSet> {
    pairs
        .into_iter()
        .map(|(pk, hash)| FieldSet::from_pk_string(&pk, pk_fields, Some(hash)))
        .collect()
}

#[async_trait]
impl BaselineStore for MysqlStore {
    async fn initialize(&self) -> Result<()> {
        if self.auto_sync {
            let conn = Arc::clone(&self.conn);
            on_blocking_pool(move || {
                lock(&conn)?
                    .query_drop(CREATE_HISTORY)
                    .map_err(|e| db_err("create history table", e))
            })
            .await?;
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn fetch_previous(
        &self,
        client_id: &str,
        pk_fields: &[String],
        limit_to: Option<&[FieldSet]>,
    ) -> Result<Vec<FieldSet>> {
        self.ensure_initialized()?;
        self.trace_sql(client_id, "fetch_previous");
        let conn = Arc::clone(&self.conn);
        let id = client_id.to_string();
        let pk_fields = pk_fields.to_vec();
        let limit_pks: Option<Vec<String>> =
            limit_to.map(|records| records.iter().map(|r| r.pk_string(&pk_fields)).collect());

        on_blocking_pool(move || {
            let mut conn = lock(&conn)?;
            ensure_client_tables(&mut conn, &id)?;
            let prev = table_name(&id, TableKind::Previous);

            let pairs = match &limit_pks {
                None => select_pairs(&mut conn, &format!("SELECT pk, hash FROM {prev} ORDER BY pk"))?,
                Some(pks) if pks.is_empty() => Vec::new(),
                Some(pks) => {
                    let placeholders = vec!["?"; pks.len()].join(", ");
                    let sql = format!(
                        "SELECT pk, hash FROM {prev} WHERE pk IN ({placeholders}) ORDER BY pk"
                    );
                    let params: Vec<Value> = pks.iter().map(Value::from).collect();
                    conn.exec_map(sql, params, |(pk, hash): (String, String)| (pk, hash))
                        .map_err(|e| db_err("query", e))?
                }
            };
            Ok(pairs_to_records(pairs, &pk_fields))
        })
        .await
    }

    async fn update_previous(
        &self,
        client_id: &str,
        data: Vec<FieldSet>,
        pk_fields: &[String],
        failure_count: u64,
    ) -> Result<u64> {
        self.ensure_initialized()?;
        self.trace_sql(client_id, "update_previous");
        let conn = Arc::clone(&self.conn);
        let id = client_id.to_string();
        let rows = projection_rows(&data, pk_fields);

        on_blocking_pool(move || {
            let mut conn = lock(&conn)?;
            ensure_client_tables(&mut conn, &id)?;
            let cur = table_name(&id, TableKind::Current);
            let prev = table_name(&id, TableKind::Previous);
            let mut tx = conn
                .start_transaction(TxOpts::default())
                .map_err(|e| db_err("update_previous: begin tx", e))?;

            let count = if failure_count == 0 {
                tx.query_drop(format!("DELETE FROM {prev}"))
                    .map_err(|e| db_err("update_previous: clear previous", e))?;
                tx.query_drop(format!(
                    "INSERT INTO {prev} SELECT pk, hash, created_at FROM {cur}"
                ))
                .map_err(|e| db_err("update_previous: promote current", e))?;
                tx.affected_rows()
            } else {
                tx.query_drop(format!("DELETE FROM {prev}"))
                    .map_err(|e| db_err("update_previous: clear previous", e))?;
                tx.query_drop(format!("DELETE FROM {cur}"))
                    .map_err(|e| db_err("update_previous: clear current", e))?;
                let count = insert_rows(&mut tx, &prev, &rows)?;
                insert_rows(&mut tx, &cur, &rows)?;
                count
            };

            tx.commit()
                .map_err(|e| db_err("update_previous: commit", e))?;
            Ok(count)
        })
        .await
    }

    fn as_relational(&self) -> Option<&dyn RelationalStoreExt> {
        Some(self)
    }
}

#[async_trait]
impl RelationalStoreExt for MysqlStore {
    async fn store_current(
        &self,
        client_id: &str,
        data: &[FieldSet],
        pk_fields: &[String],
    ) -> Result<u64> {
        self.ensure_initialized()?;
        require_pk_fields(pk_fields)?;
        self.trace_sql(client_id, "store_current");
        let conn = Arc::clone(&self.conn);
        let id = client_id.to_string();
        let rows = projection_rows(data, pk_fields);

        on_blocking_pool(move || {
            let mut conn = lock(&conn)?;
            ensure_client_tables(&mut conn, &id)?;
            let cur = table_name(&id, TableKind::Current);
            let prev = table_name(&id, TableKind::Previous);
            let mut tx = conn
                .start_transaction(TxOpts::default())
                .map_err(|e| db_err("store_current: begin tx", e))?;

            tx.query_drop(format!("DELETE FROM {prev}"))
                .map_err(|e| db_err("store_current: clear previous", e))?;
            tx.query_drop(format!(
                "INSERT INTO {prev} SELECT pk, hash, created_at FROM {cur}"
            ))
            .map_err(|e| db_err("store_current: promote current", e))?;
            tx.query_drop(format!("DELETE FROM {cur}"))
                .map_err(|e| db_err("store_current: clear current", e))?;
            let count = insert_rows(&mut tx, &cur, &rows)?;

            tx.commit().map_err(|e| db_err("store_current: commit", e))?;
            Ok(count)
        })
        .await
    }

    async fn fetch_delta(&self, client_id: &str, pk_fields: &[String]) -> Result<Delta> {
        self.ensure_initialized()?;
        require_pk_fields(pk_fields)?;
        self.trace_sql(client_id, "fetch_delta");
        let conn = Arc::clone(&self.conn);
        let id = client_id.to_string();
        let pk_fields = pk_fields.to_vec();

        on_blocking_pool(move || {
            let mut conn = lock(&conn)?;
            ensure_client_tables(&mut conn, &id)?;
            let cur = table_name(&id, TableKind::Current);
            let prev = table_name(&id, TableKind::Previous);
            let started = Instant::now();

            let added = select_pairs(
                &mut conn,
                &format!(
                    "SELECT c.pk, c.hash FROM {cur} c \
                     LEFT JOIN {prev} p ON c.pk = p.pk WHERE p.pk IS NULL"
                ),
            )?;
            let updated = select_pairs(
                &mut conn,
                &format!(
                    "SELECT c.pk, c.hash FROM {cur} c \
                     INNER JOIN {prev} p ON c.pk = p.pk WHERE c.hash <> p.hash"
                ),
            )?;
            let removed = select_pairs(
                &mut conn,
                &format!(
                    "SELECT p.pk, p.hash FROM {prev} p \
                     LEFT JOIN {cur} c ON p.pk = c.pk WHERE c.pk IS NULL"
                ),
            )?;

            let mut count = |table: &str| -> Result<u64> {
                conn.query_first::<u64, _>(format!("SELECT COUNT(*) FROM {table}"))
                    .map_err(|e| db_err("count", e))
                    .map(Option::unwrap_or_default)
            };
            let total_current = count(&cur)?;
            let total_previous = count(&prev)?;

            // An empty delta means the cycle ends without a push; it leaves
            // no history row either.
            if !(added.is_empty() && updated.is_empty() && removed.is_empty()) {
                #[allow(clippy::cast_possible_truncation)]
                let metadata = DeltaMetadata {
                    computation_time_ms: started.elapsed().as_millis() as u64,
                    total_current,
                    total_previous,
                    notes: Vec::new(),
                };
                let metadata_json = serde_json::to_string(&metadata)
                    .map_err(|e| SyncError::parse(format!("history metadata: {e}")))?;
                conn.exec_drop(
                    "INSERT INTO delta_history \
                     (id, client_id, added_count, updated_count, removed_count, delta_metadata, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        id.as_str(),
                        added.len() as u64,
                        updated.len() as u64,
                        removed.len() as u64,
                        metadata_json,
                        now_iso(),
                    ),
                )
                .map_err(|e| db_err("fetch_delta: write history", e))?;
            }

            Ok(Delta {
                added: pairs_to_records(added, &pk_fields),
                updated: pairs_to_records(updated, &pk_fields),
                removed: pairs_to_records(removed, &pk_fields),
            })
        })
        .await
    }

    async fn get_history(&self, client_id: &str, limit: u32) -> Result<Vec<HistoryEntry>> {
        self.ensure_initialized()?;
        let conn = Arc::clone(&self.conn);
        let id = client_id.to_string();

        on_blocking_pool(move || {
            let mut conn = lock(&conn)?;
            type Row = (String, String, u64, u64, u64, Option<String>, String);
            let rows: Vec<Row> = conn
                .exec(
                    "SELECT id, client_id, added_count, updated_count, removed_count, \
                     delta_metadata, created_at \
                     FROM delta_history WHERE client_id = ? \
                     ORDER BY created_at DESC, id DESC LIMIT ?",
                    (id.as_str(), u64::from(limit)),
                )
                .map_err(|e| db_err("get_history: query", e))?;

            Ok(rows
                .into_iter()
                .map(|(id, client_id, added, updated, removed, metadata, created_at)| {
                    HistoryEntry {
                        id,
                        client_id,
                        added_count: added,
                        updated_count: updated,
                        removed_count: removed,
                        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                        created_at,
                    }
                })
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltasync_types::RelationalKind;

    #[test]
    fn missing_database_rejected() {
        let cfg = RelationalConfig {
            kind: Some(RelationalKind::Mysql),
            ..RelationalConfig::default()
        };
        let err = MysqlStore::from_config(&cfg).unwrap_err();
        assert!(matches!(err, SyncError::Config { .. }));
    }

    #[test]
    fn ssl_rejected_without_connector() {
        let cfg = RelationalConfig {
            kind: Some(RelationalKind::Mysql),
            database: Some("baselines".into()),
            ssl: true,
            ..RelationalConfig::default()
        };
        let err = MysqlStore::from_config(&cfg).unwrap_err();
        assert!(matches!(err, SyncError::Config { .. }));
    }
}
