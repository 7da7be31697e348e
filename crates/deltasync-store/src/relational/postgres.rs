//! `PostgreSQL`-backed implementation of [`BaselineStore`].
//!
//! Uses the sync `postgres` crate with a single `Mutex<Client>`; the
//! `postgres` crate manages its own internal tokio runtime, so the blocking
//! calls work from the blocking pool regardless of the caller's runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use deltasync_types::{
    Delta, DeltaMetadata, FieldSet, HistoryEntry, RelationalConfig, Result, SyncError,
};
use postgres::types::ToSql;
use postgres::{Client, NoTls};
use uuid::Uuid;

use crate::backend::{BaselineStore, RelationalStoreExt};
use crate::relational::{projection_rows, require_pk_fields, table_name, TableKind};

/// Idempotent DDL for the static history table (`PostgreSQL` dialect).
const CREATE_HISTORY: &str = "
CREATE TABLE IF NOT EXISTS delta_history (
    id VARCHAR PRIMARY KEY,
    client_id VARCHAR(100) NOT NULL,
    added_count INT NOT NULL DEFAULT 0,
    updated_count INT NOT NULL DEFAULT 0,
    removed_count INT NOT NULL DEFAULT 0,
    delta_metadata TEXT,
    created_at TEXT NOT NULL DEFAULT (now()::text)
);

CREATE INDEX IF NOT EXISTS idx_delta_history_client_created
    ON delta_history (client_id, created_at);
";

/// `PostgreSQL`-backed baseline storage.
pub struct PostgresStore {
    client: Arc<Mutex<Client>>,
    initialized: AtomicBool,
    auto_sync: bool,
    logging: bool,
}

impl PostgresStore {
    /// Connect using a libpq-style connection string or `PostgreSQL` URI.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] on connection failure.
    pub fn open(connstr: &str) -> Result<Self> {
        let client = Client::connect(connstr, NoTls).map_err(|e| db_err("connect", e))?;
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            initialized: AtomicBool::new(false),
            auto_sync: true,
            logging: false,
        })
    }

    /// Build from a relational configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for unusable settings (missing
    /// database, ssl requested without a TLS connector), otherwise the
    /// [`PostgresStore::open`] errors.
    pub fn from_config(config: &RelationalConfig) -> Result<Self> {
        if config.ssl {
            return Err(SyncError::config(
                "ssl connections are not supported by this build",
            ));
        }
        let mut store = Self::open(&connection_string(config)?)?;
        store.auto_sync = config.auto_sync;
        store.logging = config.logging;
        Ok(store)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SyncError::not_initialized(
                "postgres store used before initialize()",
            ))
        }
    }

    fn trace_sql(&self, client_id: &str, op: &str) {
        if self.logging {
            tracing::debug!(client_id, op, "postgres statement batch");
        }
    }
}

/// Assemble a libpq-style connection string from the config.
pub(crate) fn connection_string(config: &RelationalConfig) -> Result<String> {
    let database = config
        .database
        .as_deref()
        .filter(|d| !d.is_empty())
        .ok_or_else(|| SyncError::config("postgres store requires a database name"))?;
    let mut parts = vec![
        format!("host={}", config.host.as_deref().unwrap_or("localhost")),
        format!("port={}", config.port.unwrap_or(5432)),
        format!("dbname={database}"),
    ];
    if let Some(user) = config.username.as_deref().filter(|u| !u.is_empty()) {
        parts.push(format!("user={user}"));
    }
    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        parts.push(format!("password={password}"));
    }
    Ok(parts.join(" "))
}

fn db_err(op: &str, e: postgres::Error) -> SyncError {
    SyncError::io_with(format!("postgres {op}"), e)
}

fn lock(client: &Arc<Mutex<Client>>) -> Result<MutexGuard<'_, Client>> {
    client
        .lock()
        .map_err(|_| SyncError::io("postgres client lock poisoned"))
}

async fn on_blocking_pool<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| SyncError::io(format!("postgres task panicked: {e}")))?
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn ensure_client_tables(client: &mut Client, client_id: &str) -> Result<()> {
    for kind in [TableKind::Current, TableKind::Previous] {
        let table = table_name(client_id, kind);
        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    pk VARCHAR PRIMARY KEY,
                    hash VARCHAR NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (now()::text)
                );"
            ))
            .map_err(|e| db_err("create client tables", e))?;
    }
    Ok(())
}

fn insert_rows(
    tx: &mut postgres::Transaction<'_>,
    table: &str,
    rows: &[(String, String)],
) -> Result<u64> {
    let now = now_iso();
    let mut count = 0u64;
    for (pk, hash) in rows {
        tx.execute(
            &format!("INSERT INTO {table} (pk, hash, created_at) VALUES ($1, $2, $3)"),
            &[pk, hash, &now],
        )
        .map_err(|e| db_err("insert row", e))?;
        count += 1;
    }
    Ok(count)
}

fn select_pairs(
    client: &mut Client,
    sql: &str,
    params: &[&(dyn ToSql + Sync)],
) -> Result<Vec<(String, String)>> {
    let rows = client.query(sql, params).map_err(|e| db_err("query", e))?;
    Ok(rows
        .iter()
        .map(|row| (row.get::<_, String>(0), row.get::<_, String>(1)))
        .collect())
}

fn pairs_to_records(pairs: Vec<(String, String)>, pk_fields: &[String]) -> Vec<FieldSet> {
    pairs
        .into_iter()
        .map(|(pk, hash)| FieldSet::from_pk_string(&pk, pk_fields, Some(hash)))
        .collect()
}

#[async_trait]
impl BaselineStore for PostgresStore {
    async fn initialize(&self) -> Result<()> {
        if self.auto_sync {
            let client = Arc::clone(&self.client);
            on_blocking_pool(move || {
                lock(&client)?
                    .batch_execute(CREATE_HISTORY)
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
        let client = Arc::clone(&self.client);
        let id = client_id.to_string();
        let pk_fields = pk_fields.to_vec();
        let limit_pks: Option<Vec<String>> =
            limit_to.map(|records| records.iter().map(|r| r.pk_string(&pk_fields)).collect());

        on_blocking_pool(move || {
            let mut client = lock(&client)?;
            ensure_client_tables(&mut client, &id)?;
            let prev = table_name(&id, TableKind::Previous);

            let pairs = match &limit_pks {
                None => select_pairs(
                    &mut client,
                    &format!("SELECT pk, hash FROM {prev} ORDER BY pk"),
                    &[],
                )?,
                Some(pks) if pks.is_empty() => Vec::new(),
                Some(pks) => {
                    let placeholders: Vec<String> =
                        (1..=pks.len()).map(|i| format!("${i}")).collect();
                    let sql = format!(
                        "SELECT pk, hash FROM {prev} WHERE pk IN ({}) ORDER BY pk",
                        placeholders.join(", ")
                    );
                    let params: Vec<&(dyn ToSql + Sync)> =
                        pks.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
                    select_pairs(&mut client, &sql, &params)?
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
        let client = Arc::clone(&self.client);
        let id = client_id.to_string();
        let rows = projection_rows(&data, pk_fields);

        on_blocking_pool(move || {
            let mut client = lock(&client)?;
            ensure_client_tables(&mut client, &id)?;
            let cur = table_name(&id, TableKind::Current);
            let prev = table_name(&id, TableKind::Previous);
            let mut tx = client
                .transaction()
                .map_err(|e| db_err("update_previous: begin tx", e))?;

            let count = if failure_count == 0 {
                tx.execute(&format!("TRUNCATE {prev}"), &[])
                    .map_err(|e| db_err("update_previous: clear previous", e))?;
                tx.execute(
                    &format!("INSERT INTO {prev} SELECT pk, hash, created_at FROM {cur}"),
                    &[],
                )
                .map_err(|e| db_err("update_previous: promote current", e))?
            } else {
                tx.execute(&format!("TRUNCATE {prev}, {cur}"), &[])
                    .map_err(|e| db_err("update_previous: clear tables", e))?;
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
impl RelationalStoreExt for PostgresStore {
    async fn store_current(
        &self,
        client_id: &str,
        data: &[FieldSet],
        pk_fields: &[String],
    ) -> Result<u64> {
        self.ensure_initialized()?;
        require_pk_fields(pk_fields)?;
        self.trace_sql(client_id, "store_current");
        let client = Arc::clone(&self.client);
        let id = client_id.to_string();
        let rows = projection_rows(data, pk_fields);

        on_blocking_pool(move || {
            let mut client = lock(&client)?;
            ensure_client_tables(&mut client, &id)?;
            let cur = table_name(&id, TableKind::Current);
            let prev = table_name(&id, TableKind::Previous);
            let mut tx = client
                .transaction()
                .map_err(|e| db_err("store_current: begin tx", e))?;

            tx.execute(&format!("TRUNCATE {prev}"), &[])
                .map_err(|e| db_err("store_current: clear previous", e))?;
            tx.execute(
                &format!("INSERT INTO {prev} SELECT pk, hash, created_at FROM {cur}"),
                &[],
            )
            .map_err(|e| db_err("store_current: promote current", e))?;
            tx.execute(&format!("TRUNCATE {cur}"), &[])
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
        let client = Arc::clone(&self.client);
        let id = client_id.to_string();
        let pk_fields = pk_fields.to_vec();

        on_blocking_pool(move || {
            let mut client = lock(&client)?;
            ensure_client_tables(&mut client, &id)?;
            let cur = table_name(&id, TableKind::Current);
            let prev = table_name(&id, TableKind::Previous);
            let started = Instant::now();

            let added = select_pairs(
                &mut client,
                &format!(
                    "SELECT c.pk, c.hash FROM {cur} c \
                     LEFT JOIN {prev} p ON c.pk = p.pk WHERE p.pk IS NULL"
                ),
                &[],
            )?;
            let updated = select_pairs(
                &mut client,
                &format!(
                    "SELECT c.pk, c.hash FROM {cur} c \
                     INNER JOIN {prev} p ON c.pk = p.pk WHERE c.hash <> p.hash"
                ),
                &[],
            )?;
            let removed = select_pairs(
                &mut client,
                &format!(
                    "SELECT p.pk, p.hash FROM {prev} p \
                     LEFT JOIN {cur} c ON p.pk = c.pk WHERE c.pk IS NULL"
                ),
                &[],
            )?;

            let mut count = |table: &str| -> Result<u64> {
                let row = client
                    .query_one(&format!("SELECT COUNT(*) FROM {table}"), &[])
                    .map_err(|e| db_err("count", e))?;
                Ok(row.get::<_, i64>(0).unsigned_abs())
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
                #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
                client
                    .execute(
                        "INSERT INTO delta_history \
                         (id, client_id, added_count, updated_count, removed_count, delta_metadata, created_at) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7)",
                        &[
                            &Uuid::new_v4().to_string(),
                            &id,
                            &(added.len() as i32),
                            &(updated.len() as i32),
                            &(removed.len() as i32),
                            &metadata_json,
                            &now_iso(),
                        ],
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
        let client = Arc::clone(&self.client);
        let id = client_id.to_string();

        on_blocking_pool(move || {
            let mut client = lock(&client)?;
            let rows = client
                .query(
                    "SELECT id, client_id, added_count, updated_count, removed_count, \
                     delta_metadata, created_at \
                     FROM delta_history WHERE client_id = $1 \
                     ORDER BY created_at DESC, id DESC LIMIT $2",
                    &[&id, &i64::from(limit)],
                )
                .map_err(|e| db_err("get_history: query", e))?;

            Ok(rows
                .iter()
                .map(|row| HistoryEntry {
                    id: row.get(0),
                    client_id: row.get(1),
                    added_count: row.get::<_, i32>(2).unsigned_abs().into(),
                    updated_count: row.get::<_, i32>(3).unsigned_abs().into(),
                    removed_count: row.get::<_, i32>(4).unsigned_abs().into(),
                    metadata: row
                        .get::<_, Option<String>>(5)
                        .and_then(|m| serde_json::from_str(&m).ok()),
                    created_at: row.get(6),
                })
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(database: Option<&str>) -> RelationalConfig {
        RelationalConfig {
            kind: Some(deltasync_types::RelationalKind::Postgres),
            host: Some("db.internal".into()),
            port: Some(5433),
            username: Some("sync".into()),
            password: Some("secret".into()),
            database: database.map(str::to_string),
            ..RelationalConfig::default()
        }
    }

    #[test]
    fn connection_string_from_config() {
        let connstr = connection_string(&config(Some("baselines"))).unwrap();
        assert_eq!(
            connstr,
            "host=db.internal port=5433 dbname=baselines user=sync password=secret"
        );
    }

    #[test]
    fn connection_string_requires_database() {
        assert!(connection_string(&config(None)).is_err());
    }

    #[test]
    fn connection_string_defaults() {
        let cfg = RelationalConfig {
            kind: Some(deltasync_types::RelationalKind::Postgres),
            database: Some("baselines".into()),
            ..RelationalConfig::default()
        };
        let connstr = connection_string(&cfg).unwrap();
        assert_eq!(connstr, "host=localhost port=5432 dbname=baselines");
    }

    #[test]
    fn ssl_rejected_without_connector() {
        let mut cfg = config(Some("baselines"));
        cfg.ssl = true;
        let err = PostgresStore::from_config(&cfg).unwrap_err();
        assert!(matches!(err, SyncError::Config { .. }));
    }
}
