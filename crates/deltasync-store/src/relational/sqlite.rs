//! `SQLite`-backed implementation of [`BaselineStore`].
//!
//! Uses a single `Mutex<Connection>`; the async trait methods hop onto the
//! blocking pool, so the orchestrator never blocks a runtime worker on
//! database I/O.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use deltasync_types::{
    Delta, DeltaMetadata, FieldSet, HistoryEntry, RelationalConfig, Result, SyncError,
};
use rusqlite::Connection;
use uuid::Uuid;

use crate::backend::{BaselineStore, RelationalStoreExt};
use crate::relational::{projection_rows, require_pk_fields, table_name, TableKind};

/// Idempotent DDL for the static history table.
const CREATE_HISTORY: &str = "
CREATE TABLE IF NOT EXISTS delta_history (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL,
    added_count INTEGER NOT NULL DEFAULT 0,
    updated_count INTEGER NOT NULL DEFAULT 0,
    removed_count INTEGER NOT NULL DEFAULT 0,
    delta_metadata TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_delta_history_client_created
    ON delta_history (client_id, created_at);
";

/// `SQLite`-backed baseline storage.
///
/// Create with [`SqliteStore::open`] for file-backed persistence or
/// [`SqliteStore::in_memory`] for tests.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    initialized: AtomicBool,
    auto_sync: bool,
    logging: bool,
}

impl SqliteStore {
    /// Open or create a baseline database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the directory can't be created or the
    /// database can't be opened.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| db_err("open", e))?;
        Ok(Self::from_connection(conn, true, false))
    }

    /// Create an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the in-memory database can't be opened.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("open", e))?;
        Ok(Self::from_connection(conn, true, false))
    }

    /// Build from a relational configuration (`filename` is required).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] without a filename, otherwise the
    /// [`SqliteStore::open`] errors.
    pub fn from_config(config: &RelationalConfig) -> Result<Self> {
        let filename = config
            .filename
            .as_deref()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| SyncError::config("sqlite store requires a filename"))?;
        let mut store = Self::open(Path::new(filename))?;
        store.auto_sync = config.auto_sync;
        store.logging = config.logging;
        Ok(store)
    }

    fn from_connection(conn: Connection, auto_sync: bool, logging: bool) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            initialized: AtomicBool::new(false),
            auto_sync,
            logging,
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SyncError::not_initialized(
                "sqlite store used before initialize()",
            ))
        }
    }

    fn trace_sql(&self, client_id: &str, op: &str) {
        if self.logging {
            tracing::debug!(client_id, op, "sqlite statement batch");
        }
    }
}

fn db_err(op: &str, e: rusqlite::Error) -> SyncError {
    SyncError::io_with(format!("sqlite {op}"), e)
}

fn lock(conn: &Arc<Mutex<Connection>>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| SyncError::io("sqlite connection lock poisoned"))
}

async fn on_blocking_pool<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| SyncError::io(format!("sqlite task panicked: {e}")))?
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn ensure_client_tables(conn: &Connection, client_id: &str) -> Result<()> {
    for kind in [TableKind::Current, TableKind::Previous] {
        let table = table_name(client_id, kind);
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                pk TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );"
        ))
        .map_err(|e| db_err("create client tables", e))?;
    }
    Ok(())
}

fn insert_rows(
    tx: &rusqlite::Transaction<'_>,
    table: &str,
    rows: &[(String, String)],
) -> Result<u64> {
    let mut stmt = tx
        .prepare(&format!(
            "INSERT INTO {table} (pk, hash, created_at) VALUES (?1, ?2, ?3)"
        ))
        .map_err(|e| db_err("prepare insert", e))?;
    let now = now_iso();
    let mut count = 0u64;
    for (pk, hash) in rows {
        stmt.execute(rusqlite::params![pk, hash, now])
            .map_err(|e| db_err("insert row", e))?;
        count += 1;
    }
    Ok(count)
}

fn select_pairs(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(sql).map_err(|e| db_err("prepare select", e))?;
    let rows = stmt
        .query_map(params, |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| db_err("query", e))?;
    let mut pairs = Vec::new();
    for row in rows {
        pairs.push(row.map_err(|e| db_err("read row", e))?);
    }
    Ok(pairs)
}

fn pairs_to_records(pairs: Vec<(String, String)>, pk_fields: &[String]) -> Vec<FieldSet> {
    pairs
        .into_iter()
        .map(|(pk, hash)| FieldSet::from_pk_string(&pk, pk_fields, Some(hash)))
        .collect()
}

#[async_trait]
impl BaselineStore for SqliteStore {
    async fn initialize(&self) -> Result<()> {
        if self.auto_sync {
            let conn = Arc::clone(&self.conn);
            on_blocking_pool(move || {
                lock(&conn)?
                    .execute_batch(CREATE_HISTORY)
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
        let client = client_id.to_string();
        let pk_fields = pk_fields.to_vec();
        let limit_pks: Option<Vec<String>> =
            limit_to.map(|records| records.iter().map(|r| r.pk_string(&pk_fields)).collect());

        on_blocking_pool(move || {
            let conn = lock(&conn)?;
            ensure_client_tables(&conn, &client)?;
            let prev = table_name(&client, TableKind::Previous);

            let pairs = match &limit_pks {
                None => select_pairs(
                    &conn,
                    &format!("SELECT pk, hash FROM {prev} ORDER BY rowid"),
                    &[],
                )?,
                Some(pks) if pks.is_empty() => Vec::new(),
                Some(pks) => {
                    let placeholders = vec!["?"; pks.len()].join(", ");
                    let sql = format!(
                        "SELECT pk, hash FROM {prev} WHERE pk IN ({placeholders}) ORDER BY rowid"
                    );
                    let mut stmt = conn.prepare(&sql).map_err(|e| db_err("prepare select", e))?;
                    let rows = stmt
                        .query_map(rusqlite::params_from_iter(pks.iter()), |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                        })
                        .map_err(|e| db_err("query", e))?;
                    let mut pairs = Vec::new();
                    for row in rows {
                        pairs.push(row.map_err(|e| db_err("read row", e))?);
                    }
                    pairs
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
        let client = client_id.to_string();
        let rows = projection_rows(&data, pk_fields);

        on_blocking_pool(move || {
            let conn = lock(&conn)?;
            ensure_client_tables(&conn, &client)?;
            let cur = table_name(&client, TableKind::Current);
            let prev = table_name(&client, TableKind::Previous);
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| db_err("update_previous: begin tx", e))?;

            let count = if failure_count == 0 {
                // Clean cycle: promote current to previous verbatim.
                tx.execute(&format!("DELETE FROM {prev}"), [])
                    .map_err(|e| db_err("update_previous: clear previous", e))?;
                let promoted = tx
                    .execute(
                        &format!("INSERT INTO {prev} SELECT pk, hash, created_at FROM {cur}"),
                        [],
                    )
                    .map_err(|e| db_err("update_previous: promote current", e))?;
                promoted as u64
            } else {
                // Repaired cycle: rewrite both tables from the repaired
                // projection, keeping them equal to prevent drift.
                tx.execute(&format!("DELETE FROM {prev}"), [])
                    .map_err(|e| db_err("update_previous: clear previous", e))?;
                tx.execute(&format!("DELETE FROM {cur}"), [])
                    .map_err(|e| db_err("update_previous: clear current", e))?;
                let count = insert_rows(&tx, &prev, &rows)?;
                insert_rows(&tx, &cur, &rows)?;
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
impl RelationalStoreExt for SqliteStore {
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
        let client = client_id.to_string();
        let rows = projection_rows(data, pk_fields);

        on_blocking_pool(move || {
            let conn = lock(&conn)?;
            ensure_client_tables(&conn, &client)?;
            let cur = table_name(&client, TableKind::Current);
            let prev = table_name(&client, TableKind::Previous);
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| db_err("store_current: begin tx", e))?;

            tx.execute(&format!("DELETE FROM {prev}"), [])
                .map_err(|e| db_err("store_current: clear previous", e))?;
            tx.execute(
                &format!("INSERT INTO {prev} SELECT pk, hash, created_at FROM {cur}"),
                [],
            )
            .map_err(|e| db_err("store_current: promote current", e))?;
            tx.execute(&format!("DELETE FROM {cur}"), [])
                .map_err(|e| db_err("store_current: clear current", e))?;
            let count = insert_rows(&tx, &cur, &rows)?;

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
        let client = client_id.to_string();
        let pk_fields = pk_fields.to_vec();

        on_blocking_pool(move || {
            let conn = lock(&conn)?;
            ensure_client_tables(&conn, &client)?;
            let cur = table_name(&client, TableKind::Current);
            let prev = table_name(&client, TableKind::Previous);
            let started = Instant::now();

            let added = select_pairs(
                &conn,
                &format!(
                    "SELECT c.pk, c.hash FROM {cur} c \
                     LEFT JOIN {prev} p ON c.pk = p.pk WHERE p.pk IS NULL"
                ),
                &[],
            )?;
            let updated = select_pairs(
                &conn,
                &format!(
                    "SELECT c.pk, c.hash FROM {cur} c \
                     INNER JOIN {prev} p ON c.pk = p.pk WHERE c.hash <> p.hash"
                ),
                &[],
            )?;
            let removed = select_pairs(
                &conn,
                &format!(
                    "SELECT p.pk, p.hash FROM {prev} p \
                     LEFT JOIN {cur} c ON p.pk = c.pk WHERE c.pk IS NULL"
                ),
                &[],
            )?;

            let count = |table: &str| -> Result<u64> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|n| n.unsigned_abs())
                .map_err(|e| db_err("count", e))
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
                conn.execute(
                    "INSERT INTO delta_history \
                     (id, client_id, added_count, updated_count, removed_count, delta_metadata, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        Uuid::new_v4().to_string(),
                        client,
                        added.len() as i64,
                        updated.len() as i64,
                        removed.len() as i64,
                        metadata_json,
                        now_iso(),
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
        let conn = Arc::clone(&self.conn);
        let client = client_id.to_string();

        on_blocking_pool(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, client_id, added_count, updated_count, removed_count, \
                     delta_metadata, created_at \
                     FROM delta_history WHERE client_id = ?1 \
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                )
                .map_err(|e| db_err("get_history: prepare", e))?;
            let rows = stmt
                .query_map(rusqlite::params![client, i64::from(limit)], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })
                .map_err(|e| db_err("get_history: query", e))?;

            let mut entries = Vec::new();
            for row in rows {
                let (id, client_id, added, updated, removed, metadata, created_at) =
                    row.map_err(|e| db_err("get_history: read row", e))?;
                entries.push(HistoryEntry {
                    id,
                    client_id,
                    added_count: added.unsigned_abs(),
                    updated_count: updated.unsigned_abs(),
                    removed_count: removed.unsigned_abs(),
                    metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                    created_at,
                });
            }
            Ok(entries)
        })
        .await
    }
}
