//! SQLite-backed local store
//!
//! The one durable store shared by every component. Each method is a single
//! statement and therefore atomic on its own, except `dead_letter_mutation`
//! which moves a row between tables in one transaction. Nothing here retries.
//!
//! ## Tables
//!
//! - `cache` - whole-collection snapshots
//! - `outbox` - pending mutations, scanned by `(created_at, seq)`
//! - `dead_letters` - permanently failed mutations
//! - `drafts` - autosaved form state

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::Config;
use crate::models::{CachedCollection, DeadLetter, Draft, QueuedMutation};
use crate::storage::error::{is_primary_key_violation, StorageError, StorageResult};
use crate::storage::schema::{init_schema, needs_init};

const MUTATION_COLUMNS: &str =
    "id, collection, endpoint, method, payload, meta, retries, last_error, created_at";

/// Durable local tables
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open or create the database configured in `config`
    pub fn open(config: &Config) -> StorageResult<Self> {
        Self::open_path(&config.database_path())
    }

    /// Open or create a database at a specific path
    pub fn open_path(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Unavailable {
            details: "connection lock poisoned".to_string(),
        })
    }

    // ==================== Cache ====================

    /// Overwrite the snapshot for a collection key
    ///
    /// Returns the stored `updated_at`, which never moves backwards for a key.
    pub fn put_cache(&self, row: &CachedCollection) -> StorageResult<DateTime<Utc>> {
        let items = serde_json::to_string(&row.items)?;
        let conn = self.conn()?;
        let stored: i64 = conn.query_row(
            r#"
            INSERT INTO cache (collection_key, items, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(collection_key) DO UPDATE SET
                items = excluded.items,
                updated_at = MAX(excluded.updated_at, cache.updated_at)
            RETURNING updated_at
            "#,
            params![row.collection_key, items, row.updated_at.timestamp_millis()],
            |r| r.get(0),
        )?;
        Ok(from_millis(stored))
    }

    /// Get the snapshot for a collection key
    pub fn get_cache(&self, key: &str) -> StorageResult<Option<CachedCollection>> {
        let raw: Option<(String, i64)> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT items, updated_at FROM cache WHERE collection_key = ?",
                params![key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?
        };

        match raw {
            Some((items, updated_at)) => Ok(Some(CachedCollection {
                collection_key: key.to_string(),
                items: serde_json::from_str(&items)?,
                updated_at: from_millis(updated_at),
            })),
            None => Ok(None),
        }
    }

    // ==================== Outbox ====================

    /// Insert a new pending mutation
    pub fn insert_mutation(&self, row: &QueuedMutation) -> StorageResult<()> {
        let payload = serde_json::to_string(&row.payload)?;
        let meta = serde_json::to_string(&row.meta)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO outbox (id, collection, endpoint, method, payload, meta, retries, last_error, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                row.id,
                row.collection,
                row.endpoint,
                row.method,
                payload,
                meta,
                row.retries,
                row.last_error,
                row.created_at.timestamp_millis(),
            ],
        )
        .map_err(|e| {
            if is_primary_key_violation(&e) {
                StorageError::DuplicateId(row.id.clone())
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    /// Point lookup by id
    pub fn get_mutation(&self, id: &str) -> StorageResult<Option<QueuedMutation>> {
        let raw = {
            let conn = self.conn()?;
            conn.query_row(
                &format!("SELECT {} FROM outbox WHERE id = ?", MUTATION_COLUMNS),
                params![id],
                MutationRow::from_row,
            )
            .optional()?
        };
        raw.map(MutationRow::hydrate).transpose()
    }

    /// Delete a pending mutation. Returns false if it was already gone.
    pub fn delete_mutation(&self, id: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM outbox WHERE id = ?", params![id])?;
        Ok(removed > 0)
    }

    /// Bump the retry counter and store the failure message
    ///
    /// Returns false if the row no longer exists.
    pub fn record_mutation_failure(&self, id: &str, error: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE outbox SET retries = retries + 1, last_error = ?2 WHERE id = ?1",
            params![id, error],
        )?;
        Ok(updated > 0)
    }

    /// All pending mutations, oldest first
    pub fn mutations_by_created(&self) -> StorageResult<Vec<QueuedMutation>> {
        self.query_mutations(
            &format!(
                "SELECT {} FROM outbox ORDER BY created_at ASC, seq ASC",
                MUTATION_COLUMNS
            ),
            &[],
        )
    }

    /// Pending mutations for one collection, oldest first
    pub fn mutations_in_collection(&self, collection: &str) -> StorageResult<Vec<QueuedMutation>> {
        self.query_mutations(
            &format!(
                "SELECT {} FROM outbox WHERE collection = ? ORDER BY created_at ASC, seq ASC",
                MUTATION_COLUMNS
            ),
            &[&collection],
        )
    }

    /// Number of pending mutations
    pub fn mutation_count(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM outbox", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Pending counts grouped by collection
    pub fn mutation_counts_by_collection(&self) -> StorageResult<Vec<(String, usize)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT collection, COUNT(*) FROM outbox GROUP BY collection ORDER BY collection",
        )?;
        let counts = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as usize)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    fn query_mutations(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<Vec<QueuedMutation>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(args, MutationRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(MutationRow::hydrate).collect()
    }

    // ==================== Dead letters ====================

    /// Record a permanently failed mutation
    pub fn insert_dead_letter(&self, letter: &DeadLetter) -> StorageResult<()> {
        let conn = self.conn()?;
        write_dead_letter(&conn, letter)
    }

    /// Delete an outbox row and record it as a dead letter in one transaction
    ///
    /// The dead letter is only written if this call removed the row. Returns
    /// false, writing nothing, when the row was already gone.
    pub fn dead_letter_mutation(&self, letter: &DeadLetter) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM outbox WHERE id = ?", params![letter.id])? > 0;
        if removed {
            write_dead_letter(&tx, letter)?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// All dead letters, most recent failure first
    pub fn dead_letters(&self) -> StorageResult<Vec<DeadLetter>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                r#"
                SELECT id, collection, endpoint, method, payload, meta, retries, status, error, created_at, failed_at
                FROM dead_letters ORDER BY failed_at DESC
                "#,
            )?;
            let rows = stmt
                .query_map([], |r| {
                    Ok(DeadLetterRow {
                        id: r.get(0)?,
                        collection: r.get(1)?,
                        endpoint: r.get(2)?,
                        method: r.get(3)?,
                        payload: r.get(4)?,
                        meta: r.get(5)?,
                        retries: r.get(6)?,
                        status: r.get(7)?,
                        error: r.get(8)?,
                        created_at: r.get(9)?,
                        failed_at: r.get(10)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|row| {
                Ok(DeadLetter {
                    id: row.id,
                    collection: row.collection,
                    endpoint: row.endpoint,
                    method: row.method,
                    payload: serde_json::from_str(&row.payload)?,
                    meta: serde_json::from_str(&row.meta)?,
                    retries: row.retries,
                    status: row.status,
                    error: row.error,
                    created_at: from_millis(row.created_at),
                    failed_at: from_millis(row.failed_at),
                })
            })
            .collect()
    }

    /// Remove every dead letter. Returns how many were removed.
    pub fn clear_dead_letters(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM dead_letters", [])?)
    }

    // ==================== Drafts ====================

    /// Overwrite the draft for its (collection, key) slot
    pub fn put_draft(&self, draft: &Draft) -> StorageResult<()> {
        let data = serde_json::to_string(&draft.data)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO drafts (id, collection, key, data, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                draft.id,
                draft.collection,
                draft.key,
                data,
                draft.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Point lookup by draft id
    pub fn get_draft(&self, id: &str) -> StorageResult<Option<Draft>> {
        let raw = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT id, collection, key, data, updated_at FROM drafts WHERE id = ?",
                params![id],
                DraftRow::from_row,
            )
            .optional()?
        };
        raw.map(DraftRow::hydrate).transpose()
    }

    /// Delete a draft. Returns false if none existed.
    pub fn delete_draft(&self, id: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM drafts WHERE id = ?", params![id])? > 0)
    }

    /// Drafts for one collection, most recently updated first
    pub fn drafts_in_collection(&self, collection: &str) -> StorageResult<Vec<Draft>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, collection, key, data, updated_at FROM drafts WHERE collection = ? ORDER BY updated_at DESC",
            )?;
            let rows = stmt
                .query_map(params![collection], DraftRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(DraftRow::hydrate).collect()
    }
}

// ==================== Internal structs ====================

struct MutationRow {
    id: String,
    collection: String,
    endpoint: String,
    method: String,
    payload: String,
    meta: String,
    retries: u32,
    last_error: Option<String>,
    created_at: i64,
}

impl MutationRow {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            collection: r.get(1)?,
            endpoint: r.get(2)?,
            method: r.get(3)?,
            payload: r.get(4)?,
            meta: r.get(5)?,
            retries: r.get(6)?,
            last_error: r.get(7)?,
            created_at: r.get(8)?,
        })
    }

    fn hydrate(self) -> StorageResult<QueuedMutation> {
        Ok(QueuedMutation {
            id: self.id,
            collection: self.collection,
            endpoint: self.endpoint,
            method: self.method,
            payload: serde_json::from_str(&self.payload)?,
            meta: serde_json::from_str(&self.meta)?,
            retries: self.retries,
            last_error: self.last_error,
            created_at: from_millis(self.created_at),
        })
    }
}

struct DeadLetterRow {
    id: String,
    collection: String,
    endpoint: String,
    method: String,
    payload: String,
    meta: String,
    retries: u32,
    status: Option<u16>,
    error: String,
    created_at: i64,
    failed_at: i64,
}

struct DraftRow {
    id: String,
    collection: String,
    key: String,
    data: String,
    updated_at: i64,
}

impl DraftRow {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            collection: r.get(1)?,
            key: r.get(2)?,
            data: r.get(3)?,
            updated_at: r.get(4)?,
        })
    }

    fn hydrate(self) -> StorageResult<Draft> {
        Ok(Draft {
            id: self.id,
            collection: self.collection,
            key: self.key,
            data: serde_json::from_str(&self.data)?,
            updated_at: from_millis(self.updated_at),
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn write_dead_letter(conn: &Connection, letter: &DeadLetter) -> StorageResult<()> {
    let payload = serde_json::to_string(&letter.payload)?;
    let meta = serde_json::to_string(&letter.meta)?;
    conn.execute(
        r#"
        INSERT OR REPLACE INTO dead_letters
            (id, collection, endpoint, method, payload, meta, retries, status, error, created_at, failed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            letter.id,
            letter.collection,
            letter.endpoint,
            letter.method,
            payload,
            meta,
            letter.retries,
            letter.status,
            letter.error,
            letter.created_at.timestamp_millis(),
            letter.failed_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}
