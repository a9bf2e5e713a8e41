//! SQLite-backed metadata store.
//!
//! [`SqliteMetadataStore`] keeps the three tables in one database file in
//! WAL mode. Every transaction starts with `BEGIN IMMEDIATE`, which takes
//! the database write lock up front: transactions from any number of
//! handles or processes on the same file are serialized by SQLite itself,
//! and `account_for_update` needs no separate row lock. A writer that finds
//! the lock taken waits up to [`BUSY_TIMEOUT`] before failing.
//!
//! `storage_used` is only ever changed by a relative `UPDATE`, and the
//! schema rejects a negative or non-integer counter with a `CHECK`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};
use stash_types::{Account, AccountId, FileId, FileVersion, LogicalFile, StorageKey, VersionId};
use tracing::{debug, info, warn};

use crate::error::{MetaError, MetaResult};
use crate::traits::{MetaTransaction, MetadataStore};

/// How long a transaction waits for another writer before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id            TEXT PRIMARY KEY NOT NULL,
    storage_used  INTEGER NOT NULL
                  CHECK (typeof(storage_used) = 'integer' AND storage_used >= 0),
    storage_limit INTEGER NOT NULL CHECK (storage_limit > 0),
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id         TEXT PRIMARY KEY NOT NULL,
    owner_id   TEXT NOT NULL REFERENCES accounts(id),
    created_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id);

CREATE TABLE IF NOT EXISTS file_versions (
    id            TEXT PRIMARY KEY NOT NULL,
    file_id       TEXT NOT NULL REFERENCES files(id),
    storage_key   TEXT NOT NULL,
    original_name TEXT NOT NULL,
    display_name  TEXT NOT NULL,
    size          INTEGER NOT NULL CHECK (size >= 0),
    mime_type     TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    is_current    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_file_versions_file ON file_versions(file_id);
";

const ACCOUNT_COLUMNS: &str = "id, storage_used, storage_limit, created_at";
const FILE_COLUMNS: &str = "id, owner_id, created_at, deleted_at";
const VERSION_COLUMNS: &str =
    "id, file_id, storage_key, original_name, display_name, size, mime_type, created_at, is_current";

/// A [`MetadataStore`] persisted in a SQLite database file.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteMetadataStore {
    /// Open the database at `path`, creating the file and schema if needed.
    pub fn open(path: impl AsRef<Path>) -> MetaResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), %journal_mode, "opened metadata database");
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for SqliteMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMetadataStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn begin(&self) -> MetaResult<Box<dyn MetaTransaction + '_>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MetaError::Poisoned(e.to_string()))?;
        if !conn.is_autocommit() {
            // A previous rollback failed and left the connection mid-transaction.
            conn.execute_batch("ROLLBACK")?;
        }
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction { conn, done: false }))
    }
}

struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    done: bool,
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => debug!("metadata transaction rolled back"),
            Err(e) => warn!(error = %e, "metadata rollback failed"),
        }
    }
}

impl SqliteTransaction<'_> {
    fn query_one<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    ) -> MetaResult<Option<T>> {
        Ok(self.conn.query_row(sql, params, map).optional()?)
    }

    fn query_all<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> MetaResult<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, map)?;
        Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
    }

    /// Run an `UPDATE` that must touch exactly the row named by `id`.
    fn update_one(
        &self,
        table: &'static str,
        id: String,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> MetaResult<()> {
        let changed = self
            .conn
            .execute(sql, params)
            .map_err(|e| constraint_error(e, table, &id))?;
        if changed == 0 {
            return Err(MetaError::RowNotFound { table, id });
        }
        Ok(())
    }
}

impl MetaTransaction for SqliteTransaction<'_> {
    fn insert_account(&mut self, account: &Account) -> MetaResult<()> {
        let id = account.id.to_string();
        self.conn
            .execute(
                "INSERT INTO accounts (id, storage_used, storage_limit, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id,
                    to_i64("accounts", "storage_used", account.storage_used)?,
                    to_i64("accounts", "storage_limit", account.storage_limit)?,
                    timestamp(&account.created_at),
                ],
            )
            .map_err(|e| constraint_error(e, "accounts", &id))?;
        Ok(())
    }

    fn account(&mut self, id: &AccountId) -> MetaResult<Option<Account>> {
        self.query_one(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
            [id.to_string()],
            account_from_row,
        )
    }

    fn account_for_update(&mut self, id: &AccountId) -> MetaResult<Option<Account>> {
        // BEGIN IMMEDIATE already holds the database write lock.
        self.account(id)
    }

    fn adjust_storage_used(&mut self, id: &AccountId, delta: i128) -> MetaResult<Account> {
        let step = i64::try_from(delta).map_err(|_| MetaError::Constraint {
            table: "accounts",
            reason: format!("storage_used adjustment {delta} is out of range"),
        })?;
        self.update_one(
            "accounts",
            id.to_string(),
            "UPDATE accounts SET storage_used = storage_used + ?1 WHERE id = ?2",
            params![step, id.to_string()],
        )?;
        self.account(id)?.ok_or_else(|| MetaError::RowNotFound {
            table: "accounts",
            id: id.to_string(),
        })
    }

    fn insert_file(&mut self, file: &LogicalFile) -> MetaResult<()> {
        let id = file.id.to_string();
        self.conn
            .execute(
                "INSERT INTO files (id, owner_id, created_at, deleted_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id,
                    file.owner_id.to_string(),
                    timestamp(&file.created_at),
                    file.deleted_at.as_ref().map(timestamp),
                ],
            )
            .map_err(|e| constraint_error(e, "files", &id))?;
        Ok(())
    }

    fn live_file(&mut self, id: &FileId, owner: &AccountId) -> MetaResult<Option<LogicalFile>> {
        self.query_one(
            &format!(
                "SELECT {FILE_COLUMNS} FROM files
                 WHERE id = ?1 AND owner_id = ?2 AND deleted_at IS NULL"
            ),
            [id.to_string(), owner.to_string()],
            file_from_row,
        )
    }

    fn live_files(&mut self, owner: &AccountId) -> MetaResult<Vec<LogicalFile>> {
        self.query_all(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE owner_id = ?1 AND deleted_at IS NULL"),
            [owner.to_string()],
            file_from_row,
        )
    }

    fn mark_deleted(&mut self, id: &FileId, at: DateTime<Utc>) -> MetaResult<()> {
        self.update_one(
            "files",
            id.to_string(),
            "UPDATE files SET deleted_at = ?1 WHERE id = ?2",
            params![timestamp(&at), id.to_string()],
        )
    }

    fn insert_version(&mut self, version: &FileVersion) -> MetaResult<()> {
        let id = version.id.to_string();
        self.conn
            .execute(
                &format!(
                    "INSERT INTO file_versions ({VERSION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    id,
                    version.file_id.to_string(),
                    version.storage_key.as_str(),
                    version.original_name,
                    version.display_name,
                    to_i64("file_versions", "size", version.size)?,
                    version.mime_type,
                    timestamp(&version.created_at),
                    version.is_current,
                ],
            )
            .map_err(|e| constraint_error(e, "file_versions", &id))?;
        Ok(())
    }

    fn versions(&mut self, file: &FileId) -> MetaResult<Vec<FileVersion>> {
        self.query_all(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM file_versions
                 WHERE file_id = ?1 ORDER BY created_at, id"
            ),
            [file.to_string()],
            version_from_row,
        )
    }

    fn set_current(&mut self, id: &VersionId, is_current: bool) -> MetaResult<()> {
        self.update_one(
            "file_versions",
            id.to_string(),
            "UPDATE file_versions SET is_current = ?1 WHERE id = ?2",
            params![is_current, id.to_string()],
        )
    }

    fn set_display_name(&mut self, id: &VersionId, name: &str) -> MetaResult<()> {
        self.update_one(
            "file_versions",
            id.to_string(),
            "UPDATE file_versions SET display_name = ?1 WHERE id = ?2",
            params![name, id.to_string()],
        )
    }

    fn live_storage_keys(&mut self) -> MetaResult<HashSet<StorageKey>> {
        let keys = self.query_all(
            "SELECT v.storage_key FROM file_versions v
             JOIN files f ON f.id = v.file_id
             WHERE f.deleted_at IS NULL",
            params![],
            |row| key_column(row, 0),
        )?;
        Ok(keys.into_iter().collect())
    }

    fn commit(mut self: Box<Self>) -> MetaResult<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| MetaError::CommitFailed(e.to_string()))?;
        self.done = true;
        Ok(())
    }
}

// ---- Encoding ----

/// Fixed-width RFC 3339 in UTC, so text order is time order.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn to_i64(table: &'static str, column: &str, value: u64) -> MetaResult<i64> {
    i64::try_from(value).map_err(|_| MetaError::Constraint {
        table,
        reason: format!("{column} {value} does not fit in a signed 64-bit column"),
    })
}

/// Translate SQLite constraint failures into the store's own error kinds.
fn constraint_error(err: rusqlite::Error, table: &'static str, id: &str) -> MetaError {
    let rusqlite::Error::SqliteFailure(code, message) = err else {
        return MetaError::Database(err);
    };
    match code.extended_code {
        ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => MetaError::Duplicate {
            table,
            id: id.to_string(),
        },
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => MetaError::Constraint {
            table,
            reason: format!("row {id} references a row that does not exist"),
        },
        ffi::SQLITE_CONSTRAINT_CHECK | ffi::SQLITE_CONSTRAINT_NOTNULL => MetaError::Constraint {
            table,
            reason: message.unwrap_or_else(|| code.to_string()),
        },
        _ => MetaError::Database(rusqlite::Error::SqliteFailure(code, message)),
    }
}

// ---- Decoding ----

fn conversion_error(
    idx: usize,
    ty: Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

fn u64_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|e| conversion_error(idx, Type::Integer, e))
}

fn key_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<StorageKey> {
    let raw: String = row.get(idx)?;
    StorageKey::parse(raw).map_err(|e| conversion_error(idx, Type::Text, e))
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: parsed_column(row, 0)?,
        storage_used: u64_column(row, 1)?,
        storage_limit: u64_column(row, 2)?,
        created_at: parsed_column(row, 3)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<LogicalFile> {
    let deleted_at: Option<String> = row.get(3)?;
    Ok(LogicalFile {
        id: parsed_column(row, 0)?,
        owner_id: parsed_column(row, 1)?,
        created_at: parsed_column(row, 2)?,
        deleted_at: deleted_at
            .map(|raw| raw.parse::<DateTime<Utc>>())
            .transpose()
            .map_err(|e| conversion_error(3, Type::Text, e))?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<FileVersion> {
    Ok(FileVersion {
        id: parsed_column(row, 0)?,
        file_id: parsed_column(row, 1)?,
        storage_key: key_column(row, 2)?,
        original_name: row.get(3)?,
        display_name: row.get(4)?,
        size: u64_column(row, 5)?,
        mime_type: row.get(6)?,
        created_at: parsed_column(row, 7)?,
        is_current: row.get(8)?,
    })
}
