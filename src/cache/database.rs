//! SQLite-backed entry index.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::entry::{CacheEntry, Fingerprint};
use super::persistence::{PersistenceError, PersistenceProvider, PersistenceResult};

/// Default file name of the index database inside the cache directory.
pub const DEFAULT_INDEX_FILE: &str = "index.sqlite";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entries (
        key             TEXT PRIMARY KEY NOT NULL,
        fingerprint     INTEGER NOT NULL,
        file_path       TEXT NOT NULL,
        size_bytes      INTEGER NOT NULL,
        last_touched_ms INTEGER NOT NULL
    );
";

/// Persistent entry store kept next to the cached files.
///
/// One row per cached key. The connection is opened in WAL mode so that
/// readers in other processes (for example the `rescache` CLI) are not
/// blocked by the owning process.
pub struct SqlitePersistence {
    index_file: String,
    state: Mutex<SqliteState>,
}

struct SqliteState {
    path: PathBuf,
    conn: Connection,
}

impl SqlitePersistence {
    /// Open or create the index at `dir/index.sqlite`.
    pub fn open(dir: &Path) -> PersistenceResult<Self> {
        Self::open_with_name(dir, DEFAULT_INDEX_FILE)
    }

    /// Open or create the index at `dir/<index_file>`.
    pub fn open_with_name(dir: &Path, index_file: &str) -> PersistenceResult<Self> {
        let path = dir.join(index_file);
        let conn = open_connection(&path)?;
        log::debug!("Opened cache index at {}", path.display());
        Ok(Self {
            index_file: index_file.to_string(),
            state: Mutex::new(SqliteState { path, conn }),
        })
    }

    /// Location of the index database file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.state.lock().path.clone()
    }
}

fn open_connection(path: &Path) -> PersistenceResult<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::trace!("Index {} journal mode: {}", path.display(), mode);
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn to_sql_u64(key: &str, value: u64) -> PersistenceResult<i64> {
    i64::try_from(value).map_err(|_| PersistenceError::Corrupt {
        key: key.to_string(),
        reason: format!("value {value} does not fit the index column"),
    })
}

/// Paths are stored as text; a lossy conversion would point the record at
/// a different file.
fn to_sql_path<'a>(key: &str, path: &'a Path) -> PersistenceResult<&'a str> {
    path.to_str().ok_or_else(|| PersistenceError::Corrupt {
        key: key.to_string(),
        reason: format!("file path is not valid UTF-8: {}", path.display()),
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<(String, i64, String, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode(raw: (String, i64, String, i64, i64)) -> PersistenceResult<CacheEntry> {
    let (key, fingerprint, file_path, size_bytes, last_touched_ms) = raw;
    let size_bytes = u64::try_from(size_bytes).map_err(|_| PersistenceError::Corrupt {
        key: key.clone(),
        reason: format!("negative size {size_bytes}"),
    })?;
    let last_touched_ms = u64::try_from(last_touched_ms).unwrap_or(0);

    Ok(CacheEntry {
        fingerprint: Fingerprint::new(fingerprint as u64),
        file_path: PathBuf::from(file_path),
        size_bytes,
        last_touched_ms,
        key,
    })
}

impl PersistenceProvider for SqlitePersistence {
    fn get(&self, key: &str) -> PersistenceResult<Option<CacheEntry>> {
        let state = self.state.lock();
        let raw = state
            .conn
            .query_row(
                "SELECT key, fingerprint, file_path, size_bytes, last_touched_ms
                 FROM entries WHERE key = ?1",
                params![key],
                entry_from_row,
            )
            .optional()?;
        raw.map(decode).transpose()
    }

    fn put(&self, entry: &CacheEntry) -> PersistenceResult<()> {
        let size = to_sql_u64(&entry.key, entry.size_bytes)?;
        let touched = to_sql_u64(&entry.key, entry.last_touched_ms)?;
        let file_path = to_sql_path(&entry.key, &entry.file_path)?;
        let state = self.state.lock();
        state.conn.execute(
            "INSERT OR REPLACE INTO entries (key, fingerprint, file_path, size_bytes, last_touched_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.key,
                // Stored bit-for-bit; SQLite integers are signed.
                entry.fingerprint.value() as i64,
                file_path,
                size,
                touched
            ],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> PersistenceResult<bool> {
        let state = self.state.lock();
        let removed = state
            .conn
            .execute("DELETE FROM entries WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    fn load_all(&self) -> PersistenceResult<Vec<CacheEntry>> {
        let state = self.state.lock();
        let mut stmt = state.conn.prepare(
            "SELECT key, fingerprint, file_path, size_bytes, last_touched_ms
             FROM entries ORDER BY last_touched_ms ASC",
        )?;
        let rows = stmt.query_map([], entry_from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(decode(row?)?);
        }
        Ok(entries)
    }

    fn relocate(&self, dir: &Path) -> PersistenceResult<()> {
        let path = dir.join(&self.index_file);
        let conn = open_connection(&path)?;
        let mut state = self.state.lock();
        log::debug!(
            "Relocating cache index from {} to {}",
            state.path.display(),
            path.display()
        );
        *state = SqliteState { path, conn };
        Ok(())
    }
}
