//! Disaster-recovery mirror over an embedded SQLite database.
//!
//! Non-authoritative and write-only in normal operation; the explicit
//! recovery flow is the only reader. Every operation wraps its failures
//! internally — this backend must be incapable of blocking or failing the
//! primary write path, so faults degrade to "empty result" / "no-op" and
//! a log line.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{error, warn};

use crate::errors::StorageError;
use crate::snippet::Snippet;
use crate::storage::SnippetStore;

pub struct BackupBackend {
    conn: Mutex<Option<Connection>>,
}

impl BackupBackend {
    /// Open (or create) the mirror database. An unopenable database is
    /// not an error: the backend just runs dark.
    pub fn open(path: &Path) -> Self {
        let conn = match Connection::open(path).and_then(Self::init) {
            Ok(conn) => Some(conn),
            Err(e) => {
                error!(path = %path.display(), error = %e, "backup database unavailable");
                None
            }
        };
        Self { conn: Mutex::new(conn) }
    }

    pub fn in_memory() -> Self {
        let conn = match Connection::open_in_memory().and_then(Self::init) {
            Ok(conn) => Some(conn),
            Err(e) => {
                error!(error = %e, "in-memory backup database unavailable");
                None
            }
        };
        Self { conn: Mutex::new(conn) }
    }

    /// A backend with no database at all, for exercising the degraded path.
    #[cfg(test)]
    pub(crate) fn disabled() -> Self {
        Self { conn: Mutex::new(None) }
    }

    fn init(conn: Connection) -> rusqlite::Result<Connection> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS snippets (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(conn)
    }

    fn replace_all(conn: &mut Connection, snippets: &[Snippet]) -> anyhow::Result<()> {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM snippets", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO snippets (id, data, updated_at) VALUES (?1, ?2, ?3)")?;
            for snippet in snippets {
                stmt.execute(params![
                    snippet.id.to_string(),
                    serde_json::to_string(snippet)?,
                    snippet.updated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl SnippetStore for BackupBackend {
    fn get_snippets(&self) -> std::result::Result<Vec<Snippet>, StorageError> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(Vec::new());
        };
        let rows = conn
            .prepare("SELECT data FROM snippets")
            .and_then(|mut stmt| {
                stmt.query_map([], |row| row.get::<_, String>(0))
                    .map(|rows| rows.collect::<Vec<_>>())
            });
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "backup read failed, returning empty set");
                return Ok(Vec::new());
            }
        };

        let mut snippets = Vec::with_capacity(rows.len());
        for row in rows {
            let raw = match row {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable backup row");
                    continue;
                }
            };
            match serde_json::from_str::<Snippet>(&raw) {
                Ok(snippet) => snippets.push(snippet),
                Err(e) => warn!(error = %e, "skipping malformed backup record"),
            }
        }
        Ok(snippets)
    }

    fn save_snippets(&self, snippets: &[Snippet]) -> std::result::Result<(), StorageError> {
        let mut guard = self.conn.lock();
        let Some(conn) = guard.as_mut() else {
            return Ok(());
        };
        if let Err(e) = Self::replace_all(conn, snippets) {
            warn!(error = %e, "backup mirror write failed");
        }
        Ok(())
    }

    fn clear(&self) -> std::result::Result<(), StorageError> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(());
        };
        if let Err(e) = conn.execute("DELETE FROM snippets", []) {
            warn!(error = %e, "backup clear failed");
        }
        Ok(())
    }
}
