pub mod migrations;
pub mod query;
pub mod repository;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::AppError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Location of the tag index. Connections are never shared between workers:
/// the scanner, the watcher and every query or edit call open their own.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a configured connection. Readers must never block behind the
    /// scanner, so anything other than write-ahead logging is an error.
    pub fn open(&self) -> Result<Connection, AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal_mode = migrations::configure_connection(&conn)?;
        if journal_mode != "wal" {
            return Err(AppError::General(format!(
                "database {} refused write-ahead logging (journal_mode={journal_mode})",
                self.path.display()
            )));
        }
        migrations::create_schema(&conn)?;
        Ok(conn)
    }

    /// Creates the schema once at startup and logs where the index lives.
    pub fn initialize(&self) -> Result<(), AppError> {
        self.open()?;
        tracing::info!(path = %self.path.display(), "tag index ready");
        Ok(())
    }
}
