use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL,
    tag_type TEXT NOT NULL,
    UNIQUE(tag, tag_type)
);

CREATE TABLE IF NOT EXISTS image_tags (
    image_id INTEGER NOT NULL REFERENCES images(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    UNIQUE(image_id, tag_id)
);

CREATE INDEX IF NOT EXISTS idx_tags_type ON tags(tag_type);
CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag);
CREATE INDEX IF NOT EXISTS idx_image_tags_tag ON image_tags(tag_id);

CREATE TABLE IF NOT EXISTS scanned_directories (
    path TEXT UNIQUE NOT NULL,
    last_scan TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value TEXT
);
";

/// Per-connection pragmas. Foreign keys are off by default in SQLite and the
/// link cascades depend on them.
pub fn configure_connection(conn: &Connection) -> Result<String, AppError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    Ok(journal_mode.to_lowercase())
}

pub fn create_schema(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(SCHEMA_V1)?;
    Ok(())
}

pub fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    configure_connection(conn)?;
    create_schema(conn)
}
