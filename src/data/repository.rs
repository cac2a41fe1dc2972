use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::data::query::{like_pattern, TagQuery};
use crate::error::AppError;
use crate::models::metadata::{is_valid_tag_text, normalize_tag_values};
use crate::models::search::TypeRestriction;

// ============== Images ==============

pub fn get_or_create_image(conn: &Connection, path: &str) -> Result<i64, AppError> {
    conn.execute(
        "INSERT OR IGNORE INTO images (path) VALUES (?1)",
        params![path],
    )?;
    let id = conn.query_row(
        "SELECT id FROM images WHERE path = ?1",
        params![path],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn find_image_id(conn: &Connection, path: &str) -> Result<Option<i64>, AppError> {
    let id = conn
        .query_row(
            "SELECT id FROM images WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn delete_image(conn: &Connection, path: &str) -> Result<usize, AppError> {
    let count = conn.execute("DELETE FROM images WHERE path = ?1", params![path])?;
    Ok(count)
}

pub fn image_count(conn: &Connection) -> Result<usize, AppError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
    Ok(count.max(0) as usize)
}

/// Paths of every image row under `prefix`.
pub fn indexed_paths(conn: &Connection, prefix: &str) -> Result<HashSet<String>, AppError> {
    let paths = TagQuery::new(prefix).all_paths(conn)?;
    Ok(paths.into_iter().collect())
}

/// Deletes image rows under `prefix` whose path is not in `live_paths`.
/// Links cascade with the rows.
pub fn purge_missing_images(
    conn: &Connection,
    prefix: &str,
    live_paths: &HashSet<String>,
) -> Result<usize, AppError> {
    let stale: Vec<String> = indexed_paths(conn, prefix)?
        .into_iter()
        .filter(|path| !live_paths.contains(path))
        .collect();
    if stale.is_empty() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    let mut removed = 0;
    {
        let mut stmt = tx.prepare("DELETE FROM images WHERE path = ?1")?;
        for path in &stale {
            removed += stmt.execute(params![path])?;
        }
    }
    tx.commit()?;
    Ok(removed)
}

// ============== Tags ==============

/// Insert-or-ignore followed by a lookup, so racing writers converge on one row.
pub fn get_or_create_tag(conn: &Connection, text: &str, tag_type: &str) -> Result<i64, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::InvalidInput("tag text must not be blank".to_string()));
    }

    conn.execute(
        "INSERT OR IGNORE INTO tags (tag, tag_type) VALUES (?1, ?2)",
        params![text, tag_type],
    )?;
    let id = conn.query_row(
        "SELECT id FROM tags WHERE tag = ?1 AND tag_type = ?2",
        params![text, tag_type],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn clear_links_of_type(conn: &Connection, image_id: i64, tag_type: &str) -> Result<usize, AppError> {
    let count = conn.execute(
        "DELETE FROM image_tags WHERE image_id = ?1 AND tag_id IN (
            SELECT id FROM tags WHERE tag_type = ?2
        )",
        params![image_id, tag_type],
    )?;
    Ok(count)
}

fn link_tag(conn: &Connection, image_id: i64, tag_id: i64) -> Result<(), AppError> {
    conn.execute(
        "INSERT OR IGNORE INTO image_tags (image_id, tag_id) VALUES (?1, ?2)",
        params![image_id, tag_id],
    )?;
    Ok(())
}

fn write_links(
    conn: &Connection,
    image_id: i64,
    tag_type: &str,
    values: &[String],
) -> Result<usize, AppError> {
    clear_links_of_type(conn, image_id, tag_type)?;
    let values = normalize_tag_values(values);
    for value in &values {
        let tag_id = get_or_create_tag(conn, value, tag_type)?;
        link_tag(conn, image_id, tag_id)?;
    }
    Ok(values.len())
}

/// Replaces the image's links for one tag type. All-or-nothing: on error the
/// previous links are untouched.
pub fn replace_image_tags(
    conn: &Connection,
    path: &str,
    tag_type: &str,
    values: &[String],
) -> Result<usize, AppError> {
    let tx = conn.unchecked_transaction()?;
    let image_id = get_or_create_image(&tx, path)?;
    let linked = write_links(&tx, image_id, tag_type, values)?;
    tx.commit()?;
    Ok(linked)
}

/// Same guarantee as [`replace_image_tags`] across every supplied type, in a
/// single transaction.
pub fn bulk_replace_image_tags(
    conn: &Connection,
    path: &str,
    fields: &BTreeMap<String, Vec<String>>,
) -> Result<usize, AppError> {
    let tx = conn.unchecked_transaction()?;
    let image_id = get_or_create_image(&tx, path)?;
    let mut linked = 0;
    for (tag_type, values) in fields {
        linked += write_links(&tx, image_id, tag_type, values)?;
    }
    tx.commit()?;
    Ok(linked)
}

/// Tags of one image grouped by type, each group sorted.
pub fn image_tags(conn: &Connection, path: &str) -> Result<BTreeMap<String, Vec<String>>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT t.tag_type, t.tag FROM tags t
         JOIN image_tags it ON it.tag_id = t.id
         JOIN images i ON i.id = it.image_id
         WHERE i.path = ?1
         ORDER BY t.tag_type, t.tag",
    )?;

    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let rows = stmt.query_map(params![path], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (tag_type, tag) = row?;
        grouped.entry(tag_type).or_default().push(tag);
    }
    Ok(grouped)
}

pub fn tags_by_type(conn: &Connection, tag_type: Option<&str>) -> Result<Vec<String>, AppError> {
    let tags: Vec<String> = match tag_type {
        Some(tag_type) => conn
            .prepare("SELECT DISTINCT tag FROM tags WHERE tag_type = ?1 ORDER BY tag")?
            .query_map(params![tag_type], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect(),
        None => conn
            .prepare("SELECT DISTINCT tag FROM tags ORDER BY tag")?
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect(),
    };
    Ok(tags)
}

/// Distinct tag texts containing `fragment`, for autocomplete.
pub fn suggest_tags(
    conn: &Connection,
    fragment: &str,
    tag_type: Option<&str>,
    limit: usize,
) -> Result<Vec<String>, AppError> {
    let pattern = like_pattern(fragment.trim());
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let tags: Vec<String> = match tag_type {
        Some(tag_type) => conn
            .prepare(
                "SELECT DISTINCT tag FROM tags
                 WHERE tag LIKE ?1 ESCAPE '\\' AND tag_type = ?2
                 ORDER BY tag LIMIT ?3",
            )?
            .query_map(params![pattern, tag_type, limit], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect(),
        None => conn
            .prepare(
                "SELECT DISTINCT tag FROM tags
                 WHERE tag LIKE ?1 ESCAPE '\\'
                 ORDER BY tag LIMIT ?2",
            )?
            .query_map(params![pattern, limit], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect(),
    };
    Ok(tags)
}

pub fn remove_unused_tags(conn: &Connection) -> Result<usize, AppError> {
    let count = conn.execute(
        "DELETE FROM tags WHERE id NOT IN (SELECT tag_id FROM image_tags)",
        [],
    )?;
    Ok(count)
}

/// Drops tags that are blank or contain characters outside the accepted set.
pub fn remove_invalid_tags(conn: &Connection) -> Result<usize, AppError> {
    let invalid: Vec<i64> = conn
        .prepare("SELECT id, tag FROM tags")?
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|(_, tag)| !is_valid_tag_text(tag))
        .map(|(id, _)| id)
        .collect();
    if invalid.is_empty() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    let mut removed = 0;
    {
        let mut stmt = tx.prepare("DELETE FROM tags WHERE id = ?1")?;
        for id in &invalid {
            removed += stmt.execute(params![id])?;
        }
    }
    tx.commit()?;
    Ok(removed)
}

// ============== Search ==============

pub fn search_images(
    conn: &Connection,
    prefix: &str,
    terms: &[String],
    restriction: &TypeRestriction,
    page: usize,
    page_size: usize,
) -> Result<Vec<String>, AppError> {
    TagQuery::new(prefix)
        .terms(terms)
        .restrict(restriction.clone())
        .paths(conn, page, page_size)
}

pub fn count_search_results(
    conn: &Connection,
    prefix: &str,
    terms: &[String],
    restriction: &TypeRestriction,
) -> Result<usize, AppError> {
    TagQuery::new(prefix)
        .terms(terms)
        .restrict(restriction.clone())
        .count(conn)
}

/// Images under `prefix` with at least one tag of the restricted type(s).
pub fn tagged_paths(
    conn: &Connection,
    prefix: &str,
    restriction: &TypeRestriction,
) -> Result<HashSet<String>, AppError> {
    let paths = TagQuery::new(prefix)
        .restrict(restriction.clone())
        .all_paths(conn)?;
    Ok(paths.into_iter().collect())
}

// ============== Scanned directories ==============

pub fn mark_directory_scanned(conn: &Connection, path: &str) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO scanned_directories (path, last_scan) VALUES (?1, ?2)
         ON CONFLICT(path) DO UPDATE SET last_scan = excluded.last_scan",
        params![path, Utc::now()],
    )?;
    Ok(())
}

pub fn last_scan(conn: &Connection, path: &str) -> Result<Option<DateTime<Utc>>, AppError> {
    let scanned = conn
        .query_row(
            "SELECT last_scan FROM scanned_directories WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )
        .optional()?;
    Ok(scanned)
}

pub fn is_directory_scanned(conn: &Connection, path: &str) -> Result<bool, AppError> {
    Ok(last_scan(conn, path)?.is_some())
}

// ============== Preferences ==============

pub fn get_preference(conn: &Connection, key: &str) -> Result<Option<String>, AppError> {
    let value = conn
        .query_row(
            "SELECT value FROM preferences WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn set_preference(conn: &Connection, key: &str, value: &str) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO preferences (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn all_preferences(conn: &Connection) -> Result<BTreeMap<String, String>, AppError> {
    let prefs: BTreeMap<String, String> = conn
        .prepare("SELECT key, value FROM preferences WHERE value IS NOT NULL")?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(prefs)
}
