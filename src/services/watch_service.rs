use std::collections::HashSet;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rusqlite::Connection;

use crate::config::Config;
use crate::data::{repository, Database};
use crate::error::AppError;
use crate::services::discovery_service::{canonical_path, is_indexable_path};
use crate::services::metadata_service::{self, MetadataCodec};

/// Keeps the watcher alive; dropping it stops watching.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl WatchHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn handle_removed(conn: &Connection, path: &Path, config: &Config) -> Result<usize, AppError> {
    let path_str = path.to_string_lossy();
    if is_indexable_path(path, config) {
        return repository::delete_image(conn, &path_str);
    }
    // Possibly a whole directory; drop everything that was under it.
    let mut prefix = path_str.to_string();
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }
    repository::purge_missing_images(conn, &prefix, &HashSet::new())
}

fn handle_changed(
    conn: &Connection,
    codec: &dyn MetadataCodec,
    path: &Path,
    config: &Config,
) -> Result<(), AppError> {
    if path.is_file() {
        if is_indexable_path(path, config) {
            metadata_service::index_image(conn, codec, &path.to_string_lossy())?;
        }
    } else if !path.exists() {
        handle_removed(conn, path, config)?;
    }
    Ok(())
}

/// Applies one filesystem event to the index. Failures are logged per path.
pub fn process_event(conn: &Connection, codec: &dyn MetadataCodec, config: &Config, event: &Event) {
    for path in &event.paths {
        let result = match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => handle_changed(conn, codec, path, config),
            EventKind::Remove(_) => handle_removed(conn, path, config).map(|_| ()),
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "watch event not applied");
        }
    }
}

pub fn start_watching(
    database: &Database,
    codec: Arc<dyn MetadataCodec>,
    config: Arc<Config>,
    root: &Path,
) -> Result<WatchHandle, AppError> {
    if !root.is_dir() {
        return Err(AppError::Watcher(format!(
            "not a directory: {}",
            root.display()
        )));
    }
    let root = canonical_path(root);
    let conn = database.open()?;

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => process_event(&conn, codec.as_ref(), &config, &event),
            Err(e) => tracing::warn!(error = %e, "watcher error"),
        }
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    tracing::info!(root = %root.display(), "watching for changes");

    Ok(WatchHandle {
        _watcher: watcher,
        root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::migrations::run_migrations;
    use crate::services::metadata_service::fake::FakeCodec;
    use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
    use std::fs;
    use std::thread;
    use std::time::{Duration, Instant};

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    fn poll_until<F>(database: &Database, timeout_ms: u64, check: F) -> bool
    where
        F: Fn(&Connection) -> bool,
    {
        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        while start.elapsed() < timeout {
            {
                let conn = database.open().unwrap();
                if check(&conn) {
                    return true;
                }
            }
            thread::sleep(Duration::from_millis(100));
        }
        false
    }

    #[test]
    fn test_create_event_indexes_image() {
        let dir = tempfile::tempdir().unwrap();
        let file = canonical_path(dir.path()).join("new.jpg");
        fs::write(&file, b"x").unwrap();
        let conn = setup_db();
        let codec = FakeCodec::default();
        codec.keywords("new.jpg", &["fresh"]);

        process_event(
            &conn,
            &codec,
            &Config::default(),
            &event(EventKind::Create(CreateKind::File), &file),
        );

        let tags = repository::image_tags(&conn, &file.to_string_lossy()).unwrap();
        assert_eq!(tags["Keywords"], vec!["fresh".to_string()]);
    }

    #[test]
    fn test_cache_and_unsupported_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let root = canonical_path(dir.path());
        fs::create_dir_all(root.join(".thumbnails")).unwrap();
        let cached = root.join(".thumbnails/abc.jpg");
        let text = root.join("notes.txt");
        fs::write(&cached, b"x").unwrap();
        fs::write(&text, b"x").unwrap();

        let conn = setup_db();
        let codec = FakeCodec::default();
        let config = Config::default();
        process_event(&conn, &codec, &config, &event(EventKind::Create(CreateKind::File), &cached));
        process_event(&conn, &codec, &config, &event(EventKind::Create(CreateKind::File), &text));

        assert_eq!(codec.reads(), 0);
        assert_eq!(repository::image_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_remove_and_rename_away_delete_rows() {
        let conn = setup_db();
        let config = Config::default();
        let codec = FakeCodec::default();
        repository::replace_image_tags(&conn, "/gone/a.jpg", "Keywords", &["x".to_string()])
            .unwrap();
        repository::replace_image_tags(&conn, "/gone/b.jpg", "Keywords", &["y".to_string()])
            .unwrap();
        repository::replace_image_tags(&conn, "/gone/sub/c.jpg", "Keywords", &["z".to_string()])
            .unwrap();

        process_event(
            &conn,
            &codec,
            &config,
            &event(EventKind::Remove(RemoveKind::File), Path::new("/gone/a.jpg")),
        );
        process_event(
            &conn,
            &codec,
            &config,
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                Path::new("/gone/b.jpg"),
            ),
        );
        assert_eq!(repository::image_count(&conn).unwrap(), 1);

        process_event(
            &conn,
            &codec,
            &config,
            &event(EventKind::Remove(RemoveKind::Folder), Path::new("/gone/sub")),
        );
        assert_eq!(repository::image_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_watcher_invalid_directory() {
        let dir = tempfile::tempdir().unwrap();
        let database = Database::new(dir.path().join("index.db"));
        let result = start_watching(
            &database,
            Arc::new(FakeCodec::default()),
            Arc::new(Config::default()),
            Path::new("/nonexistent/photo_tag_index_watch"),
        );
        assert!(matches!(result, Err(AppError::Watcher(_))));
    }

    #[test]
    fn test_watcher_tracks_create_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        fs::create_dir_all(&photos).unwrap();
        let database = Database::new(dir.path().join("index.db"));
        database.initialize().unwrap();

        let codec = Arc::new(FakeCodec::default());
        codec.keywords("watched.jpg", &["live"]);
        let handle = start_watching(
            &database,
            codec.clone(),
            Arc::new(Config::default()),
            &photos,
        )
        .unwrap();

        let file = handle.root().join("watched.jpg");
        let path_str = file.to_string_lossy().to_string();
        fs::write(&file, b"x").unwrap();

        let indexed = poll_until(&database, 5000, |conn| {
            repository::image_tags(conn, &path_str)
                .unwrap()
                .get("Keywords")
                .is_some()
        });
        assert!(indexed, "watcher should index a new image");

        fs::remove_file(&file).unwrap();
        let removed = poll_until(&database, 5000, |conn| {
            repository::find_image_id(conn, &path_str).unwrap().is_none()
        });
        drop(handle);
        assert!(removed, "watcher should drop a deleted image");
    }
}
