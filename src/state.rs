use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Config;
use crate::data::{repository, Database};
use crate::error::AppError;
use crate::models::metadata::MetadataFamily;
use crate::models::scan::{ScanOutcome, ScanStatus};
use crate::models::search::{SearchPage, SearchRequest};
use crate::services::asset_service::{AssetCache, AssetOutcome};
use crate::services::discovery_service::canonical_path;
use crate::services::metadata_service::{self, MetadataCodec};
use crate::services::scan_service::ScanOrchestrator;
use crate::services::search_service;
use crate::services::watch_service::{self, WatchHandle};

/// Everything a presentation layer needs, wired to one index.
pub struct AppState {
    pub database: Database,
    pub config: Arc<Config>,
    pub codec: Arc<dyn MetadataCodec>,
    pub scanner: ScanOrchestrator,
    pub assets: AssetCache,
    pub watcher: Mutex<Option<WatchHandle>>,
}

impl AppState {
    pub fn new(config: Config, codec: Arc<dyn MetadataCodec>) -> Result<Self, AppError> {
        config.validate()?;
        let config = Arc::new(config);
        let database = Database::new(config.database_path.clone());
        database.initialize()?;

        Ok(Self {
            scanner: ScanOrchestrator::new(database.clone(), Arc::clone(&codec), Arc::clone(&config)),
            assets: AssetCache::new(Arc::clone(&config)),
            watcher: Mutex::new(None),
            database,
            config,
            codec,
        })
    }

    pub fn start_scan(&self, root: &Path, force: bool) -> bool {
        self.scanner.start(root, force)
    }

    pub fn cancel_scan(&self) {
        self.scanner.cancel();
    }

    pub fn scan_status(&self) -> ScanStatus {
        self.scanner.status()
    }

    pub fn wait_for_scan(&self) -> Option<ScanOutcome> {
        self.scanner.wait()
    }

    pub fn list_images(&self, request: &SearchRequest) -> Result<SearchPage, AppError> {
        let conn = self.database.open()?;
        search_service::list_images(&conn, &self.config, request)
    }

    pub fn image_tags(&self, path: &Path) -> Result<BTreeMap<String, Vec<String>>, AppError> {
        let conn = self.database.open()?;
        repository::image_tags(&conn, &canonical_path(path).to_string_lossy())
    }

    pub fn read_field(
        &self,
        path: &Path,
        family: MetadataFamily,
        field: &str,
    ) -> Result<Vec<String>, AppError> {
        metadata_service::read_field(self.codec.as_ref(), path, family, field)
    }

    pub fn update_field(
        &self,
        path: &Path,
        family: MetadataFamily,
        field: &str,
        values: &[String],
    ) -> Result<Vec<String>, AppError> {
        let conn = self.database.open()?;
        let path = canonical_path(path);
        metadata_service::update_field(
            &conn,
            self.codec.as_ref(),
            &path.to_string_lossy(),
            family,
            field,
            values,
        )
    }

    pub fn suggest_tags(
        &self,
        fragment: &str,
        tag_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, AppError> {
        let conn = self.database.open()?;
        repository::suggest_tags(&conn, fragment, tag_type, limit)
    }

    /// Runs both tag maintenance passes. Returns (invalid, unused) counts.
    pub fn clean_tags(&self) -> Result<(usize, usize), AppError> {
        let conn = self.database.open()?;
        let invalid = repository::remove_invalid_tags(&conn)?;
        let unused = repository::remove_unused_tags(&conn)?;
        tracing::info!(invalid, unused, "tags cleaned");
        Ok((invalid, unused))
    }

    pub fn is_directory_scanned(&self, root: &Path) -> Result<bool, AppError> {
        let conn = self.database.open()?;
        repository::is_directory_scanned(&conn, &canonical_path(root).to_string_lossy())
    }

    pub fn get_preference(&self, key: &str) -> Result<Option<String>, AppError> {
        let conn = self.database.open()?;
        repository::get_preference(&conn, key)
    }

    pub fn set_preference(&self, key: &str, value: &str) -> Result<(), AppError> {
        let conn = self.database.open()?;
        repository::set_preference(&conn, key, value)
    }

    pub fn thumbnail(&self, path: &Path) -> AssetOutcome {
        self.assets.ensure_thumbnail(path)
    }

    pub fn preview(&self, path: &Path, max_edge: Option<u32>) -> AssetOutcome {
        self.assets.ensure_preview(path, max_edge)
    }

    fn watcher_slot(&self) -> MutexGuard<'_, Option<WatchHandle>> {
        self.watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces any current watcher with one on `root`.
    pub fn start_watching(&self, root: &Path) -> Result<(), AppError> {
        let mut slot = self.watcher_slot();
        slot.take();
        let handle = watch_service::start_watching(
            &self.database,
            Arc::clone(&self.codec),
            Arc::clone(&self.config),
            root,
        )?;
        *slot = Some(handle);
        Ok(())
    }

    /// Returns false if nothing was being watched.
    pub fn stop_watching(&self) -> bool {
        self.watcher_slot().take().is_some()
    }

    pub fn watched_root(&self) -> Option<PathBuf> {
        self.watcher_slot()
            .as_ref()
            .map(|handle| handle.root().to_path_buf())
    }
}
