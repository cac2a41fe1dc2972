use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::config::Config;
use crate::data::{repository, Database};
use crate::error::AppError;
use crate::models::scan::{ScanMode, ScanOutcome, ScanStatus};
use crate::services::discovery_service::{canonical_path, discover_images, folder_prefix};
use crate::services::metadata_service::{self, MetadataCodec};

#[derive(Debug, Default)]
struct ScanState {
    running: bool,
    cancelled: bool,
    folder: Option<String>,
    processed: usize,
    total: usize,
}

/// Shared scan progress. Every read and write goes through the one mutex.
#[derive(Debug, Clone, Default)]
pub struct ScanControl {
    state: Arc<Mutex<ScanState>>,
}

impl ScanControl {
    fn lock(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims the single scan slot. Returns false if a scan is already running.
    pub fn begin(&self, folder: &str) -> bool {
        let mut state = self.lock();
        if state.running {
            return false;
        }
        *state = ScanState {
            running: true,
            folder: Some(folder.to_string()),
            ..ScanState::default()
        };
        true
    }

    pub fn set_total(&self, total: usize) {
        self.lock().total = total;
    }

    pub fn record_processed(&self) {
        self.lock().processed += 1;
    }

    /// Requests a cooperative stop. No effect when idle.
    pub fn cancel(&self) {
        let mut state = self.lock();
        if state.running {
            state.cancelled = true;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Releases the slot; progress counters keep their last values.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.running = false;
        state.cancelled = false;
        state.folder = None;
    }

    pub fn snapshot(&self) -> ScanStatus {
        let state = self.lock();
        ScanStatus {
            running: state.running,
            folder: state.folder.clone(),
            processed: state.processed,
            total: state.total,
        }
    }
}

struct FinishOnDrop(ScanControl);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Runs at most one background scan at a time.
pub struct ScanOrchestrator {
    database: Database,
    codec: Arc<dyn MetadataCodec>,
    config: Arc<Config>,
    control: ScanControl,
    worker: Mutex<Option<JoinHandle<ScanOutcome>>>,
}

impl ScanOrchestrator {
    pub fn new(database: Database, codec: Arc<dyn MetadataCodec>, config: Arc<Config>) -> Self {
        Self {
            database,
            codec,
            config,
            control: ScanControl::default(),
            worker: Mutex::new(None),
        }
    }

    pub fn control(&self) -> ScanControl {
        self.control.clone()
    }

    /// Starts a scan of `root` on a worker thread. `force` selects a full scan.
    /// Returns false without doing anything if a scan is already running.
    pub fn start(&self, root: &Path, force: bool) -> bool {
        let folder = canonical_path(root).to_string_lossy().to_string();
        if !self.control.begin(&folder) {
            tracing::debug!(folder = %folder, "scan already running");
            return false;
        }

        let database = self.database.clone();
        let codec = Arc::clone(&self.codec);
        let config = Arc::clone(&self.config);
        let control = self.control.clone();
        let mode = ScanMode::from_force(force);
        let worker_folder = folder.clone();

        let spawned = std::thread::Builder::new()
            .name("tag-scan".to_string())
            .spawn(move || {
                let _finish = FinishOnDrop(control.clone());
                tracing::info!(folder = %worker_folder, ?mode, "scan started");
                let outcome =
                    match run_scan(&database, codec.as_ref(), &config, &control, &worker_folder, mode)
                    {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::warn!(folder = %worker_folder, error = %e, "scan failed");
                            ScanOutcome::Failed {
                                reason: e.to_string(),
                            }
                        }
                    };
                tracing::info!(folder = %worker_folder, ?outcome, "scan finished");
                outcome
            });

        match spawned {
            Ok(handle) => {
                *self
                    .worker
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
                true
            }
            Err(e) => {
                tracing::warn!(folder = %folder, error = %e, "could not spawn scan worker");
                self.control.finish();
                false
            }
        }
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn status(&self) -> ScanStatus {
        self.control.snapshot()
    }

    /// Blocks until the most recently started scan ends. `None` if there is no
    /// scan to wait for.
    pub fn wait(&self) -> Option<ScanOutcome> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        Some(handle.join().unwrap_or_else(|_| ScanOutcome::Failed {
            reason: "scan worker panicked".to_string(),
        }))
    }
}

/// One scan pass over `folder`. Per-file codec errors are logged and counted;
/// only store-level errors abort the pass.
pub fn run_scan(
    database: &Database,
    codec: &dyn MetadataCodec,
    config: &Config,
    control: &ScanControl,
    folder: &str,
    mode: ScanMode,
) -> Result<ScanOutcome, AppError> {
    let conn = database.open()?;
    let root = Path::new(folder);
    let prefix = folder_prefix(root);

    let discovered = discover_images(root, config);
    let live: HashSet<String> = discovered.iter().cloned().collect();

    let purged = repository::purge_missing_images(&conn, &prefix, &live)?;
    let unused = repository::remove_unused_tags(&conn)?;
    if purged > 0 || unused > 0 {
        tracing::info!(folder, purged, unused, "purged stale index rows");
    }

    let to_scan: Vec<String> = match mode {
        ScanMode::Full => discovered,
        ScanMode::Incremental => {
            let indexed = repository::indexed_paths(&conn, &prefix)?;
            discovered
                .into_iter()
                .filter(|path| !indexed.contains(path))
                .collect()
        }
    };

    let total = to_scan.len();
    control.set_total(total);

    let mut indexed = 0;
    let mut failed = 0;
    for path in &to_scan {
        if control.is_cancelled() {
            let processed = control.snapshot().processed;
            return Ok(ScanOutcome::Cancelled { processed, total });
        }

        match metadata_service::index_image(&conn, codec, path) {
            Ok(_) => indexed += 1,
            Err(e) => {
                failed += 1;
                tracing::warn!(path = %path, error = %e, "failed to index image");
            }
        }
        control.record_processed();
    }

    repository::mark_directory_scanned(&conn, folder)?;
    repository::remove_unused_tags(&conn)?;

    Ok(ScanOutcome::Completed {
        indexed,
        failed,
        purged,
    })
}
