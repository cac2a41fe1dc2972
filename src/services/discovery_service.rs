use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use crate::config::Config;

/// Canonical form of a user-supplied path, or the path itself when it cannot
/// be resolved.
pub fn canonical_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Store prefix for everything under `root`: canonical path plus a trailing
/// separator, so `/a/b` never matches `/a/bc`.
pub fn folder_prefix(root: &Path) -> String {
    let mut prefix = canonical_path(root).to_string_lossy().to_string();
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }
    prefix
}

fn has_supported_extension(path: &Path, config: &Config) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| config.is_supported_extension(ext))
        .unwrap_or(false)
}

fn inside_cache_dir(path: &Path, config: &Config) -> bool {
    path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .map(|name| config.is_cache_dir_name(name))
            .unwrap_or(false)
    })
}

/// Whether a single path would be returned by [`discover_images`].
pub fn is_indexable_path(path: &Path, config: &Config) -> bool {
    has_supported_extension(path, config) && !inside_cache_dir(path, config)
}

fn should_descend(entry: &walkdir::DirEntry, config: &Config) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    !config.is_cache_dir_name(&name)
}

/// Sorted absolute paths of supported images under `root`. Cache directories
/// are pruned before descent; unreadable subtrees are skipped.
pub fn discover_images(root: &Path, config: &Config) -> Vec<String> {
    let root = canonical_path(root);
    if !root.is_dir() {
        return Vec::new();
    }

    let mut paths: Vec<String> = walkdir::WalkDir::new(&root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| should_descend(e, config))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| has_supported_extension(e.path(), config))
        .filter_map(|e| match e.path().to_str() {
            Some(path) => Some(path.to_string()),
            None => {
                tracing::debug!(path = %e.path().display(), "skipping non-UTF-8 path");
                None
            }
        })
        .collect();

    paths.sort();
    paths
}
