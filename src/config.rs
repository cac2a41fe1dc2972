use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const CONFIG_PATH_ENV: &str = "PHOTO_TAG_INDEX_CONFIG";
pub const DATABASE_PATH_ENV: &str = "PHOTO_TAG_INDEX_DB";

const APP_NAME: &str = "SimplePhotoMeta";
const DATABASE_FILE_NAME: &str = "photo_tag_index.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub thumbnail_dir_name: String,
    pub preview_dir_name: String,
    pub thumbnail_size: u32,
    pub thumbnail_quality: u8,
    pub placeholder_quality: u8,
    pub preview_quality: u8,
    pub default_preview_edge: u32,
    pub default_page_size: usize,
    pub supported_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            thumbnail_dir_name: ".thumbnails".to_string(),
            preview_dir_name: ".previews".to_string(),
            thumbnail_size: 250,
            thumbnail_quality: 85,
            placeholder_quality: 60,
            preview_quality: 90,
            default_preview_edge: 2048,
            default_page_size: 25,
            supported_extensions: ["jpg", "jpeg", "png", "tif", "tiff", "heic", "heif"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Reads a JSON config file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, overlaid by the file named in `PHOTO_TAG_INDEX_CONFIG`, then
    /// by `PHOTO_TAG_INDEX_DB` for the database location.
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load(Path::new(path.trim()))?,
            _ => Self::default(),
        };

        if let Ok(db_path) = std::env::var(DATABASE_PATH_ENV) {
            if !db_path.trim().is_empty() {
                config.database_path = PathBuf::from(db_path.trim());
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.thumbnail_dir_name.is_empty() || self.preview_dir_name.is_empty() {
            return Err(AppError::InvalidInput(
                "cache directory names must not be empty".to_string(),
            ));
        }
        if self.thumbnail_dir_name == self.preview_dir_name {
            return Err(AppError::InvalidInput(
                "thumbnail and preview cache directories must differ".to_string(),
            ));
        }
        if self.thumbnail_size == 0 || self.default_preview_edge == 0 {
            return Err(AppError::InvalidInput(
                "thumbnail size and preview edge must be positive".to_string(),
            ));
        }
        if self.default_page_size == 0 {
            return Err(AppError::InvalidInput(
                "default page size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_cache_dir_name(&self, name: &str) -> bool {
        name == self.thumbnail_dir_name || name == self.preview_dir_name
    }

    pub fn is_supported_extension(&self, ext: &str) -> bool {
        self.supported_extensions
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(ext))
    }
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATABASE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_viewer_expectations() {
        let config = Config::default();
        assert_eq!(config.thumbnail_dir_name, ".thumbnails");
        assert_eq!(config.preview_dir_name, ".previews");
        assert_eq!(config.thumbnail_size, 250);
        assert_eq!(config.default_preview_edge, 2048);
        assert_eq!(config.default_page_size, 25);
        assert!(config.database_path.ends_with(DATABASE_FILE_NAME));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_extension_check_is_case_insensitive() {
        let config = Config::default();
        assert!(config.is_supported_extension("JPG"));
        assert!(config.is_supported_extension("Tiff"));
        assert!(!config.is_supported_extension("gif"));
    }

    #[test]
    fn test_load_fills_missing_keys_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"thumbnail_size": 128, "database_path": "/tmp/x.db"}"#)
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.thumbnail_size, 128);
        assert_eq!(config.database_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.preview_quality, 90);
    }

    #[test]
    fn test_load_rejects_colliding_cache_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"thumbnail_dir_name": ".cache", "preview_dir_name": ".cache"}"#,
        )
        .unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(AppError::InvalidInput(_))
        ));
    }

    // Only test that touches these variables.
    #[test]
    fn test_from_env_overlays_file_then_database_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"thumbnail_size": 128, "database_path": "/tmp/from_file.db"}"#,
        )
        .unwrap();
        let db_path = dir.path().join("override.db");

        std::env::set_var(CONFIG_PATH_ENV, &path);
        std::env::remove_var(DATABASE_PATH_ENV);
        let from_file = Config::from_env().unwrap();
        assert_eq!(from_file.thumbnail_size, 128);
        assert_eq!(from_file.database_path, PathBuf::from("/tmp/from_file.db"));

        std::env::set_var(DATABASE_PATH_ENV, &db_path);
        let overridden = Config::from_env().unwrap();
        assert_eq!(overridden.thumbnail_size, 128);
        assert_eq!(overridden.database_path, db_path);

        std::env::remove_var(CONFIG_PATH_ENV);
        std::env::set_var(DATABASE_PATH_ENV, "   ");
        let defaults = Config::from_env().unwrap();
        assert_eq!(defaults, Config::default());

        std::env::remove_var(DATABASE_PATH_ENV);
    }
}
