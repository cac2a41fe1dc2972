//! Thumbnails and bounded-edge previews, cached as JPEG files next to their
//! source images.
//!
//! Cache files live in a reserved subdirectory of the source's directory and are
//! named by the SHA-256 of the absolute source path (plus the edge length for
//! previews). A thumbnail is valid as soon as it exists. A preview is valid
//! while its modification time is not older than the source's.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use filetime::FileTime;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageReader, Luma, Rgb, RgbImage};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::AppError;
use crate::services::discovery_service::canonical_path;

const PLACEHOLDER_GRAY: Rgb<u8> = Rgb([210, 210, 210]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum AssetOutcome {
    Ready(PathBuf),
    Failed(String),
}

impl AssetOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Ready(path) => Some(path),
            Self::Failed(_) => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

fn cache_key(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn modified_time(path: &Path) -> Result<SystemTime, AppError> {
    Ok(fs::metadata(path)?.modified()?)
}

/// Decodes the first frame, applies the embedded orientation and converts
/// whatever pixel layout the decoder produced into 8-bit RGB.
fn decode_for_display(src: &Path) -> Result<RgbImage, AppError> {
    let mut decoder = ImageReader::open(src)?.with_guessed_format()?.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(to_display_rgb(img))
}

fn to_display_rgb(img: DynamicImage) -> RgbImage {
    match img {
        DynamicImage::ImageLuma16(gray) => DynamicImage::ImageLuma8(autocontrast(&gray)).to_rgb8(),
        DynamicImage::ImageLumaA16(gray) => {
            let luma = DynamicImage::ImageLumaA16(gray).to_luma16();
            DynamicImage::ImageLuma8(autocontrast(&luma)).to_rgb8()
        }
        other => other.to_rgb8(),
    }
}

/// Stretches high-bit-depth grayscale so its darkest sample maps to 0 and its
/// brightest to 255.
fn autocontrast(gray: &image::ImageBuffer<Luma<u16>, Vec<u16>>) -> GrayImage {
    let (lo, hi) = gray
        .pixels()
        .fold((u16::MAX, u16::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    let span = u32::from(hi.saturating_sub(lo)).max(1);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = u32::from(gray.get_pixel(x, y).0[0].saturating_sub(lo));
        Luma([((v * 255) / span).min(255) as u8])
    })
}

/// Shrinks to fit a `max_edge` square, keeping the aspect ratio. Never upscales.
fn fit_within(img: RgbImage, max_edge: u32) -> RgbImage {
    if img.width() <= max_edge && img.height() <= max_edge {
        return img;
    }
    DynamicImage::ImageRgb8(img)
        .resize(max_edge, max_edge, FilterType::Lanczos3)
        .to_rgb8()
}

/// Encodes into a temporary file beside `dest` and renames it into place, so
/// readers never see a partially written JPEG.
fn write_jpeg(img: &RgbImage, dest: &Path, quality: u8) -> Result<(), AppError> {
    let dir = dest
        .parent()
        .ok_or_else(|| AppError::Asset(format!("no cache directory for {}", dest.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        JpegEncoder::new_with_quality(&mut writer, quality).encode(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )?;
        writer.flush()?;
    }
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AssetCache {
    config: Arc<Config>,
}

impl AssetCache {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn cache_file(
        &self,
        src: &Path,
        dir_name: &str,
        key_input: impl FnOnce(&str) -> String,
    ) -> Result<PathBuf, AppError> {
        let abs = canonical_path(src);
        let parent = abs
            .parent()
            .ok_or_else(|| AppError::Asset(format!("{} has no parent directory", abs.display())))?;
        let key = cache_key(&key_input(&abs.to_string_lossy()));
        Ok(parent.join(dir_name).join(format!("{key}.jpg")))
    }

    pub fn thumbnail_path(&self, src: &Path) -> Result<PathBuf, AppError> {
        self.cache_file(src, &self.config.thumbnail_dir_name, |abs| abs.to_string())
    }

    pub fn preview_path(&self, src: &Path, max_edge: u32) -> Result<PathBuf, AppError> {
        self.cache_file(src, &self.config.preview_dir_name, |abs| {
            format!("{abs}::{max_edge}")
        })
    }

    fn write_placeholder(&self, dest: &Path) -> Result<(), AppError> {
        let size = self.config.thumbnail_size;
        let gray = RgbImage::from_pixel(size, size, PLACEHOLDER_GRAY);
        write_jpeg(&gray, dest, self.config.placeholder_quality)
    }

    /// Returns the cached thumbnail, generating it on first request. A source
    /// that cannot be decoded gets a gray placeholder, which is then served
    /// like any other thumbnail. A missing source fails without touching disk.
    pub fn ensure_thumbnail(&self, src: &Path) -> AssetOutcome {
        if !src.is_file() {
            return AssetOutcome::Failed(format!("{} is not a file", src.display()));
        }
        let dest = match self.thumbnail_path(src) {
            Ok(dest) => dest,
            Err(e) => return AssetOutcome::Failed(e.to_string()),
        };
        if dest.exists() {
            return AssetOutcome::Ready(dest);
        }
        if let Some(dir) = dest.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                return AssetOutcome::Failed(e.to_string());
            }
        }

        let generated = decode_for_display(src).and_then(|img| {
            let thumb = fit_within(img, self.config.thumbnail_size);
            write_jpeg(&thumb, &dest, self.config.thumbnail_quality)
        });
        match generated {
            Ok(()) => AssetOutcome::Ready(dest),
            Err(e) => {
                tracing::warn!(src = %src.display(), error = %e, "thumbnail failed, writing placeholder");
                match self.write_placeholder(&dest) {
                    Ok(()) => AssetOutcome::Ready(dest),
                    Err(placeholder_err) => {
                        AssetOutcome::Failed(format!("{e}; placeholder: {placeholder_err}"))
                    }
                }
            }
        }
    }

    /// Returns a preview no larger than `max_edge` (the configured default when
    /// `None` or zero), regenerating it when the source is newer. On failure
    /// any cached preview is removed and the caller should show the original.
    pub fn ensure_preview(&self, src: &Path, max_edge: Option<u32>) -> AssetOutcome {
        let edge = max_edge
            .filter(|edge| *edge > 0)
            .unwrap_or(self.config.default_preview_edge);
        let dest = match self.preview_path(src, edge) {
            Ok(dest) => dest,
            Err(e) => return AssetOutcome::Failed(e.to_string()),
        };

        match self.refresh_preview(src, &dest, edge) {
            Ok(()) => AssetOutcome::Ready(dest),
            Err(e) => {
                if dest.exists() {
                    if let Err(remove_err) = fs::remove_file(&dest) {
                        tracing::warn!(dest = %dest.display(), error = %remove_err, "could not remove stale preview");
                    }
                }
                tracing::warn!(src = %src.display(), error = %e, "preview failed");
                AssetOutcome::Failed(e.to_string())
            }
        }
    }

    fn refresh_preview(&self, src: &Path, dest: &Path, edge: u32) -> Result<(), AppError> {
        let src_modified = modified_time(src)?;
        if let Ok(cached) = modified_time(dest) {
            if cached >= src_modified {
                return Ok(());
            }
        }

        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)?;
        }
        let preview = fit_within(decode_for_display(src)?, edge);
        write_jpeg(&preview, dest, self.config.preview_quality)?;
        filetime::set_file_mtime(dest, FileTime::from_system_time(src_modified))?;
        tracing::debug!(src = %src.display(), edge, "preview generated");
        Ok(())
    }

    pub async fn thumbnail_async(&self, src: PathBuf) -> AssetOutcome {
        let cache = self.clone();
        tokio::task::spawn_blocking(move || cache.ensure_thumbnail(&src))
            .await
            .unwrap_or_else(|e| AssetOutcome::Failed(format!("thumbnail worker failed: {e}")))
    }

    pub async fn preview_async(&self, src: PathBuf, max_edge: Option<u32>) -> AssetOutcome {
        let cache = self.clone();
        tokio::task::spawn_blocking(move || cache.ensure_preview(&src, max_edge))
            .await
            .unwrap_or_else(|e| AssetOutcome::Failed(format!("preview worker failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> AssetCache {
        AssetCache::new(Arc::new(Config::default()))
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
            .save(path)
            .unwrap();
    }

    fn mtime(path: &Path) -> FileTime {
        FileTime::from_last_modification_time(&fs::metadata(path).unwrap())
    }

    #[test]
    fn test_thumbnail_fits_box_and_keeps_aspect() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("wide.png");
        write_png(&src, 600, 400);

        let outcome = cache().ensure_thumbnail(&src);
        let dest = outcome.path().unwrap().to_path_buf();
        assert_eq!(
            dest.parent().unwrap().file_name().unwrap(),
            ".thumbnails"
        );

        let thumb = image::open(&dest).unwrap();
        assert_eq!(thumb.width(), 250);
        assert!((166..=167).contains(&thumb.height()));
    }

    #[test]
    fn test_thumbnail_is_not_regenerated_once_present() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        write_png(&src, 300, 300);
        let cache = cache();

        let dest = cache.ensure_thumbnail(&src).path().unwrap().to_path_buf();
        fs::write(&dest, b"marker").unwrap();
        filetime::set_file_mtime(&src, FileTime::from_unix_time(4_000_000_000, 0)).unwrap();

        assert_eq!(cache.ensure_thumbnail(&src), AssetOutcome::Ready(dest.clone()));
        assert_eq!(fs::read(&dest).unwrap(), b"marker");
    }

    #[test]
    fn test_undecodable_source_gets_gray_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("broken.jpg");
        fs::write(&src, b"not a jpeg").unwrap();

        let outcome = cache().ensure_thumbnail(&src);
        assert!(outcome.is_ready());
        let placeholder = image::open(outcome.path().unwrap()).unwrap().to_rgb8();
        assert_eq!(placeholder.dimensions(), (250, 250));
        let Rgb([r, g, b]) = *placeholder.get_pixel(125, 125);
        for channel in [r, g, b] {
            assert!(channel.abs_diff(210) <= 4, "{channel}");
        }
    }

    #[test]
    fn test_cache_paths_are_deterministic_and_edge_specific() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        write_png(&src, 10, 10);
        let cache = cache();

        assert_eq!(cache.preview_path(&src, 1024).unwrap(), cache.preview_path(&src, 1024).unwrap());
        assert_ne!(cache.preview_path(&src, 1024).unwrap(), cache.preview_path(&src, 2048).unwrap());
        let name = cache.thumbnail_path(&src).unwrap();
        let stem = name.file_stem().unwrap().to_string_lossy().to_string();
        assert_eq!(stem.len(), 64);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_preview_is_reused_while_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        write_png(&src, 640, 480);
        let cache = cache();

        let first = cache.ensure_preview(&src, Some(320));
        let dest = first.path().unwrap().to_path_buf();
        assert_eq!(mtime(&dest), mtime(&src));
        let preview = image::open(&dest).unwrap();
        assert_eq!((preview.width(), preview.height()), (320, 240));

        fs::write(&dest, b"marker").unwrap();
        filetime::set_file_mtime(&dest, mtime(&src)).unwrap();

        let second = cache.ensure_preview(&src, Some(320));
        assert_eq!(second, first);
        assert_eq!(fs::read(&dest).unwrap(), b"marker");
    }

    #[test]
    fn test_touched_source_regenerates_preview() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        write_png(&src, 100, 80);
        let cache = cache();

        let dest = cache.ensure_preview(&src, None).path().unwrap().to_path_buf();
        fs::write(&dest, b"marker").unwrap();
        let old = mtime(&src);
        filetime::set_file_mtime(&dest, old).unwrap();
        filetime::set_file_mtime(&src, FileTime::from_unix_time(old.unix_seconds() + 10, 0))
            .unwrap();

        assert!(cache.ensure_preview(&src, None).is_ready());
        assert_ne!(fs::read(&dest).unwrap(), b"marker");
        assert_eq!(mtime(&dest), mtime(&src));
        // Smaller than the default edge, so no upscaling.
        assert_eq!(image::open(&dest).unwrap().width(), 100);
    }

    #[test]
    fn test_failed_preview_removes_stale_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        write_png(&src, 50, 50);
        let cache = cache();

        let dest = cache.ensure_preview(&src, None).path().unwrap().to_path_buf();
        assert!(dest.exists());

        let old = mtime(&src);
        fs::write(&src, b"corrupted").unwrap();
        filetime::set_file_mtime(&src, FileTime::from_unix_time(old.unix_seconds() + 10, 0))
            .unwrap();

        assert!(matches!(cache.ensure_preview(&src, None), AssetOutcome::Failed(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn test_missing_source_fails_preview() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = cache().ensure_preview(&dir.path().join("gone.png"), None);
        assert!(matches!(outcome, AssetOutcome::Failed(_)));
    }

    #[test]
    fn test_missing_source_fails_thumbnail_without_creating_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("never/created");
        let src = parent.join("gone.jpg");

        let outcome = cache().ensure_thumbnail(&src);
        assert!(matches!(outcome, AssetOutcome::Failed(_)));
        assert!(!parent.exists());

        fs::create_dir_all(&parent).unwrap();
        write_png(&src, 40, 20);
        let thumb = image::open(cache().ensure_thumbnail(&src).path().unwrap()).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (40, 20));
    }

    #[test]
    fn test_high_bit_depth_gray_is_stretched() {
        let gray = image::ImageBuffer::from_fn(4, 1, |x, _| Luma([1000u16 + x as u16 * 100]));
        let rgb = to_display_rgb(DynamicImage::ImageLuma16(gray));
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(3, 0).0, [255, 255, 255]);
    }

    #[tokio::test]
    async fn test_async_wrappers_run_off_the_reactor() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        write_png(&src, 400, 400);
        let cache = cache();

        let thumb = cache.thumbnail_async(src.clone()).await;
        let preview = cache.preview_async(src, Some(200)).await;
        assert!(thumb.is_ready());
        assert_eq!(image::open(preview.path().unwrap()).unwrap().width(), 200);
    }
}
