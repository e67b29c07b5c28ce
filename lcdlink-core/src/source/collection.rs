//! Slideshow over a directory of images.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::clip::{ClipFrame, ClipSource};
use crate::config::BackgroundKind;
use crate::error::LcdError;

/// Accepted file extensions, compared case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "webp"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Image files in `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, LcdError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| LcdError::source_unavailable(dir.display().to_string(), e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image_file(p))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Decode every image in `dir`; each stays on screen for `dwell`.
///
/// Files that fail to decode are skipped with a warning.
pub fn open_collection(dir: &Path, dwell: Duration) -> Result<ClipSource, LcdError> {
    let locator = dir.display().to_string();
    let files = list_images(dir)?;
    if files.is_empty() {
        return Err(LcdError::source_unavailable(&locator, "no images in directory"));
    }

    let mut frames = Vec::with_capacity(files.len());
    for file in &files {
        match image::open(file) {
            Ok(img) => frames.push(ClipFrame {
                image: img.to_rgb8(),
                hold: Some(dwell),
            }),
            Err(e) => tracing::warn!("skipping {}: {e}", file.display()),
        }
    }

    tracing::info!(
        "loaded collection {} ({} of {} images)",
        locator,
        frames.len(),
        files.len()
    );
    ClipSource::new(BackgroundKind::ImageCollection, &locator, frames)
}
