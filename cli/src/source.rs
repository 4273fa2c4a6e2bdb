use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cbir_core::{CandidateError, DecodeError, ImageEntry};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "ppm", "tif", "tiff"];

pub(crate) fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| extension.eq_ignore_ascii_case(known))
        })
}

/// Image files under `dir`, sorted by path so traversal order is stable.
pub(crate) fn list_images(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(max_depth) {
        let entry =
            entry.with_context(|| format!("failed to read directory {}", dir.display()))?;
        if entry.file_type().is_file() && is_image_path(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Identifier used for self-exclusion: the canonical path when it resolves.
pub(crate) fn identifier(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Decodes `path` to RGB8, or records only its identifier when the mode
/// needs no pixels.
pub(crate) fn load_entry(path: &Path, needs_pixels: bool) -> Result<ImageEntry, CandidateError> {
    let id = identifier(path);
    if !needs_pixels {
        return Ok(ImageEntry::without_pixels(id));
    }

    match image::open(path) {
        Ok(decoded) => Ok(ImageEntry::new(id, decoded.to_rgb8())),
        Err(error) => Err(CandidateError {
            id,
            error: DecodeError::Unreadable(error.to_string()),
        }),
    }
}
