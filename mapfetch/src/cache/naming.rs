//! On-disk naming for the file cache.
//!
//! Layout: `<root>/<sanitized tileset>/<zoom>_<x>_<y>.<ext>`, with a
//! `<zoom>_<x>_<y>.json` metadata sidecar next to each image.

use std::path::{Path, PathBuf};

use dashmap::DashMap;

use crate::coord::CanonicalTileId;

/// Extension of the metadata sidecar.
pub const METADATA_EXTENSION: &str = "json";

/// Characters that are not allowed in a folder name on any supported platform.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replaces filesystem-invalid characters in a tileset id with `-`.
pub fn sanitize_folder_name(tileset: &str) -> String {
    tileset
        .chars()
        .map(|c| {
            if c.is_control() || INVALID_CHARS.contains(&c) {
                '-'
            } else {
                c
            }
        })
        .collect()
}

/// Maps tileset ids and tiles to paths under a cache root.
///
/// Folder names are memoized per tileset id.
#[derive(Debug)]
pub struct CacheLayout {
    root: PathBuf,
    extension: String,
    folders: DashMap<String, String>,
}

impl CacheLayout {
    /// Creates a layout rooted at `root` storing images with `extension`
    /// (with or without a leading dot).
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
            folders: DashMap::new(),
        }
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Image extension, without the dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Sanitized folder name for a tileset.
    pub fn folder_name(&self, tileset: &str) -> String {
        if let Some(name) = self.folders.get(tileset) {
            return name.clone();
        }
        self.folders
            .entry(tileset.to_string())
            .or_insert_with(|| sanitize_folder_name(tileset))
            .clone()
    }

    /// Directory holding a tileset's files.
    pub fn tileset_dir(&self, tileset: &str) -> PathBuf {
        self.root.join(self.folder_name(tileset))
    }

    /// Path of the image file for a tile.
    pub fn tile_path(&self, tileset: &str, tile: &CanonicalTileId) -> PathBuf {
        self.tileset_dir(tileset)
            .join(format!("{}.{}", tile.file_stem(), self.extension))
    }

    /// Path of the metadata sidecar for a tile image.
    pub fn metadata_path(tile_path: &Path) -> PathBuf {
        tile_path.with_extension(METADATA_EXTENSION)
    }

    /// Returns true if `path` names a tile image (not a sidecar or temp file).
    pub fn is_tile_file(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_invalid_characters() {
        assert_eq!(
            sanitize_folder_name("mapbox://styles/user/style"),
            "mapbox---styles-user-style"
        );
        assert_eq!(sanitize_folder_name("mapbox.satellite"), "mapbox.satellite");
        assert_eq!(sanitize_folder_name("a|b?c*d\te"), "a-b-c-d-e");
    }

    #[test]
    fn test_tile_path() {
        let layout = CacheLayout::new("/cache", ".png");
        let path = layout.tile_path("mapbox.streets", &CanonicalTileId::new(4, 2, 3));
        assert_eq!(path, PathBuf::from("/cache/mapbox.streets/4_2_3.png"));
        assert_eq!(
            CacheLayout::metadata_path(&path),
            PathBuf::from("/cache/mapbox.streets/4_2_3.json")
        );
    }

    #[test]
    fn test_folder_name_is_memoized() {
        let layout = CacheLayout::new("/cache", "png");
        let first = layout.folder_name("a/b");
        let second = layout.folder_name("a/b");
        assert_eq!(first, "a-b");
        assert_eq!(first, second);
        assert_eq!(layout.folders.len(), 1);
    }

    #[test]
    fn test_is_tile_file() {
        let layout = CacheLayout::new("/cache", "png");
        assert!(layout.is_tile_file(Path::new("/cache/x/1_0_0.png")));
        assert!(!layout.is_tile_file(Path::new("/cache/x/1_0_0.json")));
        assert!(!layout.is_tile_file(Path::new("/cache/x/1_0_0.png.7.tmp")));
    }
}
