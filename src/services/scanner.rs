//! Library path scanner
//!
//! Walks a library directory tree, filters out noise (hidden entries, OS
//! artifacts, sidecar files) and emits candidate entries with extracted
//! identifiers. Collection is eager: later pipeline phases need the full
//! entry count for progress accounting.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::identifier::{self, ExtractedIds};

/// OS and filesystem artifacts never worth scanning
const SYSTEM_ARTIFACTS: &[&str] = &[
    "thumbs.db",
    "desktop.ini",
    ".ds_store",
    "lost+found",
    "$recycle.bin",
    "system volume information",
];

/// Sidecar/metadata extensions that are noise even inside media folders
const NON_MEDIA_EXTENSIONS: &[&str] = &[
    "srt", "sub", "idx", "ass", "ssa", "vtt", "smi", // subtitles
    "nfo", "xml", "json", "sfv", "md5", // metadata sidecars
    "jpg", "jpeg", "png", "gif", "bmp", "webp", // images
    "txt", "log", "ini", "db", "url", // text and leftovers
];

/// One candidate entry discovered during a scan
#[derive(Debug, Clone)]
pub struct ScannedEntry {
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub ids: ExtractedIds,
}

/// Recursive directory scanner with noise filtering
pub struct PathScanner {
    max_depth: usize,
    media_extensions: HashSet<String>,
}

impl PathScanner {
    pub fn new(max_depth: usize, media_extensions: &[String]) -> Self {
        Self {
            max_depth,
            media_extensions: media_extensions.iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    /// Walk `root` and collect every kept entry.
    ///
    /// Unreadable sub-paths are logged and skipped; they never abort the
    /// scan. A missing or empty root yields an empty result.
    pub fn scan(&self, root: &Path) -> Vec<ScannedEntry> {
        let mut entries = Vec::new();

        let walker = WalkDir::new(root)
            .max_depth(self.max_depth)
            .follow_links(true)
            .into_iter();

        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable path during scan");
                    continue;
                }
            };

            // The root itself is not a candidate
            if entry.depth() == 0 {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if is_noise(&name) {
                continue;
            }

            let is_dir = entry.file_type().is_dir();
            let extension = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase());

            if !is_dir {
                if let Some(ext) = &extension {
                    if NON_MEDIA_EXTENSIONS.contains(&ext.as_str()) {
                        continue;
                    }
                }
            }

            let ids = identifier::extract_from_path(entry.path());

            let keep = is_dir
                || extension
                    .as_deref()
                    .is_some_and(|ext| self.media_extensions.contains(ext))
                || has_structured_id(&ids);
            if !keep {
                continue;
            }

            let (size_bytes, modified_at) = match entry.metadata() {
                Ok(meta) => (
                    meta.len(),
                    meta.modified().ok().map(DateTime::<Utc>::from),
                ),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Failed to stat entry, skipping");
                    continue;
                }
            };

            entries.push(ScannedEntry {
                path: entry.path().to_path_buf(),
                name,
                is_dir,
                size_bytes,
                modified_at,
                ids,
            });
        }

        debug!(root = %root.display(), count = entries.len(), "Scan collected entries");
        entries
    }
}

/// Hidden entries and known OS artifacts
fn is_noise(name: &str) -> bool {
    name.starts_with('.') || SYSTEM_ARTIFACTS.contains(&name.to_lowercase().as_str())
}

/// At least one structured field matched (a freeform title alone does not
/// make an arbitrary file a media candidate)
fn has_structured_id(ids: &ExtractedIds) -> bool {
    ids.tmdb_id.is_some()
        || ids.imdb_id.is_some()
        || ids.tvdb_id.is_some()
        || ids.season.is_some()
        || ids.episode.is_some()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_filters_noise_keeps_media() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("episode.mkv"));
        touch(&dir.path().join("episode.srt"));
        touch(&dir.path().join("Thumbs.db"));
        touch(&dir.path().join(".hidden.mkv"));

        let scanner = PathScanner::new(4, &["mkv".to_string()]);
        let entries = scanner.scan(dir.path());

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "episode.mkv");
        assert!(!entries[0].is_dir);
    }

    #[test]
    fn test_directories_kept_and_recursed() {
        let dir = tempfile::tempdir().unwrap();
        let show = dir.path().join("Show (2020) {tmdb-999}");
        fs::create_dir(&show).unwrap();
        touch(&show.join("Show.S01E02.mkv"));

        let scanner = PathScanner::new(4, &["mkv".to_string()]);
        let entries = scanner.scan(dir.path());

        assert_eq!(entries.len(), 2);
        let file = entries.iter().find(|e| !e.is_dir).unwrap();
        assert_eq!(file.ids.tmdb_id, Some(999), "path tag should reach the file entry");
        assert_eq!(file.ids.season, Some(1));
        assert_eq!(file.ids.episode, Some(2));
    }

    #[test]
    fn test_max_depth_respected() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a").join("b");
        fs::create_dir_all(&deep).unwrap();
        touch(&deep.join("movie.mkv"));

        let scanner = PathScanner::new(1, &["mkv".to_string()]);
        let entries = scanner.scan(dir.path());
        assert!(entries.iter().all(|e| e.is_dir), "depth 1 sees only the top directory");
    }

    #[test]
    fn test_missing_root_yields_empty() {
        let scanner = PathScanner::new(4, &["mkv".to_string()]);
        let entries = scanner.scan(Path::new("/definitely/not/here"));
        assert!(entries.is_empty());
    }

    #[test]
    fn test_tagged_file_with_unknown_extension_kept() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Feature {tmdb-42}.iso"));

        let scanner = PathScanner::new(4, &["mkv".to_string()]);
        let entries = scanner.scan(dir.path());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ids.tmdb_id, Some(42));
    }
}
