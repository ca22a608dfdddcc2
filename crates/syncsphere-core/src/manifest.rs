//! Directory manifests
//!
//! A manifest is a flat, ordered listing of everything under the sync root.
//! Directories always precede their contents so the peer can recreate
//! nested paths in order, and siblings are sorted by name so scanning an
//! unchanged tree yields the same manifest every time.
//!
//! A scan either covers the whole tree or fails: the peer must never plan
//! against a partial view.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::ScanError;

/// One file or directory under the sync root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Path relative to the root, `/`-separated
    pub path: String,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Local modification time; a change heuristic, not an ordering
    #[serde(rename = "modified", with = "chrono::serde::ts_milliseconds")]
    pub modified_at: DateTime<Utc>,
    #[serde(rename = "isDir")]
    pub is_directory: bool,
}

impl Entry {
    pub fn file(path: impl Into<String>, size: u64, modified_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size,
            modified_at: truncate_to_millis(modified_at),
            is_directory: false,
        }
    }

    /// Directories carry no size and the epoch as timestamp
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            modified_at: DateTime::<Utc>::default(),
            is_directory: true,
        }
    }
}

/// Ordered listing of a tree, replaced wholesale on every scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<Entry>,
}

impl Manifest {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Total bytes across all files
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_directory).count()
    }
}

/// Recursively scan `root`
///
/// Symlinks and special files are skipped. Any read failure aborts the scan.
pub fn scan(root: &Path) -> Result<Manifest, ScanError> {
    let is_dir = std::fs::metadata(root)
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(ScanError::InvalidRoot {
            path: root.to_path_buf(),
        });
    }

    let mut entries = Vec::new();

    for item in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let item = item?;
        let file_type = item.file_type();

        if !file_type.is_dir() && !file_type.is_file() {
            debug!("Skipping non-regular entry {:?}", item.path());
            continue;
        }

        let path = relative_path(root, item.path())?;

        if file_type.is_dir() {
            entries.push(Entry::directory(path));
        } else {
            let metadata = item.metadata()?;
            let modified = metadata
                .modified()
                .map_err(|source| ScanError::Unreadable {
                    path: item.path().to_path_buf(),
                    source,
                })?;
            entries.push(Entry::file(path, metadata.len(), modified.into()));
        }
    }

    debug!("Scanned {} entries under {:?}", entries.len(), root);
    Ok(Manifest::new(entries))
}

/// Run [`scan`] on the blocking thread pool
pub async fn scan_async(root: PathBuf) -> Result<Manifest, ScanError> {
    tokio::task::spawn_blocking(move || scan(&root))
        .await
        .map_err(|e| ScanError::Task(e.to_string()))?
}

/// Convert an absolute path under `root` to its wire form
fn relative_path(root: &Path, path: &Path) -> Result<String, ScanError> {
    let invalid = || ScanError::InvalidPath {
        path: path.to_path_buf(),
    };

    let relative = path.strip_prefix(root).map_err(|_| invalid())?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_str().ok_or_else(invalid)?),
            _ => return Err(invalid()),
        }
    }

    Ok(parts.join("/"))
}

/// Wire timestamps have millisecond precision
fn truncate_to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    fn sample_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("photos/2024")).unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("photos/2024/beach.jpg"), vec![7u8; 300]).unwrap();
        fs::write(root.join("photos/cover.png"), b"png").unwrap();
        fs::write(root.join("docs/readme.md"), b"# hi").unwrap();
        fs::write(root.join("top.txt"), b"top").unwrap();
        dir
    }

    #[test]
    fn test_scan_empty_root() {
        let dir = TempDir::new().unwrap();
        let manifest = scan(dir.path()).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_scan_lists_everything_with_relative_paths() {
        let dir = sample_tree();
        let manifest = scan(dir.path()).unwrap();

        let paths: Vec<&str> = manifest.entries().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "docs",
                "docs/readme.md",
                "photos",
                "photos/2024",
                "photos/2024/beach.jpg",
                "photos/cover.png",
                "top.txt",
            ]
        );

        let beach = manifest.get("photos/2024/beach.jpg").unwrap();
        assert_eq!(beach.size, 300);
        assert!(!beach.is_directory);

        let photos = manifest.get("photos").unwrap();
        assert!(photos.is_directory);
        assert_eq!(photos.size, 0);
        assert_eq!(manifest.file_count(), 4);
        assert_eq!(manifest.total_size(), 300 + 3 + 4 + 3);
    }

    #[test]
    fn test_paths_unique_and_directories_first() {
        let dir = sample_tree();
        let manifest = scan(dir.path()).unwrap();

        let mut seen = HashSet::new();
        for entry in manifest.entries() {
            assert!(seen.insert(entry.path.clone()), "duplicate {}", entry.path);
        }

        for (i, entry) in manifest.entries().iter().enumerate() {
            if !entry.is_directory {
                continue;
            }
            let prefix = format!("{}/", entry.path);
            for (j, other) in manifest.entries().iter().enumerate() {
                if other.path.starts_with(&prefix) {
                    assert!(i < j, "{} listed after {}", entry.path, other.path);
                }
            }
        }
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let dir = sample_tree();
        let first = scan(dir.path()).unwrap();
        let second = scan(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_root_fails() {
        let err = scan(Path::new("/nonexistent/sync/root")).unwrap_err();
        assert!(matches!(err, ScanError::InvalidRoot { .. }));
    }

    #[test]
    fn test_file_as_root_fails() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();

        assert!(matches!(
            scan(&file).unwrap_err(),
            ScanError::InvalidRoot { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let dir = sample_tree();
        std::os::unix::fs::symlink(dir.path().join("top.txt"), dir.path().join("link.txt"))
            .unwrap();

        let manifest = scan(dir.path()).unwrap();
        assert!(manifest.get("link.txt").is_none());
    }

    #[test]
    fn test_entry_wire_format() {
        let entry = Entry::file(
            "a/b.txt",
            12,
            DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
        );
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["path"], "a/b.txt");
        assert_eq!(json["size"], 12);
        assert_eq!(json["modified"], 1_700_000_000_123i64);
        assert_eq!(json["isDir"], false);

        let dir = serde_json::to_value(Entry::directory("a")).unwrap();
        assert_eq!(dir["modified"], 0);
        assert_eq!(dir["isDir"], true);
    }

    #[tokio::test]
    async fn test_scan_async_matches_scan() {
        let dir = sample_tree();
        let manifest = scan_async(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(manifest, scan(dir.path()).unwrap());
    }
}
