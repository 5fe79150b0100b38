use crate::core::image::{media_type_for_path, MediaItem, MediaType};
use crate::services::content_hash::ContentHasher;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// How items are keyed. Identity is always the path; content mode adds a
/// SHA-256 content key used by the analysis cache and exact-copy detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    #[default]
    Path,
    Content,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    pub recursive: bool,
    pub max_depth: Option<usize>,
    pub identity: IdentityMode,
    /// Files larger than this get no content key.
    #[serde(default = "default_content_hash_limit")]
    pub content_hash_limit: Option<u64>,
}

fn default_content_hash_limit() -> Option<u64> {
    Some(100 * 1024 * 1024)
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            max_depth: None,
            identity: IdentityMode::Path,
            content_hash_limit: default_content_hash_limit(),
        }
    }
}

/// Enumerates supported media under a directory in sorted file-name order.
pub struct MediaScanner {
    options: ScanOptions,
}

impl MediaScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    pub fn scan(&self, root: &Path) -> Result<Vec<MediaItem>, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let mut walker = WalkDir::new(root).sort_by_file_name();
        if !self.options.recursive {
            walker = walker.max_depth(1);
        } else if let Some(max_depth) = self.options.max_depth {
            walker = walker.max_depth(max_depth);
        }

        let mut found: Vec<(PathBuf, MediaType, u64)> = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(media_type) = media_type_for_path(entry.path()) else {
                continue;
            };
            match entry.metadata() {
                Ok(metadata) => found.push((entry.into_path(), media_type, metadata.len())),
                Err(e) => log::warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }

        let items: Vec<MediaItem> = found
            .into_iter()
            .map(|(path, media_type, size)| {
                let identity = path.to_string_lossy().to_string();
                MediaItem::new(identity, path, media_type, size)
            })
            .collect();
        let items = match self.options.identity {
            IdentityMode::Path => items,
            IdentityMode::Content => self.with_content_keys(items),
        };

        log::info!("Found {} media files under {}", items.len(), root.display());
        Ok(items)
    }

    fn with_content_keys(&self, items: Vec<MediaItem>) -> Vec<MediaItem> {
        let limit = self.options.content_hash_limit.unwrap_or(u64::MAX);
        let (hashable, too_large): (Vec<usize>, Vec<usize>) =
            (0..items.len()).partition(|&i| items[i].file_size <= limit);
        for &i in &too_large {
            log::debug!(
                "Not hashing {} ({} bytes exceeds the content hash limit)",
                items[i].source.display(),
                items[i].file_size
            );
        }

        let paths: Vec<PathBuf> = hashable.iter().map(|&i| items[i].source.clone()).collect();
        let mut keys: Vec<Option<String>> = vec![None; items.len()];
        let mut unreadable = vec![false; items.len()];
        for (&i, key) in hashable.iter().zip(ContentHasher::new().content_keys(&paths)) {
            match key {
                Ok(key) => keys[i] = Some(key),
                Err(e) => {
                    log::warn!("Skipping {}: {}", items[i].source.display(), e);
                    unreadable[i] = true;
                }
            }
        }

        items
            .into_iter()
            .zip(keys)
            .zip(unreadable)
            .filter(|(_, unreadable)| !unreadable)
            .map(|((item, key), _)| match key {
                Some(key) => item.with_content_key(key),
                None => item,
            })
            .collect()
    }
}

impl Default for MediaScanner {
    fn default() -> Self {
        Self::new(ScanOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn library() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.jpg"), b"bbbb").unwrap();
        fs::write(dir.path().join("a.PNG"), b"aa").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();
        fs::create_dir(dir.path().join("trip")).unwrap();
        fs::write(dir.path().join("trip").join("clip.mp4"), b"video").unwrap();
        fs::write(dir.path().join("trip").join("copy.jpg"), b"bbbb").unwrap();
        dir
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let dir = library();
        let items = MediaScanner::default().scan(dir.path()).unwrap();

        let names: Vec<&str> = items.iter().map(|item| item.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.PNG", "b.jpg", "clip.mp4", "copy.jpg"]);
        assert_eq!(items[0].file_size, 2);
        assert_eq!(items[2].media_type, MediaType::Video);
        assert_eq!(items[1].identity, items[1].source.to_string_lossy());
    }

    #[test]
    fn test_non_recursive_scan() {
        let dir = library();
        let scanner = MediaScanner::new(ScanOptions {
            recursive: false,
            ..ScanOptions::default()
        });
        let items = scanner.scan(dir.path()).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_content_identity() {
        let dir = library();
        let scanner = MediaScanner::new(ScanOptions {
            identity: IdentityMode::Content,
            ..ScanOptions::default()
        });
        let items = scanner.scan(dir.path()).unwrap();

        let b = items.iter().find(|item| item.file_name == "b.jpg").unwrap();
        let copy = items.iter().find(|item| item.file_name == "copy.jpg").unwrap();
        assert_ne!(b.identity, copy.identity);
        assert_eq!(b.identity, b.source.to_string_lossy());
        assert_eq!(b.content_key, copy.content_key);
        assert_eq!(b.store_key().len(), 64);

        let a = items.iter().find(|item| item.file_name == "a.PNG").unwrap();
        assert_ne!(a.content_key, b.content_key);
    }

    #[test]
    fn test_large_files_get_no_content_key() {
        let dir = library();
        let scanner = MediaScanner::new(ScanOptions {
            identity: IdentityMode::Content,
            content_hash_limit: Some(3),
            ..ScanOptions::default()
        });
        let items = scanner.scan(dir.path()).unwrap();
        assert_eq!(items.len(), 4);

        let small = items.iter().find(|item| item.file_name == "a.PNG").unwrap();
        let large = items.iter().find(|item| item.file_name == "b.jpg").unwrap();
        assert!(small.content_key.is_some());
        assert_eq!(large.content_key, None);
        assert_eq!(large.store_key(), large.identity);
    }

    #[test]
    fn test_missing_root() {
        let dir = TempDir::new().unwrap();
        let result = MediaScanner::default().scan(&dir.path().join("nope"));
        assert!(matches!(result, Err(ScanError::NotADirectory(_))));
    }
}
