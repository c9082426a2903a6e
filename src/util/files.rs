//! File and directory interning cache.
//!
//! Every path the orchestrator touches is interned into a [`FileItem`] so
//! that existence checks, timestamps, and directory listings are read from
//! disk at most once per session. The cache is owned by the build session,
//! not a global, so two sessions never observe each other's stale entries.

use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

/// Shared handle to an interned file.
pub type FileHandle = Arc<FileItem>;

/// Timestamp in 100ns ticks since the Unix epoch, or -1 when the file does
/// not exist. Dependency caches persist this value.
pub fn ticks_from_system_time(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_nanos() / 100) as i64,
        Err(_) => -1,
    }
}

/// Inverse of [`ticks_from_system_time`], for comparisons against live mtimes.
pub fn system_time_from_ticks(ticks: i64) -> SystemTime {
    if ticks < 0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + Duration::from_nanos(ticks as u64 * 100)
    }
}

#[derive(Debug, Clone, Copy)]
struct FileInfo {
    exists: bool,
    last_write_ticks: i64,
}

/// An interned file with cached metadata.
///
/// Two lookups of the same lexical path yield the same `Arc`, so handle
/// equality is pointer equality.
pub struct FileItem {
    path: PathBuf,
    info: RwLock<Option<FileInfo>>,
    content_hash: RwLock<Option<Option<String>>>,
}

impl FileItem {
    fn new(path: PathBuf) -> Self {
        FileItem {
            path,
            info: RwLock::new(None),
            content_hash: RwLock::new(None),
        }
    }

    /// The normalized absolute path of this item.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name component, empty for root paths.
    pub fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
    }

    /// Whether the file currently exists, cached after first probe.
    pub fn exists(&self) -> bool {
        self.probe().exists
    }

    /// Last write time in ticks, or -1 if the file does not exist.
    pub fn last_write_ticks(&self) -> i64 {
        self.probe().last_write_ticks
    }

    /// Last write time as a `SystemTime`, if the file exists.
    pub fn last_write_time(&self) -> Option<SystemTime> {
        let info = self.probe();
        info.exists
            .then(|| system_time_from_ticks(info.last_write_ticks))
    }

    /// Content-change signal: the SHA-256 of the file's bytes, cached
    /// until invalidated. None when the file does not exist.
    pub fn content_hash(&self) -> Option<String> {
        if let Some(cached) = self.content_hash.read().unwrap().as_ref() {
            return cached.clone();
        }
        let mut slot = self.content_hash.write().unwrap();
        if let Some(cached) = slot.as_ref() {
            return cached.clone();
        }
        let hash = crate::util::hash::sha256_file(&self.path).ok();
        *slot = Some(hash.clone());
        hash
    }

    /// Drop cached metadata so the next query re-reads the filesystem.
    pub fn invalidate(&self) {
        *self.info.write().unwrap() = None;
        *self.content_hash.write().unwrap() = None;
    }

    fn probe(&self) -> FileInfo {
        if let Some(info) = *self.info.read().unwrap() {
            return info;
        }
        let mut slot = self.info.write().unwrap();
        if let Some(info) = *slot {
            return info;
        }
        let info = match fs::metadata(&self.path) {
            Ok(meta) => FileInfo {
                exists: true,
                last_write_ticks: meta
                    .modified()
                    .map(ticks_from_system_time)
                    .unwrap_or(-1),
            },
            Err(_) => FileInfo {
                exists: false,
                last_write_ticks: -1,
            },
        };
        *slot = Some(info);
        info
    }
}

impl fmt::Debug for FileItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileItem").field("path", &self.path).finish()
    }
}

impl fmt::Display for FileItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl PartialEq for FileItem {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.path == other.path
    }
}

impl Eq for FileItem {}

impl std::hash::Hash for FileItem {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// A cached directory listing, split into files and subdirectories.
#[derive(Debug, Default)]
pub struct DirectoryListing {
    pub files: Vec<FileHandle>,
    pub directories: Vec<PathBuf>,
    pub exists: bool,
}

/// Session-owned cache of interned files and directory listings.
#[derive(Default)]
pub struct FileSystemCache {
    files: DashMap<PathBuf, FileHandle>,
    listings: DashMap<PathBuf, Arc<DirectoryListing>>,
}

impl FileSystemCache {
    pub fn new() -> Self {
        FileSystemCache::default()
    }

    /// Intern a path, returning the canonical handle for it.
    pub fn file(&self, path: impl AsRef<Path>) -> FileHandle {
        let normalized = normalize_lexically(path.as_ref());
        if let Some(existing) = self.files.get(&normalized) {
            return existing.clone();
        }
        self.files
            .entry(normalized.clone())
            .or_insert_with(|| Arc::new(FileItem::new(normalized)))
            .clone()
    }

    /// List a directory, cached. Entries are sorted by path so that every
    /// downstream walk is deterministic.
    pub fn list_directory(&self, path: impl AsRef<Path>) -> Arc<DirectoryListing> {
        let normalized = normalize_lexically(path.as_ref());
        if let Some(existing) = self.listings.get(&normalized) {
            return existing.clone();
        }

        let mut listing = DirectoryListing::default();
        match fs::read_dir(&normalized) {
            Ok(entries) => {
                listing.exists = true;
                for entry in entries.flatten() {
                    let entry_path = entry.path();
                    match entry.file_type() {
                        Ok(ty) if ty.is_dir() => listing.directories.push(entry_path),
                        Ok(_) => listing.files.push(self.file(&entry_path)),
                        Err(_) => {}
                    }
                }
                listing.files.sort_by(|a, b| a.path().cmp(b.path()));
                listing.directories.sort();
            }
            Err(_) => {
                listing.exists = false;
            }
        }

        let listing = Arc::new(listing);
        self.listings.insert(normalized, listing.clone());
        listing
    }

    /// Forget cached state for a path: its metadata and, if it is a
    /// directory, its listing.
    pub fn invalidate(&self, path: impl AsRef<Path>) {
        let normalized = normalize_lexically(path.as_ref());
        if let Some(item) = self.files.get(&normalized) {
            item.invalidate();
        }
        self.listings.remove(&normalized);
    }

    /// Forget all cached metadata and listings. Interned handles stay valid.
    pub fn invalidate_all(&self) {
        for entry in self.files.iter() {
            entry.value().invalidate();
        }
        self.listings.clear();
    }

    /// Number of interned files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Normalize a path without touching the filesystem: make it absolute
/// against the cwd and fold out `.` and `..` components. Symlinks are left
/// alone on purpose, matching how rule files refer to their own tree.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
