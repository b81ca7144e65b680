//! Sources of resource files.
//!
//! A [`FileLoader`] enumerates the files it can supply and reads them on
//! request. The cache merges the file lists of all its loaders; when two
//! loaders offer the same name, the one with the newer time stamp wins.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::identifier::Identifier;

// ---------------------------------------------------------------------------
// TimeStamp
// ---------------------------------------------------------------------------

/// File modification time, in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TimeStamp(pub u64);

impl TimeStamp {
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        Self(since_epoch.as_nanos().min(u64::MAX as u128) as u64)
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }
}

/// A file offered by a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: Identifier,
    pub time_stamp: TimeStamp,
}

// ---------------------------------------------------------------------------
// FileLoader
// ---------------------------------------------------------------------------

/// Supplies resource file contents to a [`ResourceCache`](crate::ResourceCache).
pub trait FileLoader: Send + Sync {
    /// Human-readable name, used in log messages.
    fn name(&self) -> &str;

    /// Every file this loader can currently supply.
    fn available_files(&self) -> io::Result<Vec<FileInfo>>;

    fn file_exists(&self, file: &Identifier) -> bool;

    /// Size of `file` in bytes.
    fn file_size(&self, file: &Identifier) -> io::Result<u64>;

    fn file_time_stamp(&self, file: &Identifier) -> io::Result<TimeStamp>;

    /// Read the whole of `file`.
    fn load_file(&self, file: &Identifier) -> io::Result<Vec<u8>>;
}

fn not_found(file: &Identifier, loader: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("'{file}' is not available from loader '{loader}'"),
    )
}

// ---------------------------------------------------------------------------
// DirectoryLoader
// ---------------------------------------------------------------------------

/// Loads files from a directory tree on disk.
///
/// File names are paths relative to the root directory, with forward
/// slashes as separators.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
    name: String,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root.display().to_string();
        Self { root, name }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, file: &Identifier) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(file.as_str().split('/'));
        path
    }

    fn relative_name(&self, path: &Path) -> Option<Identifier> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(Identifier::from(parts.join("/")))
    }

    /// Index record for the file at `path`, or `None` (with a warning) if it
    /// cannot be indexed.
    fn file_info(&self, path: &Path, modified: io::Result<SystemTime>) -> Option<FileInfo> {
        let Some(name) = self.relative_name(path) else {
            tracing::warn!(loader = %self.name, path = %path.display(), "skipping file with non-UTF-8 path");
            return None;
        };
        let modified = match modified {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!(loader = %self.name, file = %name, error = %e, "skipping file without modification time");
                return None;
            }
        };
        tracing::trace!(loader = %self.name, file = %name, "indexed file");
        Some(FileInfo {
            name,
            time_stamp: TimeStamp::from_system_time(modified),
        })
    }
}

impl FileLoader for DirectoryLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn available_files(&self) -> io::Result<Vec<FileInfo>> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("'{}' is not a directory", self.root.display()),
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(loader = %self.name, error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let modified = entry
                .metadata()
                .map_err(io::Error::from)
                .and_then(|metadata| metadata.modified());
            files.extend(self.file_info(entry.path(), modified));
        }
        Ok(files)
    }

    fn file_exists(&self, file: &Identifier) -> bool {
        self.path_of(file).is_file()
    }

    fn file_size(&self, file: &Identifier) -> io::Result<u64> {
        Ok(fs::metadata(self.path_of(file))?.len())
    }

    fn file_time_stamp(&self, file: &Identifier) -> io::Result<TimeStamp> {
        let modified = fs::metadata(self.path_of(file))?.modified()?;
        Ok(TimeStamp::from_system_time(modified))
    }

    fn load_file(&self, file: &Identifier) -> io::Result<Vec<u8>> {
        fs::read(self.path_of(file))
    }
}

// ---------------------------------------------------------------------------
// MemoryFileLoader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    time_stamp: TimeStamp,
}

/// Serves files from memory. Contents can be replaced at runtime, which makes
/// it useful for embedded assets and for exercising hot reload.
#[derive(Debug, Default)]
pub struct MemoryFileLoader {
    name: String,
    files: RwLock<BTreeMap<Identifier, MemoryFile>>,
}

impl MemoryFileLoader {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add or replace a file.
    pub fn insert(&self, file: impl Into<Identifier>, data: impl Into<Vec<u8>>, time_stamp: TimeStamp) {
        self.files.write().insert(
            file.into(),
            MemoryFile {
                data: data.into(),
                time_stamp,
            },
        );
    }

    /// Remove a file. Returns whether it existed.
    pub fn remove(&self, file: &str) -> bool {
        self.files.write().remove(file).is_some()
    }

    /// Change a file's time stamp without changing its contents.
    pub fn touch(&self, file: &str, time_stamp: TimeStamp) -> bool {
        match self.files.write().get_mut(file) {
            Some(f) => {
                f.time_stamp = time_stamp;
                true
            }
            None => false,
        }
    }
}

impl FileLoader for MemoryFileLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn available_files(&self) -> io::Result<Vec<FileInfo>> {
        Ok(self
            .files
            .read()
            .iter()
            .map(|(name, f)| FileInfo {
                name: name.clone(),
                time_stamp: f.time_stamp,
            })
            .collect())
    }

    fn file_exists(&self, file: &Identifier) -> bool {
        self.files.read().contains_key(file)
    }

    fn file_size(&self, file: &Identifier) -> io::Result<u64> {
        self.files
            .read()
            .get(file)
            .map(|f| f.data.len() as u64)
            .ok_or_else(|| not_found(file, &self.name))
    }

    fn file_time_stamp(&self, file: &Identifier) -> io::Result<TimeStamp> {
        self.files
            .read()
            .get(file)
            .map(|f| f.time_stamp)
            .ok_or_else(|| not_found(file, &self.name))
    }

    fn load_file(&self, file: &Identifier) -> io::Result<Vec<u8>> {
        self.files
            .read()
            .get(file)
            .map(|f| f.data.clone())
            .ok_or_else(|| not_found(file, &self.name))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_loader_lists_and_loads() {
        let loader = MemoryFileLoader::new("mem");
        loader.insert("a.txt", "alpha", TimeStamp(1));
        loader.insert("dir/b.txt", b"beta".to_vec(), TimeStamp(2));

        let mut files = loader.available_files().unwrap();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].name.as_str(), "dir/b.txt");
        assert_eq!(files[1].time_stamp, TimeStamp(2));

        let id = Identifier::from("a.txt");
        assert!(loader.file_exists(&id));
        assert_eq!(loader.file_size(&id).unwrap(), 5);
        assert_eq!(loader.load_file(&id).unwrap(), b"alpha");
    }

    #[test]
    fn memory_loader_touch_and_remove() {
        let loader = MemoryFileLoader::new("mem");
        loader.insert("a", "x", TimeStamp(1));
        assert!(loader.touch("a", TimeStamp(5)));
        assert_eq!(loader.file_time_stamp(&"a".into()).unwrap(), TimeStamp(5));
        assert!(loader.remove("a"));
        assert!(!loader.remove("a"));
        assert_eq!(
            loader.load_file(&"a".into()).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn directory_loader_walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("top.txt"), "top").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("nested.txt"), "nested").unwrap();

        let loader = DirectoryLoader::new(dir.path());
        let mut names: Vec<String> = loader
            .available_files()
            .unwrap()
            .into_iter()
            .map(|f| f.name.to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["sub/nested.txt", "top.txt"]);

        let nested = Identifier::from("sub/nested.txt");
        assert!(loader.file_exists(&nested));
        assert_eq!(loader.file_size(&nested).unwrap(), 6);
        assert_eq!(loader.load_file(&nested).unwrap(), b"nested");
        assert!(loader.file_time_stamp(&nested).unwrap() > TimeStamp(0));
    }

    #[test]
    fn unindexable_files_are_skipped_individually() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.txt"), "good").unwrap();
        let loader = DirectoryLoader::new(dir.path());

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "no metadata");
        assert!(loader.file_info(&dir.path().join("bad.txt"), Err(denied)).is_none());
        let info = loader
            .file_info(&dir.path().join("good.txt"), Ok(UNIX_EPOCH + Duration::from_secs(1)))
            .unwrap();
        assert_eq!(info.name.as_str(), "good.txt");

        // A dangling link does not hide the rest of the directory.
        #[cfg(unix)]
        std::os::unix::fs::symlink(dir.path().join("gone.txt"), dir.path().join("link.txt")).unwrap();
        let names: Vec<String> = loader
            .available_files()
            .unwrap()
            .into_iter()
            .map(|f| f.name.to_string())
            .collect();
        assert_eq!(names, vec!["good.txt"]);
    }

    #[test]
    fn directory_loader_missing_root_is_an_error() {
        let loader = DirectoryLoader::new("/definitely/not/here");
        assert!(loader.available_files().is_err());
    }
}
