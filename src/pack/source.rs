//! Pack Source Readers
//!
//! Shader-pack storage itself (archives, cache directories) lives outside this
//! crate. The pipeline only needs a way to list files, read them and see their
//! modification times, which [`PackSource`] provides.
//!
//! Two implementations are included:
//!
//! - [`DirectorySource`]: a pack unpacked into a host directory.
//! - [`MemorySource`]: an in-memory pack, used by tests and by hosts that
//!   extract archives themselves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::RwLock;

use super::PackPath;
use crate::errors::{PackError, Result};

/// Read access to a pack's file tree.
pub trait PackSource: Send + Sync {
    /// Stable identity of this pack, used as a cache key.
    fn identity(&self) -> String;

    /// Every file in the pack, sorted by path.
    fn list_files(&self) -> Result<Vec<PackPath>>;

    /// Reads a file as UTF-8 text (invalid sequences are replaced).
    fn read_to_string(&self, path: &PackPath) -> Result<String>;

    fn exists(&self, path: &PackPath) -> bool;

    /// Last modification time of a file.
    fn modified(&self, path: &PackPath) -> Result<SystemTime>;

    /// Newest modification time among `paths`, or `UNIX_EPOCH` when empty.
    fn newest_modification(&self, paths: &[PackPath]) -> Result<SystemTime> {
        let mut newest = SystemTime::UNIX_EPOCH;
        for path in paths {
            newest = newest.max(self.modified(path)?);
        }
        Ok(newest)
    }
}

// ============================================================================
// DirectorySource
// ============================================================================

/// A pack stored as a plain directory on the host filesystem.
pub struct DirectorySource {
    root_path: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(PackError::InvalidPath(format!(
                "pack root is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self {
            root_path: root.to_path_buf(),
        })
    }

    #[inline]
    #[must_use]
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PackPath>) -> Result<()> {
        let entries = std::fs::read_dir(dir).map_err(|e| PackError::io(dir.display(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| PackError::io(dir.display(), e))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|e| PackError::io(path.display(), e))?;
            if file_type.is_dir() {
                self.walk(&path, out)?;
            } else if file_type.is_file() {
                match PackPath::from_fs_path(&self.root_path, &path) {
                    Some(p) => out.push(p),
                    None => log::debug!("Skipping non-UTF-8 path {}", path.display()),
                }
            }
        }
        Ok(())
    }
}

impl PackSource for DirectorySource {
    fn identity(&self) -> String {
        self.root_path.display().to_string()
    }

    fn list_files(&self) -> Result<Vec<PackPath>> {
        let mut files = Vec::new();
        self.walk(&self.root_path, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn read_to_string(&self, path: &PackPath) -> Result<String> {
        let fs_path = path.to_fs_path(&self.root_path);
        let bytes = std::fs::read(&fs_path).map_err(|e| PackError::io(path, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn exists(&self, path: &PackPath) -> bool {
        path.to_fs_path(&self.root_path).is_file()
    }

    fn modified(&self, path: &PackPath) -> Result<SystemTime> {
        let fs_path = path.to_fs_path(&self.root_path);
        std::fs::metadata(&fs_path)
            .and_then(|m| m.modified())
            .map_err(|e| PackError::io(path, e))
    }
}

// ============================================================================
// MemorySource
// ============================================================================

struct MemoryFile {
    text: String,
    modified: SystemTime,
}

/// An in-memory pack. Thread-safe; files can be replaced while in use.
pub struct MemorySource {
    name: String,
    files: RwLock<BTreeMap<PackPath, MemoryFile>>,
}

impl MemorySource {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: RwLock::default(),
        }
    }

    /// Builds a pack from `(path, text)` pairs.
    #[must_use]
    pub fn from_files<'a>(name: impl Into<String>, files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let source = Self::new(name);
        for (path, text) in files {
            source.insert(path, text);
        }
        source
    }

    /// Adds or replaces a file, stamping it with the current time.
    pub fn insert(&self, path: &str, text: &str) {
        self.insert_with_time(path, text, SystemTime::now());
    }

    pub fn insert_with_time(&self, path: &str, text: &str, modified: SystemTime) {
        self.files.write().insert(
            PackPath::new(path),
            MemoryFile {
                text: text.to_string(),
                modified,
            },
        );
    }

    pub fn remove(&self, path: &str) -> bool {
        self.files.write().remove(&PackPath::new(path)).is_some()
    }
}

impl PackSource for MemorySource {
    fn identity(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn list_files(&self) -> Result<Vec<PackPath>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn read_to_string(&self, path: &PackPath) -> Result<String> {
        self.files
            .read()
            .get(path)
            .map(|f| f.text.clone())
            .ok_or_else(|| {
                PackError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such file in memory pack"),
                )
            })
    }

    fn exists(&self, path: &PackPath) -> bool {
        self.files.read().contains_key(path)
    }

    fn modified(&self, path: &PackPath) -> Result<SystemTime> {
        self.files
            .read()
            .get(path)
            .map(|f| f.modified)
            .ok_or_else(|| {
                PackError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such file in memory pack"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_listing_is_sorted() {
        let source = MemorySource::from_files("t", [("/b.fsh", "b"), ("/a.vsh", "a"), ("lib/c.glsl", "c")]);
        let files = source.list_files().unwrap();
        let names: Vec<_> = files.iter().map(PackPath::as_str).collect();
        assert_eq!(names, ["/a.vsh", "/b.fsh", "/lib/c.glsl"]);
        assert_eq!(source.read_to_string(&PackPath::new("/lib/c.glsl")).unwrap(), "c");
        assert!(!source.exists(&PackPath::new("/missing.glsl")));
    }

    #[test]
    fn test_directory_source_walks_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("a.fsh"), "void main() {}").unwrap();
        std::fs::write(dir.path().join("lib/b.glsl"), "float b;").unwrap();

        let source = DirectorySource::new(dir.path()).unwrap();
        let files = source.list_files().unwrap();
        assert_eq!(files, vec![PackPath::new("/a.fsh"), PackPath::new("/lib/b.glsl")]);
        assert_eq!(
            source.read_to_string(&PackPath::new("/lib/b.glsl")).unwrap(),
            "float b;"
        );
        assert!(source.modified(&PackPath::new("/a.fsh")).is_ok());
    }
}
