//! Pack-rooted virtual paths.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A normalized, slash-separated absolute path rooted at the pack root.
///
/// Invariants: always starts with `/`, never ends with `/` (except the root
/// itself), contains no empty, `.` or `..` segments. `..` above the root is
/// clamped to the root. Equality is equality of the normalized string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackPath(String);

impl PackPath {
    /// The pack root, `/`.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Normalizes `path` as an absolute pack path. A missing leading slash is
    /// implied and backslashes are treated as separators.
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self::root().join_normalized(path)
    }

    fn join_normalized(&self, tail: &str) -> Self {
        let mut segments: Vec<&str> = self.segments().collect();
        for part in tail.split(['/', '\\']) {
            match part {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        Self::from_segments(&segments)
    }

    fn from_segments(segments: &[&str]) -> Self {
        let mut s = String::with_capacity(segments.iter().map(|p| p.len() + 1).sum::<usize>() + 1);
        for seg in segments {
            s.push('/');
            s.push_str(seg);
        }
        if s.is_empty() {
            s.push('/');
        }
        Self(s)
    }

    /// Resolves `target` against this path treated as a **directory**.
    ///
    /// A leading slash makes `target` absolute (resolved from the pack root).
    #[must_use]
    pub fn resolve(&self, target: &str) -> Self {
        if target.starts_with('/') || target.starts_with('\\') {
            Self::new(target)
        } else {
            self.join_normalized(target)
        }
    }

    /// Resolves `target` the way an include directive in this **file** does:
    /// relative to the file's directory, or from the root when absolute.
    #[must_use]
    pub fn resolve_sibling(&self, target: &str) -> Self {
        self.parent().unwrap_or_else(Self::root).resolve(target)
    }

    /// The containing directory, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let segments: Vec<&str> = self.segments().collect();
        Some(Self::from_segments(&segments[..segments.len() - 1]))
    }

    /// The last segment, or `None` for the root.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.segments().next_back()
    }

    /// Extension of the last segment, without the dot.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        let name = self.filename()?;
        let (stem, ext) = name.rsplit_once('.')?;
        (!stem.is_empty()).then_some(ext)
    }

    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the path's segments, root first.
    pub fn segments(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Returns `true` if `self` equals `dir` or lives below it.
    #[must_use]
    pub fn starts_with(&self, dir: &PackPath) -> bool {
        dir.is_root()
            || self.0 == dir.0
            || (self.0.starts_with(&dir.0) && self.0.as_bytes().get(dir.0.len()) == Some(&b'/'))
    }

    /// Maps this pack path onto a host directory.
    #[must_use]
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for seg in self.segments() {
            out.push(seg);
        }
        out
    }

    /// Maps a host path below `root` into the pack. Returns `None` when `path`
    /// is outside `root`.
    #[must_use]
    pub fn from_fs_path(root: &Path, path: &Path) -> Option<Self> {
        let rel = path.strip_prefix(root).ok()?;
        let mut segments = Vec::new();
        for comp in rel.components() {
            match comp {
                Component::Normal(s) => segments.push(s.to_str()?.to_string()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
        Some(Self::from_segments(&refs))
    }
}

impl Default for PackPath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for PackPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for PackPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
