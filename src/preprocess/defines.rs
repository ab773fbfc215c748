//! Macro Table
//!
//! [`MacroSet`] is the preprocessor's name → replacement table and the macro
//! component of compilation cache keys.
//!
//! Entries are kept sorted by name, so two sets holding the same definitions
//! compare and hash equal regardless of the order they were built in.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut macros = MacroSet::new();
//! macros.set("SHADOW_QUALITY", "2");
//! macros.set("BLOOM", "");
//!
//! let key = macros.compute_hash();
//! ```

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Object-like macro definitions, sorted by name.
#[derive(Debug, Clone, Default)]
pub struct MacroSet {
    defines: Vec<(String, String)>,
}

impl MacroSet {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            defines: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            defines: Vec::with_capacity(capacity),
        }
    }

    fn position(&self, name: &str) -> std::result::Result<usize, usize> {
        self.defines
            .binary_search_by(|(k, _)| k.as_str().cmp(name))
    }

    /// Defines or redefines `name`.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Ok(idx) => value.clone_into(&mut self.defines[idx].1),
            Err(idx) => self.defines.insert(idx, (name.to_string(), value.to_string())),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        if let Ok(idx) = self.position(name) {
            self.defines.remove(idx);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_ok()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .ok()
            .map(|idx| self.defines[idx].1.as_str())
    }

    #[inline]
    pub fn clear(&mut self) {
        self.defines.clear();
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.defines.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    /// Definitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.defines.iter().cloned().collect()
    }

    /// Copies every definition of `other` into `self`; `other` wins on conflict.
    pub fn merge(&mut self, other: &MacroSet) {
        for (name, value) in &other.defines {
            self.set(name, value);
        }
    }

    #[must_use]
    pub fn merged_with(&self, other: &MacroSet) -> MacroSet {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Content hash, used as the macro component of cache keys.
    #[must_use]
    pub fn compute_hash(&self) -> u64 {
        use std::hash::BuildHasher;

        rustc_hash::FxBuildHasher.hash_one(self)
    }

    /// Renders the set as `#define` lines, one per entry.
    #[must_use]
    pub fn to_directives(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.defines {
            out.push_str("#define ");
            out.push_str(name);
            if !value.is_empty() {
                out.push(' ');
                out.push_str(value);
            }
            out.push('\n');
        }
        out
    }
}

impl Hash for MacroSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.defines.hash(state);
    }
}

impl PartialEq for MacroSet {
    fn eq(&self, other: &Self) -> bool {
        self.defines == other.defines
    }
}

impl Eq for MacroSet {}

impl From<&[(&str, &str)]> for MacroSet {
    fn from(defines: &[(&str, &str)]) -> Self {
        let mut result = Self::with_capacity(defines.len());
        for (k, v) in defines {
            result.set(k, v);
        }
        result
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for MacroSet {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut result = Self::new();
        for (k, v) in iter {
            result.set(k, v);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut macros = MacroSet::new();
        macros.set("BLOOM", "");
        macros.set("SHADOW_QUALITY", "2");

        assert!(macros.contains("BLOOM"));
        assert!(!macros.contains("FOG"));
        assert_eq!(macros.get("SHADOW_QUALITY"), Some("2"));

        macros.set("SHADOW_QUALITY", "1");
        assert_eq!(macros.get("SHADOW_QUALITY"), Some("1"));
        assert_eq!(macros.len(), 2);
    }

    #[test]
    fn test_sorted_by_name() {
        let macros: MacroSet = [("C", "1"), ("A", "1"), ("B", "1")].into_iter().collect();
        let names: Vec<_> = macros.iter().map(|(k, _)| k).collect();
        assert_eq!(names, ["A", "B", "C"]);
    }

    #[test]
    fn test_merge() {
        let mut a = MacroSet::from(&[("A", "1"), ("B", "2")][..]);
        let b = MacroSet::from(&[("B", "3"), ("C", "4")][..]);
        a.merge(&b);
        assert_eq!(a.get("A"), Some("1"));
        assert_eq!(a.get("B"), Some("3")); // Overwritten
        assert_eq!(a.get("C"), Some("4"));
    }

    #[test]
    fn test_hash_consistency() {
        let d1 = MacroSet::from(&[("A", "1"), ("B", "2")][..]);
        let d2 = MacroSet::from(&[("B", "2"), ("A", "1")][..]);
        assert_eq!(d1, d2);
        assert_eq!(d1.compute_hash(), d2.compute_hash());
    }

    #[test]
    fn test_to_directives() {
        let macros = MacroSet::from(&[("FOO", ""), ("BAR", "2")][..]);
        assert_eq!(macros.to_directives(), "#define BAR 2\n#define FOO\n");
    }
}
