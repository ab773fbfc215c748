//! Compilation and translation caches.
//!
//! Both caches are plain objects owned by a session (see
//! [`SessionCaches`](crate::pipeline::SessionCaches)); nothing here is
//! process-global. Reads and writes may interleave from any thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_128;

use crate::backend::{CompileRequest, Payload};
use crate::modernize::{ModernizeProfile, Modernized};
use crate::pack::{PackPath, ShaderStage};
use crate::settings::{CompileMode, OutputKind};

// ─── Compilation ──────────────────────────────────────────────────────────────

/// Everything a compiled payload depends on.
///
/// The source is identified by its xxh3-128 hash and the macro set by
/// [`MacroSet::compute_hash`](crate::preprocess::MacroSet::compute_hash); an
/// absent macro set hashes as 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub filename: String,
    pub stage: ShaderStage,
    pub output: OutputKind,
    pub mode: CompileMode,
    pub source_hash: u128,
    pub macro_hash: u64,
}

impl CacheKey {
    #[must_use]
    pub fn for_request(request: &CompileRequest<'_>) -> Self {
        Self {
            filename: request.filename.to_string(),
            stage: request.stage,
            output: request.output,
            mode: request.mode,
            source_hash: xxh3_128(request.source.as_bytes()),
            macro_hash: request.macros.map_or(0, |m| m.compute_hash()),
        }
    }
}

/// A successful compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationResult {
    pub payload: Arc<Payload>,
    pub filename: String,
    pub stage: ShaderStage,
    /// `true` when this result was served from the cache.
    pub cache_hit: bool,
    /// Warnings the pipeline produced on the way, one per line.
    pub diagnostics: String,
}

/// Memoized compile results. Unbounded, in-memory, explicitly clearable.
///
/// Only successful compiles are stored.
#[derive(Debug, Default)]
pub struct CompilationCache {
    entries: RwLock<FxHashMap<CacheKey, CompilationResult>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CompilationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `key`. A hit comes back with `cache_hit` set.
    pub fn get(&self, key: &CacheKey) -> Option<CompilationResult> {
        let found = self.entries.read().get(key).cloned();
        match found {
            Some(mut result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                result.cache_hit = true;
                Some(result)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: CacheKey, mut result: CompilationResult) {
        result.cache_hit = false;
        self.entries.write().insert(key, result);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Drops every entry and resets the counters.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

// ─── Translation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TranslationKey {
    pack: String,
    file: PackPath,
    stage: ShaderStage,
    profile: ModernizeProfile,
    source_hash: u128,
}

/// Memoized modernizer output, keyed by pack identity, file, stage,
/// modernizer profile and the hash of the preprocessed text.
///
/// Packs with different settings may share one cache.
#[derive(Debug, Default)]
pub struct TranslationCache {
    entries: RwLock<FxHashMap<TranslationKey, Arc<Modernized>>>,
}

impl TranslationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached translation or runs `translate` and stores it.
    pub fn get_or_translate(
        &self,
        pack: &str,
        file: &PackPath,
        stage: ShaderStage,
        profile: ModernizeProfile,
        source: &str,
        translate: impl FnOnce() -> Modernized,
    ) -> Arc<Modernized> {
        let key = TranslationKey {
            pack: pack.to_owned(),
            file: file.clone(),
            stage,
            profile,
            source_hash: xxh3_128(source.as_bytes()),
        };
        if let Some(hit) = self.entries.read().get(&key) {
            return Arc::clone(hit);
        }
        let translated = Arc::new(translate());
        Arc::clone(self.entries.write().entry(key).or_insert(translated))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modernize::ModernizeReport;
    use crate::preprocess::MacroSet;
    use crate::settings::{IncludeMode, PipelineSettings};

    fn request<'a>(source: &'a str, macros: Option<&'a MacroSet>) -> CompileRequest<'a> {
        CompileRequest {
            filename: "/a.fsh",
            source,
            stage: ShaderStage::Fragment,
            mode: CompileMode::Optimized,
            output: OutputKind::Binary,
            macros,
        }
    }

    #[test]
    fn test_key_covers_source_and_macros() {
        let mut macros = MacroSet::new();
        macros.set("FOO", "1");
        let base = CacheKey::for_request(&request("void main() {}", None));
        assert_eq!(base, CacheKey::for_request(&request("void main() {}", None)));
        assert_ne!(base, CacheKey::for_request(&request("void main() { }", None)));
        assert_ne!(base, CacheKey::for_request(&request("void main() {}", Some(&macros))));
    }

    #[test]
    fn test_hit_sets_flag_and_counts() {
        let cache = CompilationCache::new();
        let key = CacheKey::for_request(&request("x", None));
        assert!(cache.get(&key).is_none());
        cache.insert(
            key.clone(),
            CompilationResult {
                payload: Arc::new(Payload::Binary(vec![1, 2])),
                filename: "/a.fsh".into(),
                stage: ShaderStage::Fragment,
                cache_hit: false,
                diagnostics: String::new(),
            },
        );
        let hit = cache.get(&key).unwrap();
        assert!(hit.cache_hit);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.hits(), 0);
    }

    fn translated() -> Modernized {
        Modernized {
            text: "out".into(),
            report: ModernizeReport::default(),
        }
    }

    #[test]
    fn test_translation_runs_once() {
        let cache = TranslationCache::new();
        let file = PackPath::new("/a.fsh");
        let profile = ModernizeProfile::of(&PipelineSettings::default());
        let mut runs = 0;
        for _ in 0..2 {
            cache.get_or_translate("pack", &file, ShaderStage::Fragment, profile, "src", || {
                runs += 1;
                translated()
            });
        }
        assert_eq!(runs, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_translation_key_covers_pack_and_profile() {
        let cache = TranslationCache::new();
        let file = PackPath::new("/a.fsh");
        let base = ModernizeProfile::of(&PipelineSettings::default());
        let lower = ModernizeProfile {
            version_floor: 330,
            ..base
        };
        let callback = ModernizeProfile {
            include_mode: IncludeMode::Callback,
            ..base
        };
        let mut runs = 0;
        for (pack, profile) in [("a", base), ("b", base), ("a", lower), ("a", callback), ("a", base)] {
            cache.get_or_translate(pack, &file, ShaderStage::Fragment, profile, "src", || {
                runs += 1;
                translated()
            });
        }
        assert_eq!(runs, 4);
        assert_eq!(cache.len(), 4);
    }
}
