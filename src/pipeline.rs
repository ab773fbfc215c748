//! Pack Session
//!
//! [`ShaderPack`] ties the stages together for one loaded pack:
//!
//! ```text
//! PackSource ──► IncludeGraph ──► IncludeProcessor (flatten mode)
//!     │                                   │
//!     └──► OptionSet ──► OptionValues ──► Preprocessor ──► Modernizer ──► PreparedShader
//! ```
//!
//! The graph and the option set are rebuilt by [`ShaderPack::refresh`] once
//! any source file is newer than the last build. Caches live in
//! [`SessionCaches`], which the caller creates and may share between packs.
//!
//! # Usage
//!
//! ```rust,ignore
//! let pack = ShaderPack::open(Arc::new(DirectorySource::new(dir)?), settings, SessionCaches::new())?;
//! let mut values = pack.new_values();
//! values.set_choice("SHADOW_QUALITY", "2")?;
//! let prepared = pack.prepare(&PackPath::new("/gbuffers_terrain.fsh"), &values)?;
//! ```

use std::borrow::Cow;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::compile::{CompilationCache, TranslationCache};
use crate::errors::{Diagnostic, PackError, Result};
use crate::include::{IncludeGraph, IncludeProcessor};
use crate::modernize::{ModernizeReport, Modernizer};
use crate::options::{OptionDiscoveryCache, OptionSet, OptionValues};
use crate::pack::{PackPath, PackSource, ShaderStage};
use crate::preprocess::{MacroSet, Preprocessor};
use crate::settings::{IncludeMode, PipelineSettings};

// ============================================================================
// Caches
// ============================================================================

/// Every cache a session uses. Cloning shares the underlying caches.
#[derive(Debug, Clone, Default)]
pub struct SessionCaches {
    pub options: Arc<OptionDiscoveryCache>,
    pub translations: Arc<TranslationCache>,
    pub compilations: Arc<CompilationCache>,
}

impl SessionCaches {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.options.clear();
        self.translations.clear();
        self.compilations.clear();
    }
}

// ============================================================================
// Prepared Shader
// ============================================================================

/// One file, ready for the backend.
#[derive(Debug, Clone)]
pub struct PreparedShader {
    pub file: PackPath,
    pub stage: ShaderStage,
    /// Modernized text.
    pub text: String,
    /// Macros the backend must define itself. Only set in callback include
    /// mode, where included files reach the backend unpreprocessed.
    pub macros: Option<MacroSet>,
    pub diagnostics: Vec<Diagnostic>,
    pub report: ModernizeReport,
}

// ============================================================================
// ShaderPack
// ============================================================================

#[derive(Clone)]
struct PackState {
    graph: Arc<IncludeGraph>,
    processor: Arc<IncludeProcessor>,
    options: Arc<OptionSet>,
    stamp: SystemTime,
    file_count: usize,
}

/// A loaded pack with its include graph and discovered options.
pub struct ShaderPack {
    source: Arc<dyn PackSource>,
    settings: PipelineSettings,
    modernizer: Modernizer,
    caches: SessionCaches,
    state: RwLock<PackState>,
}

impl ShaderPack {
    /// Loads the pack: builds the include graph and discovers options.
    ///
    /// # Errors
    ///
    /// [`PackError::GraphCycle`] if any include chain loops; I/O errors on the
    /// pack root.
    pub fn open(
        source: Arc<dyn PackSource>,
        settings: PipelineSettings,
        caches: SessionCaches,
    ) -> Result<Self> {
        let state = Self::load(source.as_ref(), &settings, &caches)?;
        log::info!(
            "Opened pack {}: {} files, {} options",
            source.identity(),
            state.graph.len(),
            state.options.len()
        );
        Ok(Self {
            modernizer: Modernizer::new(&settings),
            source,
            settings,
            caches,
            state: RwLock::new(state),
        })
    }

    fn shader_files(source: &dyn PackSource, settings: &PipelineSettings) -> Result<Vec<PackPath>> {
        Ok(source
            .list_files()?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|e| settings.is_shader_extension(e)))
            .collect())
    }

    fn load(
        source: &dyn PackSource,
        settings: &PipelineSettings,
        caches: &SessionCaches,
    ) -> Result<PackState> {
        let files = Self::shader_files(source, settings)?;
        let stamp = source.newest_modification(&files)?;
        let graph = Arc::new(IncludeGraph::build_pack(source, settings)?);
        let options = caches.options.get_or_discover(source, settings)?;
        Ok(PackState {
            processor: Arc::new(IncludeProcessor::new(Arc::clone(&graph))),
            graph,
            options,
            stamp,
            file_count: files.len(),
        })
    }

    /// Rebuilds graph and options if any file changed since the last build.
    /// Returns `true` when a rebuild happened.
    pub fn refresh(&self) -> Result<bool> {
        let files = Self::shader_files(self.source.as_ref(), &self.settings)?;
        let newest = self.source.newest_modification(&files)?;
        {
            let state = self.state.read();
            if newest <= state.stamp && files.len() == state.file_count {
                return Ok(false);
            }
        }
        let state = Self::load(self.source.as_ref(), &self.settings, &self.caches)?;
        log::debug!("Reloaded pack {}", self.source.identity());
        *self.state.write() = state;
        Ok(true)
    }

    #[inline]
    #[must_use]
    pub fn source(&self) -> &dyn PackSource {
        self.source.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn caches(&self) -> &SessionCaches {
        &self.caches
    }

    #[must_use]
    pub fn graph(&self) -> Arc<IncludeGraph> {
        Arc::clone(&self.state.read().graph)
    }

    #[must_use]
    pub fn options(&self) -> Arc<OptionSet> {
        Arc::clone(&self.state.read().options)
    }

    /// All-default values bound to the current option set.
    #[must_use]
    pub fn new_values(&self) -> OptionValues {
        OptionValues::new(self.options())
    }

    /// `true` for files that are only ever included: anything under a library
    /// directory or named on the include-only list.
    #[must_use]
    pub fn is_include_only(&self, path: &PackPath) -> bool {
        let settings = &self.settings;
        let in_library = path
            .parent()
            .is_some_and(|dir| dir.segments().any(|s| settings.library_dirs.iter().any(|l| l == s)));
        in_library
            || path
                .filename()
                .is_some_and(|name| settings.include_only_names.iter().any(|n| n == name))
    }

    /// Files a batch compiles: a stage extension and not include-only, in path
    /// order.
    pub fn compilable_files(&self) -> Result<Vec<PackPath>> {
        Ok(self
            .source
            .list_files()?
            .into_iter()
            .filter(|p| p.extension().and_then(ShaderStage::from_extension).is_some())
            .filter(|p| !self.is_include_only(p))
            .collect())
    }

    /// The fully inlined text of `path`.
    pub fn flatten(&self, path: &PackPath) -> Result<Arc<str>> {
        let processor = Arc::clone(&self.state.read().processor);
        processor.flatten(path)
    }

    /// Runs one file through include handling, preprocessing and
    /// modernization.
    ///
    /// Values bound to an older option set are rebound to the current one.
    pub fn prepare(&self, file: &PackPath, values: &OptionValues) -> Result<PreparedShader> {
        let state = self.state.read().clone();
        let node = state
            .graph
            .node(file)
            .ok_or_else(|| PackError::FileNotInGraph(file.clone()))?;

        let text: Arc<str> = match self.settings.include_mode {
            IncludeMode::Flatten => state.processor.flatten(file)?,
            IncludeMode::Callback => Arc::from(node.text()),
        };
        let stage =
            ShaderStage::infer(file, &text).ok_or_else(|| PackError::UnknownStage(file.clone()))?;

        let values = if Arc::ptr_eq(values.option_set(), &state.options) {
            Cow::Borrowed(values)
        } else {
            Cow::Owned(values.rebind(Arc::clone(&state.options)))
        };
        let preprocessor = Preprocessor::new(&self.settings).with_options(&values);
        let preprocessed = preprocessor.process(file.as_str(), &text);

        let modernized = self.caches.translations.get_or_translate(
            &self.source.identity(),
            file,
            stage,
            self.modernizer.profile(),
            &preprocessed.text,
            || self.modernizer.modernize(stage, &preprocessed.text),
        );

        let mut related = state.graph.transitive_includes(file);
        related.push(file.clone());
        let mut diagnostics: Vec<Diagnostic> = state
            .graph
            .warnings()
            .iter()
            .filter(|d| related.iter().any(|p| p.as_str() == d.file))
            .cloned()
            .collect();
        diagnostics.extend(preprocessed.diagnostics);

        Ok(PreparedShader {
            file: file.clone(),
            stage,
            text: modernized.text.clone(),
            macros: (self.settings.include_mode == IncludeMode::Callback)
                .then(|| preprocessor.macros().clone()),
            diagnostics,
            report: modernized.report.clone(),
        })
    }
}

impl std::fmt::Debug for ShaderPack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderPack")
            .field("source", &self.source.identity())
            .field("files", &self.state.read().graph.len())
            .finish_non_exhaustive()
    }
}
