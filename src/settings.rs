//! Pipeline Settings
//!
//! This module defines the configuration of the source-to-bytecode pipeline.
//!
//! The central type is [`PipelineSettings`]. Every field has a sensible default,
//! so a settings file only needs to name the values it changes.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use shaderpack::settings::{IncludeMode, PipelineSettings};
//!
//! // Defaults: flatten includes, #version 450 floor, optimized binary output
//! let settings = PipelineSettings::default();
//!
//! // Keep #include directives and let the backend resolve them
//! let settings = PipelineSettings {
//!     include_mode: IncludeMode::Callback,
//!     ..Default::default()
//! };
//!
//! // Or from JSON
//! let settings = PipelineSettings::from_json_str(r#"{ "version_floor": 460 }"#)?;
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PackError, Result};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// How `#include` directives reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncludeMode {
    /// Every include is inlined before preprocessing; the backend sees one
    /// self-contained text.
    #[default]
    Flatten,
    /// Include directives are kept verbatim and resolved through the
    /// backend's include callback.
    ///
    /// Included files reach the backend as written: they are neither
    /// preprocessed nor modernized, and option locking does not apply to
    /// them. A `#define BLOOM` inside an included file defines `BLOOM` even
    /// when the user disabled it; the option macros are only handed to the
    /// backend alongside the main file.
    Callback,
}

/// Backend compilation mode. Part of the compilation cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileMode {
    /// Keep debug information in the output.
    Debug,
    /// Strip debug information.
    #[default]
    Optimized,
}

/// Kind of payload the backend produces. Part of the compilation cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Portable binary bytecode.
    #[default]
    Binary,
    /// A backend-specific textual form, useful for inspection.
    Text,
}

// ---------------------------------------------------------------------------
// CircuitBreakerSettings
// ---------------------------------------------------------------------------

/// Thresholds after which a batch stops compiling.
///
/// A batch aborts only when **both** thresholds are crossed: at least
/// `min_failures` files failed and the failed share of processed files is at
/// least `failure_ratio`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub min_failures: usize,
    pub failure_ratio: f64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            min_failures: 8,
            failure_ratio: 0.5,
        }
    }
}

impl CircuitBreakerSettings {
    /// Returns `true` when the batch must stop.
    #[must_use]
    pub fn should_trip(&self, failed: usize, processed: usize) -> bool {
        if processed == 0 || failed < self.min_failures {
            return false;
        }
        (failed as f64 / processed as f64) >= self.failure_ratio
    }
}

// ---------------------------------------------------------------------------
// PipelineSettings
// ---------------------------------------------------------------------------

/// Configuration shared by every stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Lowest `#version` the modernizer emits.
    pub version_floor: u32,
    pub include_mode: IncludeMode,
    pub compile_mode: CompileMode,
    pub output_kind: OutputKind,
    /// Fixed constants every file is preprocessed with.
    pub platform_defines: Vec<(String, String)>,
    /// `const` declarations with these names are discoverable as options.
    pub tunable_constants: Vec<String>,
    /// Extensions (without the dot) of files that belong to the shader tree.
    pub shader_extensions: Vec<String>,
    /// Directory names whose contents are include-only.
    pub library_dirs: Vec<String>,
    /// File names that are include-only wherever they live.
    pub include_only_names: Vec<String>,
    /// Extra pack directories searched by the include callback.
    pub extra_include_roots: Vec<String>,
    /// Files larger than this are skipped by batch validation.
    pub max_source_bytes: usize,
    pub circuit_breaker: CircuitBreakerSettings,
    /// Number of files compiled between two pauses.
    pub batch_group_size: usize,
    /// Length of the pause inserted after each group.
    pub batch_pause_ms: u64,
    /// Gather loose non-opaque uniforms into one generated block.
    pub wrap_loose_uniforms: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            version_floor: 450,
            include_mode: IncludeMode::Flatten,
            compile_mode: CompileMode::Optimized,
            output_kind: OutputKind::Binary,
            platform_defines: vec![
                ("SHADERPACK".to_string(), "1".to_string()),
                ("VULKAN".to_string(), "1".to_string()),
            ],
            tunable_constants: [
                "shadowMapResolution",
                "shadowDistance",
                "shadowDistanceRenderMul",
                "shadowIntervalSize",
                "generateShadowMipmap",
                "generateShadowColorMipmap",
                "shadowHardwareFiltering",
                "sunPathRotation",
                "ambientOcclusionLevel",
                "eyeBrightnessHalflife",
                "centerDepthHalflife",
                "wetnessHalflife",
                "drynessHalflife",
                "noiseTextureResolution",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            shader_extensions: [
                "vsh", "fsh", "gsh", "csh", "tcs", "tes", "vert", "frag", "geom", "comp", "tesc",
                "tese", "glsl", "inc",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            library_dirs: vec!["lib".to_string()],
            include_only_names: ["common.glsl", "settings.glsl", "uniforms.glsl", "util.glsl"]
                .into_iter()
                .map(String::from)
                .collect(),
            extra_include_roots: Vec::new(),
            max_source_bytes: 512 * 1024,
            circuit_breaker: CircuitBreakerSettings::default(),
            batch_group_size: 8,
            batch_pause_ms: 5,
            wrap_loose_uniforms: true,
        }
    }
}

impl PipelineSettings {
    /// Parses settings from JSON. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| PackError::io(path.display(), e))?;
        Self::from_json_str(&text)
    }

    /// Serializes the settings as pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[inline]
    #[must_use]
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    /// Returns `true` if `ext` names a shader-tree file.
    #[must_use]
    pub fn is_shader_extension(&self, ext: &str) -> bool {
        self.shader_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
    }

    #[must_use]
    pub fn is_tunable_constant(&self, name: &str) -> bool {
        self.tunable_constants.iter().any(|c| c == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings =
            PipelineSettings::from_json_str(r#"{ "version_floor": 460, "include_mode": "callback" }"#)
                .unwrap();
        assert_eq!(settings.version_floor, 460);
        assert_eq!(settings.include_mode, IncludeMode::Callback);
        assert_eq!(settings.batch_group_size, 8);
        assert!(settings.wrap_loose_uniforms);
    }

    #[test]
    fn test_json_round_trip() {
        let settings = PipelineSettings::default();
        let json = settings.to_json_string().unwrap();
        assert_eq!(PipelineSettings::from_json_str(&json).unwrap(), settings);
    }

    #[test]
    fn test_circuit_breaker_requires_both_thresholds() {
        let breaker = CircuitBreakerSettings {
            min_failures: 3,
            failure_ratio: 0.5,
        };
        // Ratio crossed, count not.
        assert!(!breaker.should_trip(2, 2));
        // Count crossed, ratio not.
        assert!(!breaker.should_trip(3, 10));
        assert!(breaker.should_trip(3, 6));
    }
}
