//! Syntax Modernization
//!
//! Converts legacy fixed-function-era GLSL into an explicit-binding dialect
//! through an ordered list of whole-file text passes:
//!
//! 1. [`version`]: raise `#version` to the configured floor
//! 2. [`compat`]: include-mode extension and the default fragment output
//! 3. [`qualifiers`]: `attribute`/`varying` to `in`/`out` with locations
//! 4. [`outputs`]: `gl_FragData[N]` / `gl_FragColor` to declared outputs
//! 5. [`textures`]: legacy sampling functions to their modern names
//! 6. [`builtins`]: built-in matrices and attributes to plain identifiers
//! 7. [`bindings`]: individual bindings for opaque uniforms
//! 8. [`blocks`]: loose non-opaque uniforms wrapped into one std140 block
//!
//! Each pass is a pure transform of the previous pass's output. Rewrites only
//! ever touch code; comment text is left as written.
//!
//! # Descriptor layout
//!
//! All resources live in descriptor set 0. Binding 0 is reserved for the
//! built-in matrix block (`PackMatrices`), opaque uniforms take ascending
//! bindings from 1, and the wrapped `PackUniforms` block takes the next free
//! binding after them.

pub mod bindings;
pub mod blocks;
pub mod builtins;
pub mod compat;
pub mod outputs;
pub mod qualifiers;
pub mod scanner;
pub mod textures;
pub mod version;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::pack::ShaderStage;
use crate::settings::{IncludeMode, PipelineSettings};
use crate::syntax;

use scanner::SlotAllocator;

/// Binding reserved for the built-in matrix block.
pub const MATRIX_BLOCK_BINDING: u32 = 0;

/// What the passes did to one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModernizeReport {
    /// The `#version` the output declares.
    pub version: u32,
    /// Input variables and their assigned locations.
    pub inputs: Vec<(String, u32)>,
    /// Output variables and their assigned locations.
    pub outputs: Vec<(String, u32)>,
    /// Uniforms and blocks and their assigned bindings.
    pub bindings: Vec<(String, u32)>,
    /// Fragment output indices declared for legacy output sentinels.
    pub fragment_outputs: Vec<u32>,
    pub matrix_block: bool,
    /// Uniforms moved into the generated block.
    pub wrapped_uniforms: Vec<String>,
}

/// Output of [`Modernizer::modernize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modernized {
    pub text: String,
    pub report: ModernizeReport,
}

/// One file being rewritten.
pub struct Unit {
    pub stage: ShaderStage,
    pub version_floor: u32,
    pub include_mode: IncludeMode,
    pub wrap_loose_uniforms: bool,
    pub lines: Vec<String>,
    /// End of the header (`#version` plus extensions and generated
    /// declarations); new declarations are inserted here.
    pub header_end: usize,
    pub inputs: SlotAllocator,
    pub outputs: SlotAllocator,
    pub bindings: SlotAllocator,
    /// Fragment output indices already declared.
    pub fragment_outputs: BTreeSet<u32>,
    pub report: ModernizeReport,
}

impl Unit {
    #[must_use]
    pub fn new(stage: ShaderStage, settings: &PipelineSettings, source: &str) -> Self {
        let lines: Vec<String> = source.lines().map(str::to_string).collect();
        let mut bindings = SlotAllocator::starting_at(MATRIX_BLOCK_BINDING + 1);
        bindings.reserve(MATRIX_BLOCK_BINDING, 1);
        Self {
            stage,
            version_floor: settings.version_floor,
            include_mode: settings.include_mode,
            wrap_loose_uniforms: settings.wrap_loose_uniforms,
            header_end: scanner::insertion_point(&lines),
            lines,
            inputs: SlotAllocator::default(),
            outputs: SlotAllocator::default(),
            bindings,
            fragment_outputs: BTreeSet::new(),
            report: ModernizeReport::default(),
        }
    }

    /// Inserts declarations at the end of the header, after anything inserted
    /// before.
    pub fn insert_header(&mut self, declarations: impl IntoIterator<Item = String>) {
        let at = self.header_end.min(self.lines.len());
        let new: Vec<String> = declarations.into_iter().collect();
        self.header_end = at + new.len();
        self.lines.splice(at..at, new);
    }

    /// Applies `rewrite` to the code of every line.
    pub fn map_code(&mut self, mut rewrite: impl FnMut(&str) -> String) {
        let mut in_block = false;
        for line in &mut self.lines {
            let rewritten = syntax::rewrite_code(line.as_str(), &mut in_block, &mut rewrite);
            if rewritten != *line {
                *line = rewritten;
            }
        }
    }

    /// `true` if `name` appears as an identifier in code.
    #[must_use]
    pub fn references(&self, name: &str) -> bool {
        scanner::analyze(&self.lines)
            .iter()
            .any(|l| syntax::contains_identifier(&l.code, name))
    }

    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

type Pass = fn(&mut Unit);

/// The passes, in order.
const PASSES: &[(&str, Pass)] = &[
    ("version", version::run),
    ("compat", compat::run),
    ("qualifiers", qualifiers::run),
    ("outputs", outputs::run),
    ("textures", textures::run),
    ("builtins", builtins::run),
    ("bindings", bindings::run),
    ("blocks", blocks::run),
];

/// Runs the rewrite passes with a fixed configuration.
#[derive(Debug, Clone)]
pub struct Modernizer {
    settings: PipelineSettings,
}

/// The settings a [`Modernizer`] reads. Equal profiles produce equal output
/// for equal input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModernizeProfile {
    pub version_floor: u32,
    pub include_mode: IncludeMode,
    pub wrap_loose_uniforms: bool,
}

impl ModernizeProfile {
    #[must_use]
    pub fn of(settings: &PipelineSettings) -> Self {
        Self {
            version_floor: settings.version_floor,
            include_mode: settings.include_mode,
            wrap_loose_uniforms: settings.wrap_loose_uniforms,
        }
    }
}

impl Modernizer {
    #[must_use]
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    #[must_use]
    pub fn profile(&self) -> ModernizeProfile {
        ModernizeProfile::of(&self.settings)
    }

    /// Rewrites one file's preprocessed text.
    #[must_use]
    pub fn modernize(&self, stage: ShaderStage, source: &str) -> Modernized {
        let mut unit = Unit::new(stage, &self.settings, source);
        for (name, pass) in PASSES {
            pass(&mut unit);
            log::trace!("modernize pass {name} done ({} lines)", unit.lines.len());
        }
        Modernized {
            text: unit.text(),
            report: unit.report,
        }
    }
}
