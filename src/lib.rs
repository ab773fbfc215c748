#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! Legacy GLSL shader packs to portable bytecode.
//!
//! A pack is a directory of GLSL-family sources written against the old
//! fixed-function dialect. This crate discovers the options a pack exposes,
//! resolves its includes, preprocesses each file with the user's option
//! values, rewrites it into an explicit-binding dialect and hands it to a
//! bytecode compiler.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use shaderpack::{CompilationOrchestrator, DirectorySource, PipelineSettings, SessionCaches, ShaderPack};
//!
//! let settings = PipelineSettings::default();
//! let caches = SessionCaches::new();
//! let pack = ShaderPack::open(Arc::new(DirectorySource::new("packs/example")?), settings.clone(), caches.clone())?;
//! let orchestrator = CompilationOrchestrator::with_probe(&settings, caches.compilations.clone())?;
//! let report = orchestrator.run_batch(&pack, &pack.new_values(), None, &Default::default())?;
//! ```

pub mod backend;
pub mod compile;
pub mod errors;
pub mod include;
pub mod modernize;
pub mod options;
pub mod pack;
pub mod pipeline;
pub mod preprocess;
pub mod settings;
pub mod syntax;

pub use backend::{CompileError, CompilerBackend, IncludeCallback, PackIncludeResolver, Payload};
pub use compile::{
    ArtifactSink, CancellationToken, CompilationCache, CompilationOrchestrator,
    CompilationResult, DirectoryArtifactSink, SessionReport,
};
pub use errors::{Diagnostic, DiagnosticKind, PackError, Result};
pub use include::{IncludeGraph, IncludeProcessor};
pub use modernize::{ModernizeProfile, Modernizer};
pub use options::{OptionSet, OptionValue, OptionValues, ShaderOption};
pub use pack::{DirectorySource, MemorySource, PackPath, PackSource, ShaderStage};
pub use pipeline::{PreparedShader, SessionCaches, ShaderPack};
pub use preprocess::{MacroSet, Preprocessor};
pub use settings::PipelineSettings;
