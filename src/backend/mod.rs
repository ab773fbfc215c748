//! Compilation Backend
//!
//! The narrow interface between the pipeline and whatever turns a prepared
//! GLSL text into bytecode.
//!
//! # Overview
//!
//! - [`CompilerBackend`]: the compiler itself. Handles are stateful and are
//!   not assumed to be reentrant; the orchestrator serializes every call.
//! - [`IncludeCallback`]: how the backend asks for the text of an `#include`
//!   it meets. [`PackIncludeResolver`] implements it on top of pack paths.
//! - [`probe`]: picks the backend once, at startup. When no real compiler is
//!   compiled in, [`UnavailableBackend`] stands in and fails initialization,
//!   which is fatal for the pipeline.

mod resolver;

#[cfg(feature = "naga-backend")]
mod naga_glsl;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::{PackError, Result};
use crate::include::IncludeKind;
use crate::pack::ShaderStage;
use crate::preprocess::MacroSet;
use crate::settings::{CompileMode, OutputKind};

#[cfg(feature = "naga-backend")]
pub use naga_glsl::NagaBackend;
pub use resolver::{MAX_INCLUDE_DEPTH, PackIncludeResolver};

// ============================================================================
// Requests & Results
// ============================================================================

/// One compile invocation.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// Pack path of the file, used in diagnostics and include resolution.
    pub filename: &'a str,
    pub source: &'a str,
    pub stage: ShaderStage,
    pub mode: CompileMode,
    pub output: OutputKind,
    /// Extra definitions passed to the backend's own preprocessor.
    pub macros: Option<&'a MacroSet>,
}

/// Compiled output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Binary(Vec<u8>),
    Text(String),
}

impl Payload {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Binary(bytes) => bytes,
            Self::Text(text) => text.as_bytes(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// A file the backend rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    /// 1-based source lines the backend blamed, when known.
    pub line_hints: Vec<u32>,
}

impl CompileError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line_hints: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_lines(message: impl Into<String>, line_hints: Vec<u32>) -> Self {
        Self {
            message: message.into(),
            line_hints,
        }
    }
}

// ============================================================================
// Include Callback
// ============================================================================

/// An include the backend needs resolved.
#[derive(Debug, Clone, Copy)]
pub struct IncludeRequest<'a> {
    /// Target as written in the directive.
    pub requested: &'a str,
    /// Name of the file containing the directive.
    pub requesting: &'a str,
    pub kind: IncludeKind,
    /// Nesting depth; the top-level file's includes are depth 1.
    pub depth: usize,
}

/// Answer to an [`IncludeRequest`]. An unresolved include still produces
/// content (a one-line `#error` stub) so the backend reports it as a normal
/// diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeResult {
    pub resolved_name: String,
    pub content: String,
    pub found: bool,
}

pub trait IncludeCallback {
    fn resolve(&mut self, request: &IncludeRequest<'_>) -> IncludeResult;
}

/// A callback that resolves nothing.
pub struct NoIncludes;

impl IncludeCallback for NoIncludes {
    fn resolve(&mut self, request: &IncludeRequest<'_>) -> IncludeResult {
        resolver::unresolved(request, "includes are not available here")
    }
}

// ============================================================================
// Backend
// ============================================================================

/// A native (or native-like) bytecode compiler.
pub trait CompilerBackend: Send {
    fn name(&self) -> &str;

    /// Brings the backend up. Called once before the first compile; failure is
    /// fatal for the pipeline.
    fn initialize(&mut self) -> Result<()>;

    fn compile(
        &mut self,
        request: &CompileRequest<'_>,
        includes: &mut dyn IncludeCallback,
    ) -> std::result::Result<Payload, CompileError>;
}

impl fmt::Debug for dyn CompilerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompilerBackend({})", self.name())
    }
}

/// Stand-in used when no backend is compiled in.
#[derive(Debug, Default)]
pub struct UnavailableBackend;

impl CompilerBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn initialize(&mut self) -> Result<()> {
        Err(PackError::BackendInit(
            "no shader compiler is available in this build".to_string(),
        ))
    }

    fn compile(
        &mut self,
        _request: &CompileRequest<'_>,
        _includes: &mut dyn IncludeCallback,
    ) -> std::result::Result<Payload, CompileError> {
        Err(CompileError::new("no shader compiler is available in this build"))
    }
}

/// Picks the best backend compiled into this build.
#[must_use]
pub fn probe() -> Box<dyn CompilerBackend> {
    #[cfg(feature = "naga-backend")]
    {
        log::debug!("Using the naga compilation backend");
        Box::new(NagaBackend::new())
    }
    #[cfg(not(feature = "naga-backend"))]
    {
        log::warn!("No compilation backend compiled in");
        Box::new(UnavailableBackend)
    }
}
