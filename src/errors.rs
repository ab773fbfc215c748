//! Error Types
//!
//! This module defines the error and diagnostic types used throughout the pipeline.
//!
//! # Overview
//!
//! Two kinds of failure exist:
//!
//! - [`PackError`] covers structural failures that stop a pipeline outright
//!   (cyclic includes, backend initialization, I/O on the pack root) and invalid
//!   API usage (unknown option names, bad option values).
//! - [`Diagnostic`] covers file-local problems that are recorded and reported but
//!   never abort a batch (malformed option lines, missing includes, unbalanced
//!   conditionals, per-file compile errors).
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, PackError>`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pack::PackPath;

/// The main error type for the shader pack pipeline.
#[derive(Error, Debug)]
pub enum PackError {
    // ========================================================================
    // I/O & Path Errors
    // ========================================================================
    /// A file inside (or the root of) the pack could not be read.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Pack path or host path that failed.
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A path could not be mapped into the pack.
    #[error("Invalid pack path: {0}")]
    InvalidPath(String),

    // ========================================================================
    // Structural Errors
    // ========================================================================
    /// The include graph contains a cycle. Fatal: no flattening or compilation
    /// is attempted.
    #[error("Cyclic include detected: {}", format_cycle(.cycle))]
    GraphCycle {
        /// The concrete cyclic path; first and last element are the same file.
        cycle: Vec<PackPath>,
    },

    /// The requested file is not part of the loaded include graph.
    #[error("File is not part of the include graph: {0}")]
    FileNotInGraph(PackPath),

    /// Neither the extension nor the contents of the file name a stage.
    #[error("Cannot infer the shader stage of {0}")]
    UnknownStage(PackPath),

    /// The compilation backend could not be brought up. Fatal for the pipeline.
    #[error("Compilation backend initialization failed: {0}")]
    BackendInit(String),

    /// A batch was stopped because too many files failed.
    #[error("Batch aborted by circuit breaker: {failed} of {processed} processed files failed ({total} total)")]
    CircuitBreakerAbort {
        failed: usize,
        processed: usize,
        total: usize,
    },

    // ========================================================================
    // Option Errors
    // ========================================================================
    /// No option with this name exists in the bound option set.
    #[error("Unknown shader option: {0}")]
    UnknownOption(String),

    /// The value is not legal for the named option.
    #[error("Invalid value {value:?} for shader option {name}")]
    InvalidOptionValue { name: String, value: String },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Settings JSON could not be parsed or written.
    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),
}

impl PackError {
    pub(crate) fn io(path: impl fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}

fn format_cycle(cycle: &[PackPath]) -> String {
    cycle
        .iter()
        .map(PackPath::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Alias for `Result<T, PackError>`.
pub type Result<T> = std::result::Result<T, PackError>;

// ============================================================================
// Diagnostics
// ============================================================================

/// Category of a non-fatal diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Malformed or conflicting option declaration; the line is skipped.
    Discovery,
    /// An include target does not exist; rendered as a stub.
    MissingInclude,
    /// `#if`/`#endif` nesting did not balance; best-effort output was kept.
    UnbalancedConditional,
    /// A preprocessor expression the restricted evaluator does not understand.
    UnsupportedDirective,
    /// The file failed pre-compile validation and was skipped.
    Validation,
    /// The backend rejected the file.
    Compile,
}

/// A file-local, non-fatal problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Pack path of the file the diagnostic refers to.
    pub file: String,
    /// 1-based line number, when known.
    pub line: Option<usize>,
    /// The offending source line, when known.
    pub snippet: Option<String>,
    pub message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(kind: DiagnosticKind, file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            file: file.into(),
            line: None,
            snippet: None,
            message: message.into(),
        }
    }

    /// Attaches a 1-based line number and the source text of that line.
    #[must_use]
    pub fn at_line(mut self, line: usize, snippet: &str) -> Self {
        self.line = Some(line);
        self.snippet = Some(snippet.trim().to_string());
        self
    }

    /// Sends the diagnostic to the `log` facade.
    pub(crate) fn log(&self) {
        log::warn!("{self}");
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(snippet) = &self.snippet {
            write!(f, "\n    | {snippet}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = PackError::GraphCycle {
            cycle: vec![
                PackPath::new("/a.fsh"),
                PackPath::new("/lib/b.glsl"),
                PackPath::new("/a.fsh"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic include detected: /a.fsh -> /lib/b.glsl -> /a.fsh"
        );
    }

    #[test]
    fn test_diagnostic_display_carries_location() {
        let diag = Diagnostic::new(DiagnosticKind::MissingInclude, "/a.fsh", "missing /x.glsl")
            .at_line(3, "  #include \"x.glsl\"  ");
        let text = diag.to_string();
        assert!(text.contains("/a.fsh:3"));
        assert!(text.contains("#include \"x.glsl\""));
    }
}
