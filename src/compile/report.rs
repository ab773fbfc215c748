//! Machine-readable batch summaries.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Diagnostic, PackError, Result};
use crate::pack::ShaderStage;

/// Outcome of one file in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Compiled,
    Failed,
    /// Rejected by pre-compile validation.
    Skipped,
}

/// Why a batch stopped before its last file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum AbortReason {
    CircuitBreaker { failed: usize, processed: usize },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    pub file: String,
    pub stage: Option<ShaderStage>,
    pub status: FileStatus,
    pub cache_hit: bool,
    /// Wall time spent on this file, in milliseconds.
    pub duration_ms: f64,
    /// Size of the produced payload; 0 unless compiled.
    pub bytes: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Summary of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub pack: String,
    /// Number of files the batch was asked to process.
    pub total: usize,
    pub compiled: usize,
    pub failed: usize,
    pub skipped: usize,
    pub files: Vec<FileReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<AbortReason>,
    pub elapsed_ms: f64,
}

impl SessionReport {
    #[must_use]
    pub fn new(pack: impl Into<String>, total: usize) -> Self {
        Self {
            pack: pack.into(),
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, report: FileReport) {
        match report.status {
            FileStatus::Compiled => self.compiled += 1,
            FileStatus::Failed => self.failed += 1,
            FileStatus::Skipped => self.skipped += 1,
        }
        self.files.push(report);
    }

    /// Files that reached a verdict.
    #[inline]
    #[must_use]
    pub fn processed(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn file(&self, name: &str) -> Option<&FileReport> {
        self.files.iter().find(|f| f.file == name)
    }

    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.files.iter().filter(|f| f.cache_hit).count()
    }

    /// `true` when every file was processed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none() && self.processed() == self.total
    }

    /// Turns a circuit-breaker abort into [`PackError::CircuitBreakerAbort`].
    /// Cancellation is not an error.
    pub fn ensure_complete(&self) -> Result<()> {
        match self.aborted {
            Some(AbortReason::CircuitBreaker { failed, processed }) => {
                Err(PackError::CircuitBreakerAbort {
                    failed,
                    processed,
                    total: self.total,
                })
            }
            _ => Ok(()),
        }
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Writes the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PackError::io(parent.display(), e))?;
        }
        std::fs::write(path, self.to_json_string()?).map_err(|e| PackError::io(path.display(), e))
    }
}
