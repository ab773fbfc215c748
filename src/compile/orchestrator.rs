//! Compilation Orchestrator
//!
//! Drives the backend for single files and whole packs.
//!
//! # Overview
//!
//! - The backend handle sits behind a mutex: every compile is serialized,
//!   while the [`CompilationCache`] can be read from any thread.
//! - [`CompilationOrchestrator::run_batch`] validates each compilable file,
//!   prepares it through the [`ShaderPack`] session and compiles it. One
//!   file failing never stops the batch; the circuit breaker does.
//! - A [`CancellationToken`] is checked between files.
//! - Successful payloads go to an [`ArtifactSink`]. Failed files write nothing,
//!   so earlier artifacts survive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_128;

use super::cache::{CacheKey, CompilationCache, CompilationResult};
use super::report::{AbortReason, FileReport, FileStatus, SessionReport};
use crate::backend::{
    self, CompileError, CompileRequest, CompilerBackend, IncludeCallback, NoIncludes,
    PackIncludeResolver, Payload,
};
use crate::errors::{Diagnostic, DiagnosticKind, PackError, Result};
use crate::include::parse_include;
use crate::options::OptionValues;
use crate::pack::PackPath;
use crate::pipeline::{PreparedShader, ShaderPack};
use crate::settings::{IncludeMode, PipelineSettings};
use crate::syntax;

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag shared between a batch and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ============================================================================
// Artifacts
// ============================================================================

/// Receives the payload of every successfully compiled file.
pub trait ArtifactSink: Send {
    fn store(&mut self, file: &PackPath, payload: &Payload) -> Result<()>;
}

/// Writes `<file>.spv` (binary) or `<file>.txt` (text) under a root
/// directory, mirroring the pack layout.
#[derive(Debug, Clone)]
pub struct DirectoryArtifactSink {
    root: PathBuf,
}

impl DirectoryArtifactSink {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn artifact_path(&self, file: &PackPath, payload: &Payload) -> PathBuf {
        let suffix = match payload {
            Payload::Binary(_) => "spv",
            Payload::Text(_) => "txt",
        };
        let mut path = file.to_fs_path(&self.root).into_os_string();
        path.push(".");
        path.push(suffix);
        PathBuf::from(path)
    }
}

impl ArtifactSink for DirectoryArtifactSink {
    fn store(&mut self, file: &PackPath, payload: &Payload) -> Result<()> {
        let path = self.artifact_path(file, payload);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PackError::io(parent.display(), e))?;
        }
        std::fs::write(&path, payload.as_bytes()).map_err(|e| PackError::io(path.display(), e))?;
        log::debug!("Wrote {}", path.display());
        Ok(())
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Checks a raw source file before any work is spent on it.
///
/// A file is rejected when it is empty, has no `#version` directive, exceeds
/// `max_source_bytes`, or is a bare template: nothing but directives and
/// comments, with no include to pull code in.
pub fn validate_source(
    file: &PackPath,
    text: &str,
    settings: &PipelineSettings,
) -> std::result::Result<(), Diagnostic> {
    let reject = |message: String| Diagnostic::new(DiagnosticKind::Validation, file.as_str(), message);

    if text.trim().is_empty() {
        return Err(reject("file is empty".to_string()));
    }
    if text.len() > settings.max_source_bytes {
        return Err(reject(format!(
            "file is {} bytes, above the {} byte limit",
            text.len(),
            settings.max_source_bytes
        )));
    }

    let mut in_block = false;
    let mut has_version = false;
    let mut has_code = false;
    for line in text.lines() {
        let code = syntax::code_of(line, &mut in_block);
        let code = code.trim();
        if code.is_empty() {
            continue;
        }
        match code.strip_prefix('#') {
            Some(directive) if directive.trim_start().starts_with("version") => has_version = true,
            Some(_) => has_code |= parse_include(code).is_some(),
            None => has_code = true,
        }
    }

    if !has_version {
        return Err(reject("no #version directive".to_string()));
    }
    if !has_code {
        return Err(reject("template without declarations".to_string()));
    }
    Ok(())
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Owns the backend and compiles through the cache.
pub struct CompilationOrchestrator {
    backend: Mutex<Box<dyn CompilerBackend>>,
    backend_name: String,
    cache: Arc<CompilationCache>,
    settings: PipelineSettings,
}

impl CompilationOrchestrator {
    /// Initializes `backend`.
    ///
    /// # Errors
    ///
    /// [`PackError::BackendInit`] when the backend cannot come up. Nothing
    /// can be compiled afterwards, so this is fatal.
    pub fn new(
        mut backend: Box<dyn CompilerBackend>,
        settings: &PipelineSettings,
        cache: Arc<CompilationCache>,
    ) -> Result<Self> {
        if let Err(err) = backend.initialize() {
            log::error!("Backend {} failed to initialize: {err}", backend.name());
            return Err(err);
        }
        log::info!("Compilation backend: {}", backend.name());
        Ok(Self {
            backend_name: backend.name().to_string(),
            backend: Mutex::new(backend),
            cache,
            settings: settings.clone(),
        })
    }

    /// Uses whatever [`backend::probe`] finds.
    pub fn with_probe(settings: &PipelineSettings, cache: Arc<CompilationCache>) -> Result<Self> {
        Self::new(backend::probe(), settings, cache)
    }

    #[inline]
    #[must_use]
    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    #[inline]
    #[must_use]
    pub fn cache(&self) -> &Arc<CompilationCache> {
        &self.cache
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Compiles one request, serving identical requests from the cache.
    pub fn compile(
        &self,
        request: &CompileRequest<'_>,
        includes: &mut dyn IncludeCallback,
    ) -> std::result::Result<CompilationResult, CompileError> {
        self.compile_keyed(CacheKey::for_request(request), request, includes, String::new())
    }

    fn compile_keyed(
        &self,
        key: CacheKey,
        request: &CompileRequest<'_>,
        includes: &mut dyn IncludeCallback,
        diagnostics: String,
    ) -> std::result::Result<CompilationResult, CompileError> {
        if let Some(hit) = self.cache.get(&key) {
            log::trace!("cache hit for {} ({})", request.filename, request.stage);
            return Ok(hit);
        }

        let payload = {
            let mut backend = self.backend.lock();
            backend.compile(request, includes)?
        };
        let result = CompilationResult {
            payload: Arc::new(payload),
            filename: request.filename.to_string(),
            stage: request.stage,
            cache_hit: false,
            diagnostics,
        };
        self.cache.insert(key, result.clone());
        Ok(result)
    }

    /// Compiles a file prepared by `pack`.
    ///
    /// In callback include mode the backend resolves includes against the
    /// pack, and the cache key also covers the current content of every file
    /// the source pulls in.
    pub fn compile_prepared(
        &self,
        pack: &ShaderPack,
        prepared: &PreparedShader,
    ) -> std::result::Result<CompilationResult, CompileError> {
        let request = CompileRequest {
            filename: prepared.file.as_str(),
            source: &prepared.text,
            stage: prepared.stage,
            mode: self.settings.compile_mode,
            output: self.settings.output_kind,
            macros: prepared.macros.as_ref(),
        };
        let mut key = CacheKey::for_request(&request);
        let diagnostics = prepared
            .diagnostics
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");

        match pack.settings().include_mode {
            IncludeMode::Flatten => self.compile_keyed(key, &request, &mut NoIncludes, diagnostics),
            IncludeMode::Callback => {
                let mut resolver = PackIncludeResolver::new(pack.source())
                    .with_extra_roots(&pack.settings().extra_include_roots);
                let includes = resolver.fingerprint(prepared.file.as_str(), &prepared.text);
                let mut combined = key.source_hash.to_le_bytes().to_vec();
                combined.extend_from_slice(&includes.to_le_bytes());
                key.source_hash = xxh3_128(&combined);

                self.compile_keyed(key, &request, &mut resolver, diagnostics)
            }
        }
    }

    /// Compiles every compilable file of `pack` with `values`.
    ///
    /// Returns `Err` only when the file list cannot be read; per-file problems
    /// land in the report. A circuit-breaker abort is recorded in
    /// [`SessionReport::aborted`]; see [`SessionReport::ensure_complete`].
    pub fn run_batch(
        &self,
        pack: &ShaderPack,
        values: &OptionValues,
        mut sink: Option<&mut (dyn ArtifactSink + '_)>,
        cancel: &CancellationToken,
    ) -> Result<SessionReport> {
        let started = Instant::now();
        let files = pack.compilable_files()?;
        let total = files.len();
        let mut report = SessionReport::new(pack.source().identity(), total);
        let group = self.settings.batch_group_size.max(1);
        let pause = self.settings.batch_pause();

        log::info!("Batch of {total} files on {}", report.pack);

        for (index, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                log::warn!("Batch cancelled after {index} of {total} files");
                report.aborted = Some(AbortReason::Cancelled);
                break;
            }
            if index > 0 && index % group == 0 && !pause.is_zero() {
                thread::sleep(pause);
            }

            let file_report = self.process_file(pack, values, file, sink.as_deref_mut());
            report.record(file_report);

            let processed = report.processed();
            if processed < total
                && self
                    .settings
                    .circuit_breaker
                    .should_trip(report.failed, processed)
            {
                log::error!(
                    "Circuit breaker tripped: {} of {processed} files failed, {} not attempted",
                    report.failed,
                    total - processed
                );
                report.aborted = Some(AbortReason::CircuitBreaker {
                    failed: report.failed,
                    processed,
                });
                break;
            }
        }

        report.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        log::info!(
            "Batch done: {} compiled, {} failed, {} skipped, {} from cache",
            report.compiled,
            report.failed,
            report.skipped,
            report.cache_hits()
        );
        Ok(report)
    }

    /// Runs [`run_batch`](Self::run_batch) on a worker thread.
    pub fn spawn_batch(
        self: &Arc<Self>,
        pack: Arc<ShaderPack>,
        values: OptionValues,
        mut sink: Option<Box<dyn ArtifactSink>>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<Result<SessionReport>>> {
        let orchestrator = Arc::clone(self);
        thread::Builder::new()
            .name("shaderpack-batch".to_string())
            .spawn(move || orchestrator.run_batch(&pack, &values, sink.as_deref_mut(), &cancel))
            .map_err(|e| PackError::io("batch worker", e))
    }

    fn process_file(
        &self,
        pack: &ShaderPack,
        values: &OptionValues,
        file: &PackPath,
        sink: Option<&mut (dyn ArtifactSink + '_)>,
    ) -> FileReport {
        let started = Instant::now();
        let mut report = FileReport {
            file: file.to_string(),
            stage: None,
            status: FileStatus::Skipped,
            cache_hit: false,
            duration_ms: 0.0,
            bytes: 0,
            diagnostics: Vec::new(),
        };

        let outcome = pack
            .source()
            .read_to_string(file)
            .and_then(|raw| match validate_source(file, &raw, &self.settings) {
                Ok(()) => pack.prepare(file, values).map(Some),
                Err(diag) => {
                    diag.log();
                    report.diagnostics.push(diag);
                    Ok(None)
                }
            });

        match outcome {
            Ok(None) => {}
            Err(err) => {
                let diag = Diagnostic::new(DiagnosticKind::Compile, file.as_str(), err.to_string());
                diag.log();
                report.status = FileStatus::Failed;
                report.diagnostics.push(diag);
            }
            Ok(Some(prepared)) => {
                report.stage = Some(prepared.stage);
                report.diagnostics.extend(prepared.diagnostics.iter().cloned());
                match self.compile_prepared(pack, &prepared) {
                    Ok(result) => {
                        report.status = FileStatus::Compiled;
                        report.cache_hit = result.cache_hit;
                        report.bytes = result.payload.len();
                        if let Some(sink) = sink
                            && let Err(err) = sink.store(file, &result.payload)
                        {
                            log::error!("Could not store artifact for {file}: {err}");
                        }
                    }
                    Err(err) => {
                        let mut diag =
                            Diagnostic::new(DiagnosticKind::Compile, file.as_str(), &err.message);
                        if let Some(&line) = err.line_hints.first() {
                            let snippet = prepared
                                .text
                                .lines()
                                .nth((line as usize).saturating_sub(1))
                                .unwrap_or_default();
                            diag = diag.at_line(line as usize, snippet);
                        }
                        diag.log();
                        report.status = FileStatus::Failed;
                        report.diagnostics.push(diag);
                    }
                }
            }
        }

        report.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        report
    }
}

impl std::fmt::Debug for CompilationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationOrchestrator")
            .field("backend", &self.backend_name)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}
