//! Compilation Orchestrator Tests
//!
//! Tests for:
//! - Result caching: identical requests compile once, warm batches are all hits
//! - Circuit breaker: aborts only past both thresholds
//! - Validation: bad files are skipped without a backend call
//! - Artifacts: failures leave the previous artifact in place
//! - Cancellation, worker-thread batches and backend initialization failures
//! - Callback include mode: includes resolved by the pack, cache follows includes
//!   even when they change between refreshes

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use shaderpack::backend::{
    CompileError, CompileRequest, CompilerBackend, IncludeCallback, IncludeRequest, NoIncludes,
    Payload, UnavailableBackend,
};
use shaderpack::compile::{
    AbortReason, CancellationToken, CompilationCache, CompilationOrchestrator,
    DirectoryArtifactSink, FileStatus,
};
use shaderpack::errors::{DiagnosticKind, PackError};
use shaderpack::include::IncludeKind;
use shaderpack::pack::{MemorySource, PackPath, PackSource, ShaderStage};
use shaderpack::settings::{CircuitBreakerSettings, CompileMode, IncludeMode, OutputKind};
use shaderpack::{PipelineSettings, SessionCaches, ShaderPack};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Fixtures
// ============================================================================

/// Echoes its input as the payload, inlining includes through the callback.
/// Sources containing `BROKEN` fail with a hint at line 2.
struct RecordingBackend {
    calls: Arc<AtomicUsize>,
}

impl CompilerBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn initialize(&mut self) -> shaderpack::Result<()> {
        Ok(())
    }

    fn compile(
        &mut self,
        request: &CompileRequest<'_>,
        includes: &mut dyn IncludeCallback,
    ) -> Result<Payload, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = String::new();
        for line in request.source.lines() {
            let target = line
                .trim_start()
                .strip_prefix("#include")
                .map(|rest| rest.trim().trim_matches('"'));
            match target {
                Some(target) => {
                    let resolved = includes.resolve(&IncludeRequest {
                        requested: target,
                        requesting: request.filename,
                        kind: IncludeKind::Quoted,
                        depth: 1,
                    });
                    out.push_str(&resolved.content);
                }
                None => out.push_str(line),
            }
            out.push('\n');
        }
        if out.contains("BROKEN") {
            return Err(CompileError::with_lines("syntax error: BROKEN", vec![2]));
        }
        Ok(Payload::Binary(out.into_bytes()))
    }
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        batch_pause_ms: 0,
        ..PipelineSettings::default()
    }
}

fn orchestrator(settings: &PipelineSettings) -> (CompilationOrchestrator, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let backend = RecordingBackend {
        calls: Arc::clone(&calls),
    };
    let orchestrator =
        CompilationOrchestrator::new(Box::new(backend), settings, Arc::new(CompilationCache::new()))
            .unwrap();
    (orchestrator, calls)
}

fn open(source: &Arc<MemorySource>, settings: &PipelineSettings) -> ShaderPack {
    let source: Arc<dyn PackSource> = Arc::clone(source) as Arc<dyn PackSource>;
    ShaderPack::open(source, settings.clone(), SessionCaches::new()).unwrap()
}

const GOOD: &str = "#version 120\nvoid main() {\n    gl_FragColor = vec4(1.0);\n}";
const BAD: &str = "#version 120\nfloat BROKEN;\nvoid main() {}";

fn later() -> SystemTime {
    SystemTime::now() + Duration::from_secs(10)
}

// ============================================================================
// Caching
// ============================================================================

#[test]
fn identical_requests_compile_once() {
    init_logger();
    let (orchestrator, calls) = orchestrator(&settings());
    let request = CompileRequest {
        filename: "/a.fsh",
        source: "#version 450\nvoid main() {}",
        stage: ShaderStage::Fragment,
        mode: CompileMode::Optimized,
        output: OutputKind::Binary,
        macros: None,
    };

    let first = orchestrator.compile(&request, &mut NoIncludes).unwrap();
    let second = orchestrator.compile(&request, &mut NoIncludes).unwrap();
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.payload, second.payload);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let debug = CompileRequest {
        mode: CompileMode::Debug,
        ..request
    };
    assert!(!orchestrator.compile(&debug, &mut NoIncludes).unwrap().cache_hit);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn warm_batch_is_served_from_cache() {
    init_logger();
    let source = Arc::new(MemorySource::from_files(
        "pack",
        [("/a.fsh", GOOD), ("/b.fsh", GOOD), ("/c.vsh", "#version 120\nvoid main() {}")],
    ));
    let settings = settings();
    let pack = open(&source, &settings);
    let (orchestrator, calls) = orchestrator(&settings);
    let values = pack.new_values();
    let cancel = CancellationToken::new();

    let cold = orchestrator.run_batch(&pack, &values, None, &cancel).unwrap();
    assert_eq!((cold.compiled, cold.cache_hits()), (3, 0));

    let warm = orchestrator.run_batch(&pack, &values, None, &cancel).unwrap();
    assert_eq!((warm.compiled, warm.cache_hits()), (3, 3));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(orchestrator.cache().hits(), 3);
}

#[test]
fn failures_are_not_cached() {
    let source = Arc::new(MemorySource::from_files("pack", [("/a.fsh", BAD)]));
    let settings = settings();
    let pack = open(&source, &settings);
    let (orchestrator, calls) = orchestrator(&settings);
    let values = pack.new_values();

    for _ in 0..2 {
        let report = orchestrator
            .run_batch(&pack, &values, None, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.failed, 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(orchestrator.cache().is_empty());
}

// ============================================================================
// Circuit Breaker
// ============================================================================

fn breaker_settings() -> PipelineSettings {
    PipelineSettings {
        circuit_breaker: CircuitBreakerSettings {
            min_failures: 3,
            failure_ratio: 0.5,
        },
        ..settings()
    }
}

#[test]
fn breaker_aborts_when_both_thresholds_are_crossed() {
    init_logger();
    let source = Arc::new(MemorySource::new("pack"));
    for i in 0..10 {
        source.insert(&format!("/f{i}.fsh"), BAD);
    }
    let settings = breaker_settings();
    let pack = open(&source, &settings);
    let (orchestrator, calls) = orchestrator(&settings);

    let report = orchestrator
        .run_batch(&pack, &pack.new_values(), None, &CancellationToken::new())
        .unwrap();
    assert_eq!(report.total, 10);
    assert_eq!(report.failed, 3);
    assert_eq!(report.processed(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(!report.is_complete());
    assert!(matches!(
        report.aborted,
        Some(AbortReason::CircuitBreaker { failed: 3, processed: 3 })
    ));
    assert!(matches!(
        report.ensure_complete(),
        Err(PackError::CircuitBreakerAbort { failed: 3, processed: 3, total: 10 })
    ));
}

#[test]
fn breaker_ignores_isolated_failures() {
    let source = Arc::new(MemorySource::new("pack"));
    for i in 0..10 {
        source.insert(&format!("/f{i}.fsh"), if i < 2 { BAD } else { GOOD });
    }
    let settings = breaker_settings();
    let pack = open(&source, &settings);
    let (orchestrator, _) = orchestrator(&settings);

    let report = orchestrator
        .run_batch(&pack, &pack.new_values(), None, &CancellationToken::new())
        .unwrap();
    assert_eq!((report.compiled, report.failed), (8, 2));
    assert!(report.is_complete());
    report.ensure_complete().unwrap();
}

#[test]
fn failed_file_reports_the_blamed_line() {
    let source = Arc::new(MemorySource::from_files("pack", [("/a.fsh", BAD)]));
    let settings = settings();
    let pack = open(&source, &settings);
    let (orchestrator, _) = orchestrator(&settings);

    let report = orchestrator
        .run_batch(&pack, &pack.new_values(), None, &CancellationToken::new())
        .unwrap();
    let file = report.file("/a.fsh").unwrap();
    assert_eq!(file.status, FileStatus::Failed);
    let diag = file
        .diagnostics
        .iter()
        .find(|d| d.kind == DiagnosticKind::Compile)
        .unwrap();
    assert_eq!(diag.line, Some(2));
    assert!(diag.message.contains("BROKEN"));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn invalid_files_are_skipped_without_compiling() {
    let source = Arc::new(MemorySource::from_files(
        "pack",
        [
            ("/empty.fsh", "   \n"),
            ("/noversion.fsh", "void main() {}"),
            ("/template.fsh", "#version 120\n// filled in by a generator\n#define X 1"),
            ("/ok.fsh", GOOD),
        ],
    ));
    let settings = settings();
    let pack = open(&source, &settings);
    let (orchestrator, calls) = orchestrator(&settings);

    let report = orchestrator
        .run_batch(&pack, &pack.new_values(), None, &CancellationToken::new())
        .unwrap();
    assert_eq!((report.compiled, report.skipped, report.failed), (1, 3, 0));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let skipped = report.file("/noversion.fsh").unwrap();
    assert_eq!(skipped.status, FileStatus::Skipped);
    assert_eq!(skipped.diagnostics[0].kind, DiagnosticKind::Validation);
}

#[test]
fn library_files_are_not_batch_roots() {
    let source = Arc::new(MemorySource::from_files(
        "pack",
        [
            ("/a.fsh", "#version 120\n#include \"/lib/light.fsh\"\nvoid main() {}"),
            ("/lib/light.fsh", "float light;"),
        ],
    ));
    let settings = settings();
    let pack = open(&source, &settings);
    let (orchestrator, _) = orchestrator(&settings);

    let report = orchestrator
        .run_batch(&pack, &pack.new_values(), None, &CancellationToken::new())
        .unwrap();
    assert_eq!(report.total, 1);
    assert!(report.file("/lib/light.fsh").is_none());
}

// ============================================================================
// Artifacts
// ============================================================================

#[test]
fn failed_compile_keeps_previous_artifact() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::from_files("pack", [("/world0/a.fsh", GOOD)]));
    let settings = settings();
    let pack = open(&source, &settings);
    let (orchestrator, _) = orchestrator(&settings);
    let mut sink = DirectoryArtifactSink::new(dir.path());
    let values = pack.new_values();

    let report = orchestrator
        .run_batch(&pack, &values, Some(&mut sink), &CancellationToken::new())
        .unwrap();
    assert_eq!(report.compiled, 1);

    let path = sink.artifact_path(&PackPath::new("/world0/a.fsh"), &Payload::Binary(Vec::new()));
    let stored = std::fs::read(&path).unwrap();
    assert!(!stored.is_empty());
    assert!(path.ends_with("world0/a.fsh.spv"));

    source.insert_with_time("/world0/a.fsh", BAD, later());
    assert!(pack.refresh().unwrap());
    let report = orchestrator
        .run_batch(&pack, &values, Some(&mut sink), &CancellationToken::new())
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(std::fs::read(&path).unwrap(), stored);
}

// ============================================================================
// Cancellation & Threads
// ============================================================================

#[test]
fn cancelled_batch_stops_before_the_next_file() {
    let source = Arc::new(MemorySource::from_files("pack", [("/a.fsh", GOOD), ("/b.fsh", GOOD)]));
    let settings = settings();
    let pack = open(&source, &settings);
    let (orchestrator, calls) = orchestrator(&settings);

    let cancel = CancellationToken::new();
    cancel.clone().cancel();
    let report = orchestrator
        .run_batch(&pack, &pack.new_values(), None, &cancel)
        .unwrap();
    assert_eq!(report.aborted, Some(AbortReason::Cancelled));
    assert_eq!(report.processed(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    report.ensure_complete().unwrap();
}

#[test]
fn spawned_batch_reports_through_the_join_handle() {
    init_logger();
    let source = Arc::new(MemorySource::from_files("pack", [("/a.fsh", GOOD), ("/b.vsh", GOOD)]));
    let settings = settings();
    let pack = Arc::new(open(&source, &settings));
    let (orchestrator, _) = orchestrator(&settings);
    let orchestrator = Arc::new(orchestrator);

    let handle = orchestrator
        .spawn_batch(Arc::clone(&pack), pack.new_values(), None, CancellationToken::new())
        .unwrap();
    let report = handle.join().unwrap().unwrap();
    assert_eq!(report.total, 2);
    assert!(report.is_complete());
    assert_eq!(orchestrator.cache().len(), 2);
}

#[test]
fn backend_initialization_failure_is_fatal() {
    let err = CompilationOrchestrator::new(
        Box::new(UnavailableBackend),
        &settings(),
        Arc::new(CompilationCache::new()),
    )
    .unwrap_err();
    assert!(matches!(err, PackError::BackendInit(_)));
}

// ============================================================================
// Callback Include Mode
// ============================================================================

#[test]
fn callback_mode_resolves_includes_and_tracks_them() {
    init_logger();
    let settings = PipelineSettings {
        include_mode: IncludeMode::Callback,
        ..settings()
    };
    let source = Arc::new(MemorySource::from_files(
        "pack",
        [
            ("/a.fsh", "#version 450\n#include \"/lib/k.glsl\"\nvoid main() {}"),
            ("/lib/k.glsl", "const float K = 0.5;"),
        ],
    ));
    let pack = open(&source, &settings);
    let (orchestrator, calls) = orchestrator(&settings);
    let values = pack.new_values();
    let file = PackPath::new("/a.fsh");

    let prepared = pack.prepare(&file, &values).unwrap();
    assert!(prepared.macros.is_some());
    assert!(prepared.text.contains("#include \"/lib/k.glsl\""));

    let first = orchestrator.compile_prepared(&pack, &prepared).unwrap();
    let Payload::Binary(bytes) = first.payload.as_ref() else {
        panic!("expected a binary payload");
    };
    assert!(String::from_utf8_lossy(bytes).contains("const float K = 0.5;"));
    assert!(orchestrator.compile_prepared(&pack, &prepared).unwrap().cache_hit);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    source.insert_with_time("/lib/k.glsl", "const float K = 0.75;", later());
    assert!(pack.refresh().unwrap());
    let prepared = pack.prepare(&file, &values).unwrap();
    let second = orchestrator.compile_prepared(&pack, &prepared).unwrap();
    assert!(!second.cache_hit);
    assert!(String::from_utf8_lossy(second.payload.as_bytes()).contains("K = 0.75"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn callback_mode_cache_sees_unrefreshed_include_edits() {
    let settings = PipelineSettings {
        include_mode: IncludeMode::Callback,
        ..settings()
    };
    let source = Arc::new(MemorySource::from_files(
        "pack",
        [
            ("/a.fsh", "#version 450\n#include \"/lib/k.glsl\"\nvoid main() {}"),
            ("/lib/k.glsl", "#include \"inner.glsl\""),
            ("/lib/inner.glsl", "const float K = 0.5;"),
        ],
    ));
    let pack = open(&source, &settings);
    let (orchestrator, calls) = orchestrator(&settings);
    let prepared = pack.prepare(&PackPath::new("/a.fsh"), &pack.new_values()).unwrap();

    assert!(!orchestrator.compile_prepared(&pack, &prepared).unwrap().cache_hit);
    assert!(orchestrator.compile_prepared(&pack, &prepared).unwrap().cache_hit);

    source.insert("/lib/inner.glsl", "const float K = 0.25;");
    let edited = orchestrator.compile_prepared(&pack, &prepared).unwrap();
    assert!(!edited.cache_hit);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn callback_mode_hands_includes_over_unlocked() {
    let settings = PipelineSettings {
        include_mode: IncludeMode::Callback,
        ..settings()
    };
    let source = Arc::new(MemorySource::from_files(
        "pack",
        [
            ("/a.fsh", "#version 450\n#include \"/lib/s.glsl\"\nvoid main() {}"),
            ("/lib/s.glsl", "#define BLOOM"),
        ],
    ));
    let pack = open(&source, &settings);
    let (orchestrator, _) = orchestrator(&settings);
    let mut values = pack.new_values();
    values.set_bool("BLOOM", false).unwrap();

    let prepared = pack.prepare(&PackPath::new("/a.fsh"), &values).unwrap();
    assert!(!prepared.macros.as_ref().unwrap().contains("BLOOM"));
    let result = orchestrator.compile_prepared(&pack, &prepared).unwrap();
    assert!(String::from_utf8_lossy(result.payload.as_bytes()).contains("#define BLOOM"));
}
