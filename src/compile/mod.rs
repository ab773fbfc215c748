//! Compilation
//!
//! - [`cache`]: memoized compile results and modernizer output
//! - [`report`]: per-batch summaries, persisted as JSON
//! - [`orchestrator`]: backend ownership, batching and failure containment

pub mod cache;
pub mod orchestrator;
pub mod report;

pub use cache::{CacheKey, CompilationCache, CompilationResult, TranslationCache};
pub use orchestrator::{
    ArtifactSink, CancellationToken, CompilationOrchestrator, DirectoryArtifactSink,
    validate_source,
};
pub use report::{AbortReason, FileReport, FileStatus, SessionReport};
