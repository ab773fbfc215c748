//! Include resolution for backends, built on pack paths.

use rustc_hash::FxHashSet;
use xxhash_rust::xxh3::Xxh3;

use super::{IncludeCallback, IncludeRequest, IncludeResult};
use crate::include::include_lines;
use crate::pack::{PackPath, PackSource};

/// Nesting depth past which includes are refused.
pub const MAX_INCLUDE_DEPTH: usize = 64;

pub(super) fn unresolved(request: &IncludeRequest<'_>, reason: &str) -> IncludeResult {
    IncludeResult {
        resolved_name: request.requested.to_string(),
        content: format!(
            "#error unresolved include {} from {}: {reason}",
            request.requested, request.requesting
        ),
        found: false,
    }
}

/// Resolves includes against a pack.
///
/// Search order: the requesting file's directory (a leading `/` means the pack
/// root), then the pack root, then each extra root in registration order.
pub struct PackIncludeResolver<'a> {
    source: &'a dyn PackSource,
    extra_roots: Vec<PackPath>,
    max_depth: usize,
    resolved: Vec<PackPath>,
}

impl<'a> PackIncludeResolver<'a> {
    #[must_use]
    pub fn new(source: &'a dyn PackSource) -> Self {
        Self {
            source,
            extra_roots: Vec::new(),
            max_depth: MAX_INCLUDE_DEPTH,
            resolved: Vec::new(),
        }
    }

    /// Adds search roots, given as pack-relative directories.
    #[must_use]
    pub fn with_extra_roots<S: AsRef<str>>(mut self, roots: &[S]) -> Self {
        self.extra_roots
            .extend(roots.iter().map(|r| PackPath::new(r.as_ref())));
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Every file handed out so far, in request order.
    #[must_use]
    pub fn resolved(&self) -> &[PackPath] {
        &self.resolved
    }

    /// Hash of everything the includes of `text` currently resolve to,
    /// followed transitively, as a backend asking this resolver would see it.
    pub fn fingerprint(&mut self, requesting: &str, text: &str) -> u128 {
        let mut hasher = Xxh3::new();
        let mut visited = FxHashSet::default();
        self.hash_includes(requesting, text, 1, &mut visited, &mut hasher);
        hasher.digest128()
    }

    fn hash_includes(
        &mut self,
        requesting: &str,
        text: &str,
        depth: usize,
        visited: &mut FxHashSet<String>,
        hasher: &mut Xxh3,
    ) {
        for include in include_lines(text) {
            let result = self.resolve(&IncludeRequest {
                requested: &include.target,
                requesting,
                kind: include.kind,
                depth,
            });
            hasher.update(result.resolved_name.as_bytes());
            hasher.update(b"\0");
            hasher.update(result.content.as_bytes());
            hasher.update(b"\0");
            if result.found && visited.insert(result.resolved_name.clone()) {
                self.hash_includes(&result.resolved_name, &result.content, depth + 1, visited, hasher);
            }
        }
    }

    fn candidates(&self, request: &IncludeRequest<'_>) -> Vec<PackPath> {
        let requesting = PackPath::new(request.requesting);
        let relative = request.requested.trim_start_matches('/');
        let mut out = vec![requesting.resolve_sibling(request.requested)];
        out.push(PackPath::root().resolve(relative));
        out.extend(self.extra_roots.iter().map(|root| root.resolve(relative)));
        out.dedup();
        out
    }
}

impl IncludeCallback for PackIncludeResolver<'_> {
    fn resolve(&mut self, request: &IncludeRequest<'_>) -> IncludeResult {
        if request.depth > self.max_depth {
            log::warn!(
                "Include depth limit {} exceeded at {} (from {})",
                self.max_depth,
                request.requested,
                request.requesting
            );
            return unresolved(request, "include depth limit exceeded");
        }

        for candidate in self.candidates(request) {
            if !self.source.exists(&candidate) {
                continue;
            }
            match self.source.read_to_string(&candidate) {
                Ok(content) => {
                    log::trace!("include {} -> {candidate}", request.requested);
                    self.resolved.push(candidate.clone());
                    return IncludeResult {
                        resolved_name: candidate.to_string(),
                        content,
                        found: true,
                    };
                }
                Err(err) => log::warn!("Could not read include {candidate}: {err}"),
            }
        }
        log::debug!(
            "Unresolved include {} from {}",
            request.requested,
            request.requesting
        );
        unresolved(request, "not found")
    }
}
