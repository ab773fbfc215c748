//! Include flattening.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::graph::IncludeGraph;
use super::node::FileNode;
use crate::errors::{PackError, Result};
use crate::pack::PackPath;

/// Prefix of the comment line that replaces an unresolvable include.
pub const MISSING_INCLUDE_MARKER: &str = "// [missing include]";

/// Recursively inlines includes of an [`IncludeGraph`] entry.
///
/// Each file's flattened text is memoized, so a file included from several
/// places renders identically every time. The memo is safe to share between
/// threads; concurrent callers may render the same file twice but keep the
/// first stored result.
pub struct IncludeProcessor {
    graph: Arc<IncludeGraph>,
    memo: RwLock<FxHashMap<PackPath, Arc<str>>>,
}

impl IncludeProcessor {
    #[must_use]
    pub fn new(graph: Arc<IncludeGraph>) -> Self {
        Self {
            graph,
            memo: RwLock::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn graph(&self) -> &Arc<IncludeGraph> {
        &self.graph
    }

    /// Returns the fully inlined text of `path`.
    ///
    /// Missing targets render as a single [`MISSING_INCLUDE_MARKER`] comment
    /// line instead of failing.
    pub fn flatten(&self, path: &PackPath) -> Result<Arc<str>> {
        let node = self
            .graph
            .node(path)
            .ok_or_else(|| PackError::FileNotInGraph(path.clone()))?;
        Ok(self.flatten_node(node))
    }

    fn flatten_node(&self, node: &FileNode) -> Arc<str> {
        if let Some(hit) = self.memo.read().get(node.path()) {
            return Arc::clone(hit);
        }

        let mut out = String::new();
        for (idx, line) in node.lines().iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            match node.include_at(idx) {
                // The graph is acyclic, so this recursion terminates.
                Some(target) => match self.graph.node(target) {
                    Some(child) => out.push_str(&self.flatten_node(child)),
                    None => {
                        out.push_str(&format!(
                            "{MISSING_INCLUDE_MARKER} {target} (from {}:{})",
                            node.path(),
                            idx + 1
                        ));
                    }
                },
                None => out.push_str(line),
            }
        }

        let rendered: Arc<str> = Arc::from(out);
        let mut memo = self.memo.write();
        Arc::clone(memo.entry(node.path().clone()).or_insert(rendered))
    }

    /// Number of memoized files.
    #[must_use]
    pub fn memoized(&self) -> usize {
        self.memo.read().len()
    }

    /// Drops every memoized rendering.
    pub fn clear(&self) {
        self.memo.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::MemorySource;

    fn graph(files: &[(&str, &str)], root: &str) -> Arc<IncludeGraph> {
        let source = MemorySource::from_files("t", files.iter().copied());
        Arc::new(IncludeGraph::build(&source, &[PackPath::new(root)]).unwrap())
    }

    #[test]
    fn test_flatten_inlines_at_include_line() {
        let g = graph(
            &[
                ("/a.fsh", "#version 120\n#include \"/lib/b.glsl\"\nvoid main() {}"),
                ("/lib/b.glsl", "float b1;\nfloat b2;"),
            ],
            "/a.fsh",
        );
        let p = IncludeProcessor::new(g);
        let text = p.flatten(&PackPath::new("/a.fsh")).unwrap();
        assert_eq!(&*text, "#version 120\nfloat b1;\nfloat b2;\nvoid main() {}");
    }

    #[test]
    fn test_missing_include_renders_stub() {
        let g = graph(&[("/a.fsh", "x;\n#include \"gone.glsl\"\ny;")], "/a.fsh");
        let p = IncludeProcessor::new(g);
        let text = p.flatten(&PackPath::new("/a.fsh")).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with(MISSING_INCLUDE_MARKER));
        assert!(lines[1].contains("/gone.glsl"));
    }

    #[test]
    fn test_diamond_include_renders_identically() {
        let g = graph(
            &[
                ("/a.fsh", "#include \"b.glsl\"\n#include \"c.glsl\""),
                ("/b.glsl", "#include \"d.glsl\""),
                ("/c.glsl", "#include \"d.glsl\""),
                ("/d.glsl", "float d;"),
            ],
            "/a.fsh",
        );
        let p = IncludeProcessor::new(g);
        let text = p.flatten(&PackPath::new("/a.fsh")).unwrap();
        assert_eq!(&*text, "float d;\nfloat d;");
        assert_eq!(p.memoized(), 4);
    }

    #[test]
    fn test_unknown_file_is_an_error() {
        let g = graph(&[("/a.fsh", "")], "/a.fsh");
        let p = IncludeProcessor::new(g);
        assert!(matches!(
            p.flatten(&PackPath::new("/b.fsh")),
            Err(PackError::FileNotInGraph(_))
        ));
    }
}
