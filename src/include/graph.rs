//! Include Graph
//!
//! Owns every [`FileNode`] reachable from a set of root files and guarantees
//! the inclusion relation is acyclic.
//!
//! # Construction
//!
//! [`IncludeGraph::build`] loads the roots, parses their include directives and
//! keeps loading targets until no new file is reachable. Targets that do not
//! exist are recorded as [`DiagnosticKind::MissingInclude`] warnings but stay in
//! the including node's directive map, so later stages can render a stub for
//! them.
//!
//! Once loading finishes, a depth-first search with an on-path marker looks for
//! a back edge. Finding one fails construction with
//! [`PackError::GraphCycle`], carrying the concrete cyclic path. A graph value
//! therefore never exists in a cyclic state.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use super::node::FileNode;
use crate::errors::{Diagnostic, DiagnosticKind, PackError, Result};
use crate::pack::{PackPath, PackSource};
use crate::settings::PipelineSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    OnPath,
    Done,
}

/// The set of loaded files keyed by pack path, in load order.
#[derive(Debug, Default)]
pub struct IncludeGraph {
    nodes: Vec<FileNode>,
    index: FxHashMap<PackPath, usize>,
    warnings: Vec<Diagnostic>,
}

impl IncludeGraph {
    /// Loads every file reachable from `roots` and validates acyclicity.
    ///
    /// A root that cannot be read is an error; a missing include target is a
    /// warning.
    pub fn build(source: &dyn PackSource, roots: &[PackPath]) -> Result<Self> {
        let mut graph = Self::default();
        let mut queue: VecDeque<PackPath> = roots.iter().cloned().collect();
        let mut queued: FxHashSet<PackPath> = roots.iter().cloned().collect();

        while let Some(path) = queue.pop_front() {
            let text = source.read_to_string(&path)?;
            let node = FileNode::parse(path, &text);

            for (&line, target) in node.includes() {
                if queued.contains(target) {
                    continue;
                }
                if source.exists(target) {
                    queued.insert(target.clone());
                    queue.push_back(target.clone());
                } else {
                    let diag = Diagnostic::new(
                        DiagnosticKind::MissingInclude,
                        node.path().as_str(),
                        format!("include target {target} does not exist"),
                    )
                    .at_line(line + 1, &node.lines()[line]);
                    diag.log();
                    graph.warnings.push(diag);
                }
            }

            graph.index.insert(node.path().clone(), graph.nodes.len());
            graph.nodes.push(node);
        }

        if let Some(cycle) = graph.find_cycle() {
            log::error!(
                "Include cycle: {}",
                cycle.iter().map(PackPath::as_str).collect::<Vec<_>>().join(" -> ")
            );
            return Err(PackError::GraphCycle { cycle });
        }

        log::debug!(
            "Include graph built: {} files, {} missing includes",
            graph.nodes.len(),
            graph.warnings.len()
        );
        Ok(graph)
    }

    /// Builds the graph of a whole pack: every file with a shader extension is
    /// a root.
    pub fn build_pack(source: &dyn PackSource, settings: &PipelineSettings) -> Result<Self> {
        let roots: Vec<PackPath> = source
            .list_files()?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|e| settings.is_shader_extension(e)))
            .collect();
        Self::build(source, &roots)
    }

    /// Depth-first search in load order; children in line order. Returns the
    /// first cycle found, closed (first element repeated at the end).
    fn find_cycle(&self) -> Option<Vec<PackPath>> {
        let adjacency: Vec<Vec<usize>> = self
            .nodes
            .iter()
            .map(|n| {
                n.includes()
                    .values()
                    .filter_map(|t| self.index.get(t).copied())
                    .collect()
            })
            .collect();

        let mut state = vec![Visit::New; self.nodes.len()];
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for start in 0..self.nodes.len() {
            if state[start] != Visit::New {
                continue;
            }
            state[start] = Visit::OnPath;
            stack.push((start, 0));

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                if let Some(&child) = adjacency[node].get(frame.1) {
                    frame.1 += 1;
                    match state[child] {
                        Visit::OnPath => {
                            let from = stack.iter().position(|&(n, _)| n == child).unwrap_or(0);
                            let mut cycle: Vec<PackPath> = stack[from..]
                                .iter()
                                .map(|&(n, _)| self.nodes[n].path().clone())
                                .collect();
                            cycle.push(self.nodes[child].path().clone());
                            return Some(cycle);
                        }
                        Visit::New => {
                            state[child] = Visit::OnPath;
                            stack.push((child, 0));
                        }
                        Visit::Done => {}
                    }
                } else {
                    state[node] = Visit::Done;
                    stack.pop();
                }
            }
        }
        None
    }

    #[must_use]
    pub fn node(&self, path: &PackPath) -> Option<&FileNode> {
        self.index.get(path).map(|&i| &self.nodes[i])
    }

    #[must_use]
    pub fn contains(&self, path: &PackPath) -> bool {
        self.index.contains_key(path)
    }

    /// Nodes in load order.
    #[must_use]
    pub fn nodes(&self) -> &[FileNode] {
        &self.nodes
    }

    pub fn paths(&self) -> impl Iterator<Item = &PackPath> {
        self.nodes.iter().map(FileNode::path)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Missing-include warnings collected during construction.
    #[must_use]
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Every file `path` pulls in, directly or transitively, in first-visit
    /// order. Missing targets are not listed.
    #[must_use]
    pub fn transitive_includes(&self, path: &PackPath) -> Vec<PackPath> {
        let mut seen: FxHashSet<&PackPath> = FxHashSet::default();
        let mut out = Vec::new();
        let mut stack: Vec<&PackPath> = vec![path];
        while let Some(current) = stack.pop() {
            let Some(node) = self.node(current) else {
                continue;
            };
            for target in node.includes().values().rev() {
                if self.contains(target) && seen.insert(target) {
                    stack.push(target);
                }
            }
            if current != path {
                out.push(current.clone());
            }
        }
        out
    }
}
