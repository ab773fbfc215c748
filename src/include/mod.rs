//! Include Handling
//!
//! - [`FileNode`]: one file's line snapshot and include directives
//! - [`IncludeGraph`]: all reachable files, validated acyclic at construction
//! - [`IncludeProcessor`]: memoized flattening of a graph entry
//!
//! The non-flattening mode reuses only the resolution rules from
//! [`PackPath::resolve_sibling`](crate::pack::PackPath::resolve_sibling); see
//! [`crate::backend::PackIncludeResolver`].

pub mod graph;
pub mod node;
pub mod processor;

pub use graph::IncludeGraph;
pub use node::{FileNode, IncludeDirective, IncludeKind, IncludeLine, include_lines, parse_include};
pub use processor::{IncludeProcessor, MISSING_INCLUDE_MARKER};
