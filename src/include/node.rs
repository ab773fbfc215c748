//! Source file snapshots and include-directive parsing.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::pack::PackPath;
use crate::syntax;

static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*#\s*include\s*(?:"([^"]*)"|<([^>]*)>)"#).expect("include regex")
});

/// Syntax used by an include directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncludeKind {
    /// `#include "path"`
    Quoted,
    /// `#include <path>`
    Angle,
}

/// A parsed `#include` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective<'a> {
    pub target: &'a str,
    pub kind: IncludeKind,
}

/// Parses an include directive, tolerating whitespace around `#` and both
/// quoted and angle-bracket forms. Returns `None` for any other line and for
/// an empty target.
#[must_use]
pub fn parse_include(line: &str) -> Option<IncludeDirective<'_>> {
    let caps = INCLUDE_RE.captures(line)?;
    let (target, kind) = match (caps.get(1), caps.get(2)) {
        (Some(m), _) => (m.as_str(), IncludeKind::Quoted),
        (_, Some(m)) => (m.as_str(), IncludeKind::Angle),
        _ => return None,
    };
    let target = target.trim();
    (!target.is_empty()).then_some(IncludeDirective { target, kind })
}

/// An include directive found in a file, with its 0-based line index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeLine {
    pub index: usize,
    pub target: String,
    pub kind: IncludeKind,
}

/// Every include directive of `text` that is not commented out, in line
/// order. Block comments spanning several lines are honored.
#[must_use]
pub fn include_lines(text: &str) -> Vec<IncludeLine> {
    let mut in_block = false;
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let code = syntax::code_of(line, &mut in_block);
            parse_include(&code).map(|inc| IncludeLine {
                index,
                target: inc.target.to_string(),
                kind: inc.kind,
            })
        })
        .collect()
}

/// One source file: an immutable line snapshot taken at load time plus the
/// include directives found in it.
#[derive(Debug, Clone)]
pub struct FileNode {
    path: PackPath,
    lines: Arc<[String]>,
    /// 0-based line index → resolved include target.
    includes: BTreeMap<usize, PackPath>,
}

impl FileNode {
    /// Snapshots `text` and resolves every include directive relative to `path`.
    #[must_use]
    pub fn parse(path: PackPath, text: &str) -> Self {
        let lines: Arc<[String]> = text.lines().map(str::to_string).collect();
        let includes = include_lines(text)
            .into_iter()
            .map(|inc| (inc.index, path.resolve_sibling(&inc.target)))
            .collect();
        Self {
            path,
            lines,
            includes,
        }
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &PackPath {
        &self.path
    }

    #[inline]
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Include directives keyed by 0-based line index, in line order.
    #[inline]
    #[must_use]
    pub fn includes(&self) -> &BTreeMap<usize, PackPath> {
        &self.includes
    }

    #[must_use]
    pub fn include_at(&self, line: usize) -> Option<&PackPath> {
        self.includes.get(&line)
    }

    /// The original text, lines joined with `\n`.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_include_forms() {
        let q = parse_include(r#"#include "/lib/common.glsl""#).unwrap();
        assert_eq!(q.target, "/lib/common.glsl");
        assert_eq!(q.kind, IncludeKind::Quoted);

        let a = parse_include("  #  include <util.glsl> // trailing").unwrap();
        assert_eq!(a.target, "util.glsl");
        assert_eq!(a.kind, IncludeKind::Angle);

        assert!(parse_include("// #include \"x\"").is_none());
        assert!(parse_include("#include \"\"").is_none());
        assert!(parse_include("#define include").is_none());
    }

    #[test]
    fn test_file_node_resolves_targets() {
        let node = FileNode::parse(
            PackPath::new("/world1/gbuffers.fsh"),
            "#version 120\n#include \"../lib/a.glsl\"\nvoid main() {}\n#include </lib/b.glsl>",
        );
        assert_eq!(node.lines().len(), 4);
        assert_eq!(node.include_at(1), Some(&PackPath::new("/lib/a.glsl")));
        assert_eq!(node.include_at(3), Some(&PackPath::new("/lib/b.glsl")));
        assert_eq!(node.includes().len(), 2);
    }

    #[test]
    fn test_commented_includes_are_ignored() {
        let node = FileNode::parse(
            PackPath::new("/a.fsh"),
            "/*\n#include \"/lib/old.glsl\"\n*/\n// #include \"/lib/x.glsl\"\n/* note */ #include \"/lib/new.glsl\"",
        );
        assert_eq!(node.includes().len(), 1);
        assert_eq!(node.include_at(4), Some(&PackPath::new("/lib/new.glsl")));
    }
}
