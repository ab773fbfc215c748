//! Whole-file analysis helpers for the rewrite passes.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::syntax;

static LAYOUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*layout\s*\(([^)]*)\)\s*").expect("layout regex"));

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#\s*version\b").expect("version regex"));

static EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#\s*extension\b").expect("extension regex"));

/// Code of one line and the brace depth at its start.
#[derive(Debug, Clone)]
pub struct LineInfo {
    pub code: String,
    pub depth: i32,
}

/// Strips comments from every line and tracks brace depth.
#[must_use]
pub fn analyze(lines: &[String]) -> Vec<LineInfo> {
    let mut in_block = false;
    let mut depth = 0i32;
    lines
        .iter()
        .map(|line| {
            let code = syntax::code_of(line, &mut in_block);
            let info = LineInfo { code, depth };
            for c in info.code.chars() {
                match c {
                    '{' => depth += 1,
                    '}' => depth = (depth - 1).max(0),
                    _ => {}
                }
            }
            info
        })
        .collect()
}

#[must_use]
pub fn is_version_line(line: &str) -> bool {
    VERSION_RE.is_match(line)
}

#[must_use]
pub fn is_extension_line(line: &str) -> bool {
    EXTENSION_RE.is_match(line)
}

/// Index after the `#version` line and any `#extension` lines that directly
/// follow it (blank and comment-only lines in between are skipped).
#[must_use]
pub fn insertion_point(lines: &[String]) -> usize {
    let Some(version) = lines.iter().position(|l| is_version_line(l)) else {
        return 0;
    };
    let mut end = version + 1;
    for (idx, line) in lines.iter().enumerate().skip(version + 1) {
        let trimmed = line.trim();
        if is_extension_line(line) {
            end = idx + 1;
        } else if !(trimmed.is_empty() || trimmed.starts_with("//")) {
            break;
        }
    }
    end
}

/// Splits on `sep` outside parentheses and brackets.
#[must_use]
pub fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Byte index of the `)` matching the `(` at `open`.
#[must_use]
pub fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// A `layout(...)` prefix split off a declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    /// Qualifiers other than `location`, `binding` and `set`, in order.
    pub others: Vec<String>,
    pub location: Option<u32>,
    pub binding: Option<u32>,
    pub set: Option<u32>,
}

impl Layout {
    /// Renders `layout(...)` with the given extra qualifiers appended.
    #[must_use]
    pub fn render(&self, extra: &[String]) -> String {
        let all: Vec<&str> = self
            .others
            .iter()
            .chain(extra)
            .map(String::as_str)
            .collect();
        format!("layout({})", all.join(", "))
    }
}

/// Splits a leading `layout(...)` off `code`. Returns the layout (if any) and
/// the remaining text.
#[must_use]
pub fn take_layout(code: &str) -> (Option<Layout>, &str) {
    let Some(caps) = LAYOUT_RE.captures(code) else {
        return (None, code);
    };
    let mut layout = Layout::default();
    for qualifier in caps[1].split(',') {
        let qualifier = qualifier.trim();
        if qualifier.is_empty() {
            continue;
        }
        let (key, value) = match qualifier.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim().parse::<u32>().ok()),
            None => (qualifier, None),
        };
        match key {
            "location" => layout.location = value,
            "binding" => layout.binding = value,
            "set" => layout.set = value,
            _ => layout.others.push(qualifier.to_string()),
        }
    }
    let rest_start = caps.get(0).map_or(0, |m| m.end());
    (Some(layout), &code[rest_start..])
}

/// Number of interface slots taken by a variable of type `ty` with an optional
/// array suffix such as `[4]`.
#[must_use]
pub fn slot_count(ty: &str, array: &str) -> u32 {
    let columns = match ty {
        "mat2" | "mat2x2" | "mat2x3" | "mat2x4" | "dmat2" => 2,
        "mat3" | "mat3x2" | "mat3x3" | "mat3x4" | "dmat3" => 3,
        "mat4" | "mat4x2" | "mat4x3" | "mat4x4" | "dmat4" => 4,
        _ => 1,
    };
    let elements: u32 = array
        .split(['[', ']'])
        .filter_map(|n| n.trim().parse::<u32>().ok())
        .product();
    columns * elements.max(1)
}

/// `true` for sampler, image and other types that must bind individually.
#[must_use]
pub fn is_opaque_type(ty: &str) -> bool {
    fn base(ty: &str) -> bool {
        ["sampler", "image", "texture", "subpassInput"]
            .iter()
            .any(|p| ty.starts_with(p))
    }
    ty == "atomic_uint" || base(ty) || ty.strip_prefix(['i', 'u']).is_some_and(base)
}

/// Hands out interface locations or binding indices in ascending order,
/// skipping reserved ones.
#[derive(Debug, Clone, Default)]
pub struct SlotAllocator {
    next: u32,
    reserved: BTreeSet<u32>,
}

impl SlotAllocator {
    #[must_use]
    pub fn starting_at(next: u32) -> Self {
        Self {
            next,
            reserved: BTreeSet::new(),
        }
    }

    pub fn reserve(&mut self, start: u32, count: u32) {
        self.reserved.extend(start..start + count.max(1));
    }

    /// First run of `count` free slots at or after the cursor.
    pub fn allocate(&mut self, count: u32) -> u32 {
        let count = count.max(1);
        let mut start = self.next;
        while (start..start + count).any(|s| self.reserved.contains(&s)) {
            start += 1;
        }
        self.next = start + count;
        start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_insertion_point() {
        let l = lines("// header\n#version 450\n\n#extension GL_A : enable\n// note\n#extension GL_B : enable\nvoid main() {}");
        assert_eq!(insertion_point(&l), 6);
        assert_eq!(insertion_point(&lines("void main() {}")), 0);
    }

    #[test]
    fn test_analyze_depth_ignores_comments() {
        let info = analyze(&lines("void f() { // {\n  x;\n}\n/* { */ y;"));
        let depths: Vec<_> = info.iter().map(|i| i.depth).collect();
        assert_eq!(depths, [0, 1, 1, 0]);
    }

    #[test]
    fn test_take_layout() {
        let (layout, rest) = take_layout("layout(rgba8, binding = 3) uniform image2D img;");
        let layout = layout.unwrap();
        assert_eq!(layout.binding, Some(3));
        assert_eq!(layout.others, ["rgba8"]);
        assert_eq!(rest, "uniform image2D img;");
        assert_eq!(layout.render(&["set = 0".into()]), "layout(rgba8, set = 0)");
    }

    #[test]
    fn test_slot_count() {
        assert_eq!(slot_count("vec4", ""), 1);
        assert_eq!(slot_count("mat4", ""), 4);
        assert_eq!(slot_count("vec2", "[3]"), 3);
        assert_eq!(slot_count("mat3", "[2]"), 6);
    }

    #[test]
    fn test_allocator_skips_reserved() {
        let mut alloc = SlotAllocator::default();
        alloc.reserve(1, 2);
        assert_eq!(alloc.allocate(1), 0);
        assert_eq!(alloc.allocate(1), 3);
        assert_eq!(alloc.allocate(4), 4);
        assert_eq!(alloc.allocate(1), 8);
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(split_top_level("a, b[2], c", ','), ["a", " b[2]", " c"]);
        assert_eq!(split_top_level("f(a, b), c", ','), ["f(a, b)", " c"]);
    }
}
