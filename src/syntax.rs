//! Line-level GLSL lexing helpers.
//!
//! Rewrites in the preprocessor and modernizer operate on code only. These
//! helpers split a line into code and comment segments (tracking `/* */`
//! state across lines) and find identifier tokens with word boundaries, so a
//! rewrite never lands inside a comment or inside a longer identifier.

use std::borrow::Cow;

use smallvec::SmallVec;

/// A piece of one source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub text: &'a str,
    pub is_code: bool,
}

/// Splits `line` into code and comment segments. `in_block` carries the
/// block-comment state into and out of the line.
#[must_use]
pub fn split_line<'a>(line: &'a str, in_block: &mut bool) -> SmallVec<[Segment<'a>; 4]> {
    let mut out = SmallVec::new();
    let bytes = line.as_bytes();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if *in_block {
            if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                i += 2;
                out.push(Segment {
                    text: &line[start..i],
                    is_code: false,
                });
                start = i;
                *in_block = false;
            } else {
                i += 1;
            }
            continue;
        }
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'/') {
            if start < i {
                out.push(Segment {
                    text: &line[start..i],
                    is_code: true,
                });
            }
            out.push(Segment {
                text: &line[i..],
                is_code: false,
            });
            return out;
        }
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            if start < i {
                out.push(Segment {
                    text: &line[start..i],
                    is_code: true,
                });
            }
            start = i;
            i += 2;
            *in_block = true;
            continue;
        }
        i += 1;
    }

    if start < line.len() {
        out.push(Segment {
            text: &line[start..],
            is_code: !*in_block,
        });
    }
    out
}

/// The code of `line` with comments removed.
#[must_use]
pub fn code_of(line: &str, in_block: &mut bool) -> String {
    split_line(line, in_block)
        .iter()
        .filter(|s| s.is_code)
        .map(|s| s.text)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Applies `rewrite` to every code segment of `line`, keeping comments as
/// they are.
pub fn rewrite_code(line: &str, in_block: &mut bool, mut rewrite: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(line.len());
    for seg in split_line(line, in_block) {
        if seg.is_code {
            out.push_str(&rewrite(seg.text));
        } else {
            out.push_str(seg.text);
        }
    }
    out
}

#[inline]
#[must_use]
pub fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
#[must_use]
pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Identifier tokens of a code fragment with their byte offsets. Numeric
/// literals (including suffixes and exponents) are skipped.
pub fn identifiers(code: &str) -> impl Iterator<Item = (usize, &str)> {
    let bytes = code.as_bytes();
    let mut i = 0;
    std::iter::from_fn(move || {
        while i < bytes.len() {
            let c = bytes[i] as char;
            if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
                while i < bytes.len() && (is_ident_char(bytes[i] as char) || bytes[i] == b'.') {
                    i += 1;
                }
            } else if is_ident_start(c) {
                let start = i;
                while i < bytes.len() && is_ident_char(bytes[i] as char) {
                    i += 1;
                }
                return Some((start, &code[start..i]));
            } else {
                i += 1;
            }
        }
        None
    })
}

/// `true` if `name` appears in `code` as a whole identifier.
#[must_use]
pub fn contains_identifier(code: &str, name: &str) -> bool {
    identifiers(code).any(|(_, id)| id == name)
}

/// Replaces whole identifier tokens for which `replace` returns a value.
pub fn replace_identifiers<'a>(
    code: &str,
    mut replace: impl FnMut(&str) -> Option<Cow<'a, str>>,
) -> String {
    let mut out = String::with_capacity(code.len());
    let mut last = 0;
    for (start, id) in identifiers(code) {
        if let Some(replacement) = replace(id) {
            out.push_str(&code[last..start]);
            out.push_str(&replacement);
            last = start + id.len();
        }
    }
    out.push_str(&code[last..]);
    out
}

/// Leading whitespace of a line.
#[must_use]
pub fn indentation(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}
