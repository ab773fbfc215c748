//! Restricted Preprocessor
//!
//! Strips conditional blocks and expands object-like macros before syntax
//! modernization, so the modernizer only ever sees the branch the user's
//! option values select.
//!
//! # Supported directives
//!
//! | Directive | Behaviour |
//! |---|---|
//! | `#define NAME [VALUE]` | Adds to the macro table (function-like macros pass through) |
//! | `#undef NAME` | Removes from the macro table |
//! | `#ifdef` / `#ifndef` | Tests whether a macro is defined |
//! | `#if EXPR` / `#elif EXPR` | `defined(X)`, `!`, `&&`, `\|\|`, parentheses, integer comparisons |
//! | `#else` / `#endif` | Close or flip the current frame |
//! | anything else | Emitted unchanged when active |
//!
//! Conditional and macro directives are consumed and never emitted. Names of
//! discovered `#define` options are locked: in-source definitions of them are
//! ignored, so the user's choice always wins.
//!
//! Unsupported `#if` expressions evaluate to false and produce an
//! [`DiagnosticKind::UnsupportedDirective`] diagnostic. Unbalanced blocks
//! produce [`DiagnosticKind::UnbalancedConditional`]; output is still returned.

pub mod defines;
mod expr;

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

pub use defines::MacroSet;

use crate::errors::{Diagnostic, DiagnosticKind};
use crate::options::OptionValues;
use crate::settings::PipelineSettings;
use crate::syntax;

/// Built-in type names never replaced by macro expansion.
const BUILTIN_TYPES: &[&str] = &[
    "void", "bool", "int", "uint", "float", "double", "vec2", "vec3", "vec4", "ivec2", "ivec3",
    "ivec4", "uvec2", "uvec3", "uvec4", "bvec2", "bvec3", "bvec4", "dvec2", "dvec3", "dvec4",
    "mat2", "mat3", "mat4", "mat2x2", "mat2x3", "mat2x4", "mat3x2", "mat3x3", "mat3x4", "mat4x2",
    "mat4x3", "mat4x4", "sampler1D", "sampler2D", "sampler3D", "samplerCube", "sampler2DShadow",
    "sampler2DArray", "sampler2DRect", "image2D", "image3D",
];

/// Expansion depth at which self-referential macro chains are cut off.
const MAX_EXPANSION_DEPTH: usize = 32;

static DIRECTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#\s*([A-Za-z_]+)\s*(.*)$").expect("directive regex"));

static DEFINE_BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)(\(?)(.*)$").expect("define body regex"));

static CONST_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*const\s+\w+\s+)([A-Za-z_]\w*)(\s*=\s*)([^;]+?)(\s*;.*)$").expect("const regex")
});

/// One open `#if`-family block.
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// The current branch is selected.
    active: bool,
    /// Some branch of this block has already been selected.
    taken: bool,
    seen_else: bool,
    /// Every enclosing frame is active.
    parent_active: bool,
    /// 1-based line of the opening directive.
    opened_at: usize,
}

/// Output of [`Preprocessor::process`].
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
    /// The macro table as it stood at end of input.
    pub macros: MacroSet,
}

/// Macro table seeded with platform constants and option values.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    macros: MacroSet,
    locked: FxHashSet<String>,
    constants: FxHashMap<String, String>,
}

impl Preprocessor {
    /// A preprocessor seeded with the platform constants of `settings`.
    #[must_use]
    pub fn new(settings: &PipelineSettings) -> Self {
        let mut macros = MacroSet::with_capacity(settings.platform_defines.len());
        for (name, value) in &settings.platform_defines {
            macros.set(name, value);
        }
        Self {
            macros,
            locked: FxHashSet::default(),
            constants: FxHashMap::default(),
        }
    }

    /// Adds the user's option values: `#define` options become macros (and
    /// are locked), `const` options become initializer overrides.
    #[must_use]
    pub fn with_options(mut self, values: &OptionValues) -> Self {
        self.macros.merge(&values.to_macros());
        self.locked
            .extend(values.define_names().map(str::to_string));
        self.constants.extend(values.constant_values());
        self
    }

    pub fn define(&mut self, name: &str, value: &str) {
        self.macros.set(name, value);
    }

    /// The seed macro table.
    #[inline]
    #[must_use]
    pub fn macros(&self) -> &MacroSet {
        &self.macros
    }

    #[must_use]
    pub fn is_locked(&self, name: &str) -> bool {
        self.locked.contains(name)
    }

    /// Runs conditional stripping and macro expansion over one file.
    #[must_use]
    pub fn process(&self, file: &str, text: &str) -> Preprocessed {
        let mut run = Run {
            pp: self,
            file,
            macros: self.macros.clone(),
            frames: Vec::new(),
            diagnostics: Vec::new(),
            in_block: false,
        };
        let mut out: Vec<Cow<'_, str>> = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            let starts_in_comment = run.in_block;
            // Directives are recognized only on lines that start as code.
            let directive = if starts_in_comment {
                None
            } else {
                DIRECTIVE_RE.captures(line)
            };

            if let Some(caps) = directive {
                // Keep block-comment state in sync for trailing comments.
                let _ = syntax::code_of(line, &mut run.in_block);
                let name = caps.get(1).map_or("", |m| m.as_str());
                let rest = caps.get(2).map_or("", |m| m.as_str());
                if run.directive(name, rest, idx + 1, line) {
                    out.push(Cow::Borrowed(line));
                }
                continue;
            }

            if run.active() {
                out.push(Cow::Owned(run.expand_line(line)));
            } else {
                let _ = syntax::code_of(line, &mut run.in_block);
            }
        }

        for frame in run.frames.iter().rev() {
            run.diagnostics.push(
                Diagnostic::new(
                    DiagnosticKind::UnbalancedConditional,
                    file,
                    "conditional block is never closed",
                )
                .at_line(frame.opened_at, text.lines().nth(frame.opened_at - 1).unwrap_or_default()),
            );
        }
        for diag in &run.diagnostics {
            diag.log();
        }

        Preprocessed {
            text: out.join("\n"),
            diagnostics: run.diagnostics,
            macros: run.macros,
        }
    }
}

/// State of one `process` call.
struct Run<'a> {
    pp: &'a Preprocessor,
    file: &'a str,
    macros: MacroSet,
    frames: Vec<Frame>,
    diagnostics: Vec<Diagnostic>,
    in_block: bool,
}

impl Run<'_> {
    fn active(&self) -> bool {
        self.frames
            .last()
            .is_none_or(|f| f.active && f.parent_active)
    }

    fn warn(&mut self, kind: DiagnosticKind, line: usize, snippet: &str, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::new(kind, self.file, message).at_line(line, snippet));
    }

    fn open(&mut self, condition: bool, line: usize) {
        let parent_active = self.active();
        let active = parent_active && condition;
        self.frames.push(Frame {
            active,
            taken: active,
            seen_else: false,
            parent_active,
            opened_at: line,
        });
    }

    fn eval(&mut self, expr: &str, line: usize, snippet: &str) -> bool {
        if !self.active() {
            return false;
        }
        match expr::evaluate(strip_comment(expr), &self.macros) {
            Ok(value) => value,
            Err(reason) => {
                self.warn(
                    DiagnosticKind::UnsupportedDirective,
                    line,
                    snippet,
                    format!("cannot evaluate condition ({reason}); treating it as false"),
                );
                false
            }
        }
    }

    /// Handles one directive line. Returns `true` when the line is emitted.
    fn directive(&mut self, name: &str, rest: &str, line: usize, snippet: &str) -> bool {
        match name {
            "ifdef" | "ifndef" => {
                let target = first_word(rest);
                let defined = self.macros.contains(target);
                self.open(defined == (name == "ifdef"), line);
                false
            }
            "if" => {
                let value = self.eval(rest, line, snippet);
                self.open(value, line);
                false
            }
            "elif" => {
                let Some(frame) = self.frames.last().copied() else {
                    self.warn(DiagnosticKind::UnbalancedConditional, line, snippet, "#elif without #if");
                    return false;
                };
                if frame.seen_else {
                    self.warn(DiagnosticKind::UnbalancedConditional, line, snippet, "#elif after #else");
                }
                let value = !frame.taken
                    && !frame.seen_else
                    && frame.parent_active
                    && {
                        // Evaluate as if the enclosing frames alone were active.
                        let saved = self.frames.pop();
                        let v = self.eval(rest, line, snippet);
                        self.frames.extend(saved);
                        v
                    };
                if let Some(f) = self.frames.last_mut() {
                    f.active = value;
                    f.taken |= value;
                }
                false
            }
            "else" => {
                let Some(frame) = self.frames.last_mut() else {
                    self.warn(DiagnosticKind::UnbalancedConditional, line, snippet, "#else without #if");
                    return false;
                };
                let duplicate = frame.seen_else;
                frame.active = !frame.taken && !frame.seen_else;
                frame.taken |= frame.active;
                frame.seen_else = true;
                if duplicate {
                    self.warn(DiagnosticKind::UnbalancedConditional, line, snippet, "duplicate #else");
                }
                false
            }
            "endif" => {
                if self.frames.pop().is_none() {
                    self.warn(DiagnosticKind::UnbalancedConditional, line, snippet, "#endif without #if");
                }
                false
            }
            "define" => self.define(rest),
            "undef" => {
                if self.active() {
                    let target = first_word(rest);
                    if self.pp.is_locked(target) {
                        log::trace!("{}:{line}: ignoring #undef of option {target}", self.file);
                    } else {
                        self.macros.remove(target);
                    }
                }
                false
            }
            _ => self.active(),
        }
    }

    /// Returns `true` for function-like macros, which are emitted unchanged.
    fn define(&mut self, rest: &str) -> bool {
        if !self.active() {
            return false;
        }
        let Some(caps) = DEFINE_BODY_RE.captures(rest.trim_start()) else {
            return false;
        };
        if !caps[2].is_empty() {
            return true;
        }
        let name = &caps[1];
        if self.pp.is_locked(name) {
            log::trace!("{}: ignoring in-source #define of option {name}", self.file);
            return false;
        }
        let value = strip_comment(&caps[3]).trim();
        self.macros.set(name, value);
        false
    }

    fn expand_line(&mut self, line: &str) -> String {
        let line = self.rewrite_constant(line);
        let macros = &self.macros;
        syntax::rewrite_code(&line, &mut self.in_block, |code| {
            let mut guard = SmallVec::new();
            expand(code, macros, &mut guard)
        })
    }

    /// Replaces the initializer of a `const` option with the user's value.
    fn rewrite_constant<'l>(&self, line: &'l str) -> Cow<'l, str> {
        if self.pp.constants.is_empty() {
            return Cow::Borrowed(line);
        }
        let Some(caps) = CONST_DECL_RE.captures(line) else {
            return Cow::Borrowed(line);
        };
        match self.pp.constants.get(&caps[2]) {
            Some(value) => Cow::Owned(format!("{}{}{}{value}{}", &caps[1], &caps[2], &caps[3], &caps[5])),
            None => Cow::Borrowed(line),
        }
    }
}

/// Expands every macro in `code`. `guard` holds the names currently being
/// expanded, so recursive definitions stop instead of looping.
fn expand(code: &str, macros: &MacroSet, guard: &mut SmallVec<[String; 4]>) -> String {
    if guard.len() >= MAX_EXPANSION_DEPTH {
        return code.to_string();
    }
    syntax::replace_identifiers(code, |id| {
        if BUILTIN_TYPES.contains(&id) || guard.iter().any(|g| g == id) {
            return None;
        }
        let value = macros.get(id)?;
        guard.push(id.to_string());
        let expanded = expand(value, macros, guard);
        guard.pop();
        Some(Cow::Owned(expanded))
    })
}

fn first_word(text: &str) -> &str {
    text.split(|c: char| !syntax::is_ident_char(c))
        .find(|w| !w.is_empty())
        .unwrap_or_default()
}

fn strip_comment(text: &str) -> &str {
    let end = [text.find("//"), text.find("/*")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(text.len());
    &text[..end]
}
