//! Option Discovery
//!
//! Scans every shader-extension file of a pack for two declaration shapes:
//!
//! ```glsl
//! #define BLOOM                      // boolean, enabled by default
//! //#define MOTION_BLUR              // boolean, disabled by default
//! #define SHADOW_QUALITY 1 // [0 1 2] Off Medium High
//! const int shadowMapResolution = 2048; // [1024 2048 4096]
//! ```
//!
//! `const` declarations are only considered for names on
//! [`PipelineSettings::tunable_constants`]. Malformed lines are skipped with a
//! [`DiagnosticKind::Discovery`] diagnostic; discovery itself never fails.
//!
//! Files are scanned in sorted path order and lines in order, so the first
//! declaration of a name is deterministic and wins.

use std::sync::{Arc, LazyLock};
use std::time::SystemTime;

use parking_lot::RwLock;
use regex::Regex;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::Xxh3;

use super::model::{
    BooleanOption, DeclarationKind, EnumOption, OptionOrigin, OptionSet, ShaderOption,
};
use crate::errors::{Diagnostic, DiagnosticKind, Result};
use crate::pack::{PackPath, PackSource};
use crate::settings::PipelineSettings;

static DEFINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(//+)?\s*#\s*define\s+([A-Za-z_]\w*)(.*)$").expect("define regex")
});

static CONST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*const\s+(\w+)\s+([A-Za-z_]\w*)\s*=\s*([^;]+?)\s*;(.*)$").expect("const regex")
});

static IFNDEF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#\s*ifndef\s+([A-Za-z_]\w*)").expect("ifndef regex"));

static BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([^\]]*)\]\s*(.*)$").expect("bracket regex"));

/// Parsed `[v1 v2 ...] label1 label2 ...` comment.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ValueList {
    values: Vec<String>,
    labels: Vec<String>,
}

/// Parses the trailing comment of a declaration. `Some(Err(()))` means the
/// bracket list is present but empty.
fn parse_value_list(comment: &str) -> Option<std::result::Result<ValueList, ()>> {
    let caps = BRACKET_RE.captures(comment)?;
    let values: Vec<String> = caps[1].split_whitespace().map(str::to_string).collect();
    if values.is_empty() {
        return Some(Err(()));
    }
    let mut labels: Vec<String> = caps[2].split_whitespace().map(str::to_string).collect();
    labels.truncate(values.len());
    labels.extend(values[labels.len()..].iter().cloned());
    Some(Ok(ValueList { values, labels }))
}

/// Splits `value // comment` into its trimmed halves.
fn split_comment(rest: &str) -> (&str, Option<&str>) {
    match rest.find("//") {
        Some(i) => (rest[..i].trim(), Some(rest[i..].trim_start_matches('/').trim())),
        None => (rest.trim(), None),
    }
}

/// Result of looking at one source line.
enum LineOutcome {
    Option(ShaderOption),
    Malformed(String),
    Ignored,
}

struct FileScanner<'a> {
    path: &'a PackPath,
    settings: &'a PipelineSettings,
}

impl FileScanner<'_> {
    fn origin(&self, line: usize) -> OptionOrigin {
        OptionOrigin {
            file: self.path.clone(),
            line,
        }
    }

    fn scan_line(&self, text: &str, line: usize, guard: Option<&str>) -> LineOutcome {
        if let Some(caps) = DEFINE_RE.captures(text) {
            let name = &caps[2];
            let rest = &caps[3];
            // Function-like macros and include guards are never options.
            if rest.starts_with('(') || guard == Some(name) {
                return LineOutcome::Ignored;
            }
            let commented = caps.get(1).is_some();
            let (value, comment) = split_comment(rest);
            return self.define_option(name, value, comment, commented, line);
        }
        if let Some(caps) = CONST_RE.captures(text) {
            let name = &caps[2];
            if !self.settings.is_tunable_constant(name) {
                return LineOutcome::Ignored;
            }
            let tail = caps[4].trim();
            let comment = tail.starts_with("//").then(|| tail.trim_start_matches('/').trim());
            return self.const_option(&caps[1], name, caps[3].trim(), comment, line);
        }
        LineOutcome::Ignored
    }

    fn define_option(
        &self,
        name: &str,
        value: &str,
        comment: Option<&str>,
        commented: bool,
        line: usize,
    ) -> LineOutcome {
        match comment.and_then(parse_value_list) {
            Some(Err(())) => LineOutcome::Malformed(format!("empty value list for {name}")),
            Some(Ok(list)) => {
                if commented {
                    return LineOutcome::Ignored;
                }
                if value.is_empty() {
                    return LineOutcome::Malformed(format!(
                        "{name} has a value list but no default value"
                    ));
                }
                self.enum_option(name, DeclarationKind::Define, value, comment, list, line)
            }
            None if value.is_empty() => LineOutcome::Option(ShaderOption::Boolean(BooleanOption {
                name: name.to_string(),
                kind: DeclarationKind::Define,
                comment: comment.unwrap_or_default().to_string(),
                default: !commented,
                origin: self.origin(line),
            })),
            // A plain valued define is a constant, not an option.
            None => LineOutcome::Ignored,
        }
    }

    fn const_option(
        &self,
        ty: &str,
        name: &str,
        value: &str,
        comment: Option<&str>,
        line: usize,
    ) -> LineOutcome {
        match comment.and_then(parse_value_list) {
            Some(Err(())) => LineOutcome::Malformed(format!("empty value list for {name}")),
            Some(Ok(list)) => {
                self.enum_option(name, DeclarationKind::Constant, value, comment, list, line)
            }
            None if ty == "bool" => match value {
                "true" | "false" => LineOutcome::Option(ShaderOption::Boolean(BooleanOption {
                    name: name.to_string(),
                    kind: DeclarationKind::Constant,
                    comment: comment.unwrap_or_default().to_string(),
                    default: value == "true",
                    origin: self.origin(line),
                })),
                _ => LineOutcome::Malformed(format!("const bool {name} has non-literal value")),
            },
            None => LineOutcome::Ignored,
        }
    }

    fn enum_option(
        &self,
        name: &str,
        kind: DeclarationKind,
        value: &str,
        comment: Option<&str>,
        list: ValueList,
        line: usize,
    ) -> LineOutcome {
        if !list.values.iter().any(|v| v == value) {
            return LineOutcome::Malformed(format!(
                "default value {value} of {name} is not in its value list"
            ));
        }
        LineOutcome::Option(ShaderOption::Enum(EnumOption {
            name: name.to_string(),
            kind,
            comment: comment.unwrap_or_default().to_string(),
            default: value.to_string(),
            values: list.values,
            labels: list.labels,
            origin: self.origin(line),
        }))
    }
}

/// Scans one file's text into `set`.
pub fn scan_file(set: &mut OptionSet, path: &PackPath, text: &str, settings: &PipelineSettings) {
    let scanner = FileScanner { path, settings };
    let mut guard: Option<String> = None;

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match scanner.scan_line(line, idx + 1, guard.as_deref()) {
            LineOutcome::Option(option) => {
                if let Err(rejected) = set.insert(option) {
                    let name = rejected.name().to_string();
                    if set.conflicts().contains(&name) {
                        let first = set.get(&name).map(|o| o.origin().clone());
                        let mut message = format!("{name} redeclared with a different kind");
                        if let Some(first) = first {
                            message.push_str(&format!(
                                "; keeping the declaration at {}:{}",
                                first.file, first.line
                            ));
                        }
                        let diag = Diagnostic::new(DiagnosticKind::Discovery, path.as_str(), message)
                            .at_line(idx + 1, line);
                        diag.log();
                        set.push_diagnostic(diag);
                    } else {
                        log::trace!("Option {name} redeclared at {path}:{}", idx + 1);
                    }
                }
            }
            LineOutcome::Malformed(message) => {
                let diag = Diagnostic::new(DiagnosticKind::Discovery, path.as_str(), message)
                    .at_line(idx + 1, line);
                diag.log();
                set.push_diagnostic(diag);
            }
            LineOutcome::Ignored => {}
        }
        guard = IFNDEF_RE.captures(line).map(|c| c[1].to_string());
    }
}

fn option_files(source: &dyn PackSource, settings: &PipelineSettings) -> Result<Vec<PackPath>> {
    Ok(source
        .list_files()?
        .into_iter()
        .filter(|p| p.extension().is_some_and(|e| settings.is_shader_extension(e)))
        .collect())
}

/// Discovers every option declared in `source`.
///
/// Unreadable files are reported as diagnostics and skipped.
#[must_use]
pub fn discover(source: &dyn PackSource, settings: &PipelineSettings) -> OptionSet {
    let mut set = OptionSet::new();
    let files = match option_files(source, settings) {
        Ok(files) => files,
        Err(err) => {
            log::warn!("Option discovery could not list {}: {err}", source.identity());
            return set;
        }
    };

    for path in &files {
        match source.read_to_string(path) {
            Ok(text) => scan_file(&mut set, path, &text, settings),
            Err(err) => {
                let diag = Diagnostic::new(DiagnosticKind::Discovery, path.as_str(), err.to_string());
                diag.log();
                set.push_diagnostic(diag);
            }
        }
    }

    log::debug!(
        "Discovered {} options ({} boolean, {} enum) in {}",
        set.len(),
        set.booleans().len(),
        set.enums().len(),
        source.identity()
    );
    set
}

// ============================================================================
// Discovery Cache
// ============================================================================

#[derive(Debug)]
struct CachedOptions {
    stamp: SystemTime,
    listing: u128,
    options: Arc<OptionSet>,
}

/// Hash of the scanned file list and the settings discovery reads.
fn listing_hash(files: &[PackPath], settings: &PipelineSettings) -> u128 {
    let mut hasher = Xxh3::new();
    let groups = [
        files.iter().map(PackPath::as_str).collect::<Vec<_>>(),
        settings.shader_extensions.iter().map(String::as_str).collect(),
        settings.tunable_constants.iter().map(String::as_str).collect(),
    ];
    for group in &groups {
        for item in group {
            hasher.update(item.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(b"\x01");
    }
    hasher.digest128()
}

/// Discovered option sets keyed by pack identity and stamped with the newest
/// modification time seen at discovery.
///
/// An entry is reused until a file becomes newer than its stamp, or a file is
/// added or removed.
#[derive(Debug, Default)]
pub struct OptionDiscoveryCache {
    entries: RwLock<FxHashMap<String, CachedOptions>>,
}

impl OptionDiscoveryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached set for `source`, rediscovering when stale.
    pub fn get_or_discover(
        &self,
        source: &dyn PackSource,
        settings: &PipelineSettings,
    ) -> Result<Arc<OptionSet>> {
        let identity = source.identity();
        let files = option_files(source, settings)?;
        let newest = source.newest_modification(&files)?;
        let listing = listing_hash(&files, settings);

        if let Some(entry) = self.entries.read().get(&identity)
            && newest <= entry.stamp
            && listing == entry.listing
        {
            return Ok(Arc::clone(&entry.options));
        }

        log::debug!("Option cache miss for {identity}");
        let options = Arc::new(discover(source, settings));
        self.entries.write().insert(
            identity,
            CachedOptions {
                stamp: newest,
                listing,
                options: Arc::clone(&options),
            },
        );
        Ok(options)
    }

    pub fn invalidate(&self, identity: &str) -> bool {
        self.entries.write().remove(identity).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionRef;

    fn scan(text: &str) -> OptionSet {
        let mut set = OptionSet::new();
        scan_file(&mut set, &PackPath::new("/settings.glsl"), text, &PipelineSettings::default());
        set
    }

    #[test]
    fn test_boolean_defaults() {
        let set = scan("#define BLOOM // Bloom\n//#define MOTION_BLUR\n// #define DOF");
        assert_eq!(set.booleans().len(), 3);
        assert!(set.booleans()[0].default);
        assert_eq!(set.booleans()[0].comment, "Bloom");
        assert!(!set.booleans()[1].default);
        assert!(!set.booleans()[2].default);
    }

    #[test]
    fn test_enum_with_labels() {
        let set = scan("#define SHADOW_QUALITY 1 // [0 1 2] Off Medium High");
        let e = &set.enums()[0];
        assert_eq!(e.default, "1");
        assert_eq!(e.values, ["0", "1", "2"]);
        assert_eq!(e.labels, ["Off", "Medium", "High"]);
    }

    #[test]
    fn test_missing_labels_fall_back_to_values() {
        let set = scan("#define STEPS 8 // [4 8 16] Low");
        assert_eq!(set.enums()[0].labels, ["Low", "8", "16"]);
    }

    #[test]
    fn test_plain_values_and_macros_are_not_options() {
        let set = scan("#define PI 3.14159\n#define sq(x) ((x)*(x))\n#ifndef GUARD\n#define GUARD\n#endif");
        assert!(set.is_empty());
        assert!(set.diagnostics().is_empty());
    }

    #[test]
    fn test_malformed_default_is_skipped() {
        let set = scan("#define MODE 5 // [0 1 2]\n#define OK");
        assert_eq!(set.len(), 1);
        assert_eq!(set.diagnostics().len(), 1);
        assert_eq!(set.diagnostics()[0].kind, DiagnosticKind::Discovery);
        assert_eq!(set.diagnostics()[0].line, Some(1));
    }

    #[test]
    fn test_const_options() {
        let set = scan(
            "const int shadowMapResolution = 2048; // [1024 2048 4096]\n\
             const bool generateShadowMipmap = true;\n\
             const float notTunable = 1.0; // [1.0 2.0]",
        );
        assert_eq!(set.len(), 2);
        match set.get("shadowMapResolution") {
            Some(OptionRef::Enum(e)) => {
                assert_eq!(e.kind, DeclarationKind::Constant);
                assert_eq!(e.default, "2048");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(set.get("generateShadowMipmap"), Some(OptionRef::Boolean(b)) if b.default));
    }

    #[test]
    fn test_kind_conflict_keeps_first() {
        let set = scan("#define FOG\n#define FOG 1 // [0 1]");
        assert!(matches!(set.get("FOG"), Some(OptionRef::Boolean(_))));
        assert_eq!(set.conflicts(), ["FOG".to_string()]);
        assert_eq!(set.diagnostics().len(), 1);
    }
}
