//! Option data model: discovered options and the sparse value overlay.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::{Diagnostic, PackError, Result};
use crate::pack::PackPath;
use crate::preprocess::MacroSet;

/// How an option is declared in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationKind {
    /// `#define NAME [VALUE]`
    Define,
    /// `const TYPE NAME = VALUE;`
    Constant,
}

/// Where an option was first declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionOrigin {
    pub file: PackPath,
    /// 1-based line number.
    pub line: usize,
}

/// An on/off option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BooleanOption {
    pub name: String,
    pub kind: DeclarationKind,
    /// Trailing comment text of the declaration, trimmed.
    pub comment: String,
    pub default: bool,
    pub origin: OptionOrigin,
}

/// An option with a finite list of allowed values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumOption {
    pub name: String,
    pub kind: DeclarationKind,
    pub comment: String,
    pub default: String,
    /// Allowed values, in declaration order.
    pub values: Vec<String>,
    /// Display labels, one per value.
    pub labels: Vec<String>,
    pub origin: OptionOrigin,
}

impl EnumOption {
    #[must_use]
    pub fn allows(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// Label paired with `value`.
    #[must_use]
    pub fn label_of(&self, value: &str) -> Option<&str> {
        self.values
            .iter()
            .position(|v| v == value)
            .map(|i| self.labels[i].as_str())
    }
}

/// A discovered option, owned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShaderOption {
    Boolean(BooleanOption),
    Enum(EnumOption),
}

impl ShaderOption {
    #[must_use]
    pub fn name(&self) -> &str {
        self.as_ref().name()
    }

    #[must_use]
    pub fn as_ref(&self) -> OptionRef<'_> {
        match self {
            Self::Boolean(b) => OptionRef::Boolean(b),
            Self::Enum(e) => OptionRef::Enum(e),
        }
    }
}

/// A borrowed view of an option inside an [`OptionSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionRef<'a> {
    Boolean(&'a BooleanOption),
    Enum(&'a EnumOption),
}

impl<'a> OptionRef<'a> {
    #[must_use]
    pub fn name(self) -> &'a str {
        match self {
            Self::Boolean(b) => &b.name,
            Self::Enum(e) => &e.name,
        }
    }

    #[must_use]
    pub fn kind(self) -> DeclarationKind {
        match self {
            Self::Boolean(b) => b.kind,
            Self::Enum(e) => e.kind,
        }
    }

    #[must_use]
    pub fn comment(self) -> &'a str {
        match self {
            Self::Boolean(b) => &b.comment,
            Self::Enum(e) => &e.comment,
        }
    }

    #[must_use]
    pub fn origin(self) -> &'a OptionOrigin {
        match self {
            Self::Boolean(b) => &b.origin,
            Self::Enum(e) => &e.origin,
        }
    }

    #[must_use]
    pub fn default_value(self) -> OptionValue {
        match self {
            Self::Boolean(b) => OptionValue::Bool(b.default),
            Self::Enum(e) => OptionValue::Choice(e.default.clone()),
        }
    }

    /// Parses a persisted string into a value legal for this option.
    pub fn parse_value(self, raw: &str) -> Result<OptionValue> {
        let invalid = || PackError::InvalidOptionValue {
            name: self.name().to_string(),
            value: raw.to_string(),
        };
        match self {
            Self::Boolean(_) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "on" | "yes" => Ok(OptionValue::Bool(true)),
                "false" | "0" | "off" | "no" => Ok(OptionValue::Bool(false)),
                _ => Err(invalid()),
            },
            Self::Enum(e) => {
                let raw = raw.trim();
                if e.allows(raw) {
                    Ok(OptionValue::Choice(raw.to_string()))
                } else {
                    Err(invalid())
                }
            }
        }
    }

    /// Checks that `value` has the right shape for this option.
    pub fn validate(self, value: &OptionValue) -> Result<()> {
        match (self, value) {
            (Self::Boolean(_), OptionValue::Bool(_)) => Ok(()),
            (Self::Enum(e), OptionValue::Choice(v)) if e.allows(v) => Ok(()),
            _ => Err(PackError::InvalidOptionValue {
                name: self.name().to_string(),
                value: value.to_string(),
            }),
        }
    }
}

/// The effective value of one option.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Choice(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Choice(s) => f.write_str(s),
        }
    }
}

// ============================================================================
// OptionSet
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Boolean(usize),
    Enum(usize),
}

/// All options discovered in one pack, split into a boolean and an enum
/// partition. Both partitions keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct OptionSet {
    booleans: Vec<BooleanOption>,
    enums: Vec<EnumOption>,
    lookup: FxHashMap<String, Slot>,
    conflicts: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl OptionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an option unless its name is already taken; the first occurrence
    /// wins. A rejected option is handed back. Rejections that would change
    /// the option's variant (boolean vs enum) are recorded as conflicts.
    pub fn insert(&mut self, option: ShaderOption) -> std::result::Result<(), ShaderOption> {
        if let Some(slot) = self.lookup.get(option.name()) {
            let same_variant = matches!(
                (slot, &option),
                (Slot::Boolean(_), ShaderOption::Boolean(_)) | (Slot::Enum(_), ShaderOption::Enum(_))
            );
            if !same_variant && !self.conflicts.iter().any(|c| c == option.name()) {
                self.conflicts.push(option.name().to_string());
            }
            return Err(option);
        }
        match option {
            ShaderOption::Boolean(b) => {
                self.lookup
                    .insert(b.name.clone(), Slot::Boolean(self.booleans.len()));
                self.booleans.push(b);
            }
            ShaderOption::Enum(e) => {
                self.lookup.insert(e.name.clone(), Slot::Enum(self.enums.len()));
                self.enums.push(e);
            }
        }
        Ok(())
    }

    pub(crate) fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<OptionRef<'_>> {
        self.lookup.get(name).map(|slot| match *slot {
            Slot::Boolean(i) => OptionRef::Boolean(&self.booleans[i]),
            Slot::Enum(i) => OptionRef::Enum(&self.enums[i]),
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }

    #[inline]
    #[must_use]
    pub fn booleans(&self) -> &[BooleanOption] {
        &self.booleans
    }

    #[inline]
    #[must_use]
    pub fn enums(&self) -> &[EnumOption] {
        &self.enums
    }

    /// Every option: booleans first, then enums, each in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = OptionRef<'_>> {
        self.booleans
            .iter()
            .map(OptionRef::Boolean)
            .chain(self.enums.iter().map(OptionRef::Enum))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.booleans.len() + self.enums.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Names declared as a boolean in one place and an enum in another. The
    /// first declaration is the one kept.
    #[must_use]
    pub fn conflicts(&self) -> &[String] {
        &self.conflicts
    }

    /// Discovery diagnostics (malformed and conflicting lines).
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

// ============================================================================
// OptionValues
// ============================================================================

/// A sparse overlay of user-chosen values bound to one [`OptionSet`].
///
/// Only values that differ from the option's default are stored; setting an
/// option back to its default removes the entry.
#[derive(Debug, Clone)]
pub struct OptionValues {
    set: Arc<OptionSet>,
    overrides: BTreeMap<String, OptionValue>,
}

impl PartialEq for OptionValues {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.set, &other.set) && self.overrides == other.overrides
    }
}

impl OptionValues {
    /// An overlay with every option at its default.
    #[must_use]
    pub fn new(set: Arc<OptionSet>) -> Self {
        Self {
            set,
            overrides: BTreeMap::new(),
        }
    }

    /// Builds an overlay from a persisted flat map. Invalid entries are
    /// skipped and logged.
    #[must_use]
    pub fn from_properties(set: Arc<OptionSet>, properties: &BTreeMap<String, String>) -> Self {
        let mut values = Self::new(set);
        let _rejected = values.apply_properties(properties);
        values
    }

    #[inline]
    #[must_use]
    pub fn option_set(&self) -> &Arc<OptionSet> {
        &self.set
    }

    fn option(&self, name: &str) -> Result<OptionRef<'_>> {
        self.set
            .get(name)
            .ok_or_else(|| PackError::UnknownOption(name.to_string()))
    }

    /// Sets an option. Storing the default removes the override.
    pub fn set(&mut self, name: &str, value: OptionValue) -> Result<()> {
        let option = self.option(name)?;
        option.validate(&value)?;
        if option.default_value() == value {
            self.overrides.remove(name);
        } else {
            self.overrides.insert(name.to_string(), value);
        }
        Ok(())
    }

    pub fn set_bool(&mut self, name: &str, enabled: bool) -> Result<()> {
        self.set(name, OptionValue::Bool(enabled))
    }

    pub fn set_choice(&mut self, name: &str, value: &str) -> Result<()> {
        self.set(name, OptionValue::Choice(value.to_string()))
    }

    /// Sets an option from its persisted string form.
    pub fn set_from_str(&mut self, name: &str, raw: &str) -> Result<()> {
        let value = self.option(name)?.parse_value(raw)?;
        self.set(name, value)
    }

    /// Effective value (override or default). `None` for unknown names.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<OptionValue> {
        let option = self.set.get(name)?;
        Some(
            self.overrides
                .get(name)
                .cloned()
                .unwrap_or_else(|| option.default_value()),
        )
    }

    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            OptionValue::Bool(b) => Some(b),
            OptionValue::Choice(_) => None,
        }
    }

    #[must_use]
    pub fn is_default(&self, name: &str) -> bool {
        !self.overrides.contains_key(name)
    }

    /// Number of non-default values.
    #[must_use]
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    /// Resets one option. Returns `true` if it had an override.
    pub fn reset(&mut self, name: &str) -> bool {
        self.overrides.remove(name).is_some()
    }

    pub fn reset_all(&mut self) {
        self.overrides.clear();
    }

    /// Applies a flat string map on top of the current values. Entries that
    /// name unknown options or carry illegal values are skipped; their errors
    /// are returned.
    pub fn apply_properties(&mut self, properties: &BTreeMap<String, String>) -> Vec<PackError> {
        let mut rejected = Vec::new();
        for (name, raw) in properties {
            if let Err(err) = self.set_from_str(name, raw) {
                log::warn!("Ignoring persisted option value: {err}");
                rejected.push(err);
            }
        }
        rejected
    }

    /// Serializes the overlay: only non-default values, as strings.
    #[must_use]
    pub fn to_properties_map(&self) -> BTreeMap<String, String> {
        self.overrides
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }

    /// Moves the overlay onto a freshly discovered set, keeping every
    /// override that is still legal there.
    #[must_use]
    pub fn rebind(&self, set: Arc<OptionSet>) -> Self {
        let mut values = Self::new(set);
        for (name, value) in &self.overrides {
            if values.set(name, value.clone()).is_err() {
                log::info!("Dropping option override {name}={value} after pack reload");
            }
        }
        values
    }

    /// Macro definitions for `#define`-declared options: enabled booleans
    /// become empty-valued defines, enum options define their value, disabled
    /// booleans are absent.
    #[must_use]
    pub fn to_macros(&self) -> MacroSet {
        let mut macros = MacroSet::new();
        for b in self.set.booleans() {
            if b.kind == DeclarationKind::Define && self.get_bool(&b.name) == Some(true) {
                macros.set(&b.name, "");
            }
        }
        for e in self.set.enums() {
            if e.kind == DeclarationKind::Define
                && let Some(value) = self.get(&e.name)
            {
                macros.set(&e.name, &value.to_string());
            }
        }
        macros
    }

    /// Effective initializers of `const`-declared options.
    #[must_use]
    pub fn constant_values(&self) -> Vec<(String, String)> {
        self.set
            .iter()
            .filter(|o| o.kind() == DeclarationKind::Constant)
            .filter_map(|o| self.get(o.name()).map(|v| (o.name().to_string(), v.to_string())))
            .collect()
    }

    /// Names of every `#define`-declared option, enabled or not.
    pub fn define_names(&self) -> impl Iterator<Item = &str> {
        self.set
            .iter()
            .filter(|o| o.kind() == DeclarationKind::Define)
            .map(OptionRef::name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> OptionOrigin {
        OptionOrigin {
            file: PackPath::new("/settings.glsl"),
            line: 1,
        }
    }

    fn sample_set() -> Arc<OptionSet> {
        let mut set = OptionSet::new();
        set.insert(ShaderOption::Boolean(BooleanOption {
            name: "BLOOM".into(),
            kind: DeclarationKind::Define,
            comment: String::new(),
            default: true,
            origin: origin(),
        }))
        .unwrap();
        set.insert(ShaderOption::Enum(EnumOption {
            name: "SHADOW_QUALITY".into(),
            kind: DeclarationKind::Define,
            comment: String::new(),
            default: "1".into(),
            values: vec!["0".into(), "1".into(), "2".into()],
            labels: vec!["Off".into(), "Medium".into(), "High".into()],
            origin: origin(),
        }))
        .unwrap();
        Arc::new(set)
    }

    #[test]
    fn test_default_values_are_not_stored() {
        let mut values = OptionValues::new(sample_set());
        values.set_bool("BLOOM", false).unwrap();
        assert_eq!(values.override_count(), 1);
        values.set_bool("BLOOM", true).unwrap();
        assert_eq!(values.override_count(), 0);
        assert!(values.is_default("BLOOM"));
    }

    #[test]
    fn test_rejects_illegal_values() {
        let mut values = OptionValues::new(sample_set());
        assert!(matches!(
            values.set_choice("SHADOW_QUALITY", "7"),
            Err(PackError::InvalidOptionValue { .. })
        ));
        assert!(matches!(
            values.set_choice("BLOOM", "1"),
            Err(PackError::InvalidOptionValue { .. })
        ));
        assert!(matches!(
            values.set_bool("NOPE", true),
            Err(PackError::UnknownOption(_))
        ));
    }

    #[test]
    fn test_to_macros() {
        let mut values = OptionValues::new(sample_set());
        let macros = values.to_macros();
        assert_eq!(macros.get("BLOOM"), Some(""));
        assert_eq!(macros.get("SHADOW_QUALITY"), Some("1"));

        values.set_bool("BLOOM", false).unwrap();
        values.set_choice("SHADOW_QUALITY", "2").unwrap();
        let macros = values.to_macros();
        assert!(!macros.contains("BLOOM"));
        assert_eq!(macros.get("SHADOW_QUALITY"), Some("2"));
    }

    #[test]
    fn test_first_declaration_wins() {
        let set = sample_set();
        let mut set = (*set).clone();
        let dup = ShaderOption::Boolean(BooleanOption {
            name: "SHADOW_QUALITY".into(),
            kind: DeclarationKind::Define,
            comment: String::new(),
            default: false,
            origin: origin(),
        });
        assert!(set.insert(dup).is_err());
        assert!(matches!(set.get("SHADOW_QUALITY"), Some(OptionRef::Enum(_))));
        assert_eq!(set.conflicts(), ["SHADOW_QUALITY".to_string()]);
    }

    #[test]
    fn test_label_lookup() {
        let set = sample_set();
        let e = &set.enums()[0];
        assert_eq!(e.label_of("2"), Some("High"));
        assert_eq!(e.label_of("9"), None);
    }
}
