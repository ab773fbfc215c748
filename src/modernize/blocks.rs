//! Pass 8: loose uniform wrapping.
//!
//! Non-opaque global uniforms cannot stand alone in the explicit-binding
//! dialect. They are moved, in encounter order, into one generated block:
//!
//! ```glsl
//! layout(std140, set = 0, binding = N) uniform PackUniforms {
//!     float frameTimeCounter;
//!     vec3 sunPosition;
//! };
//! ```
//!
//! The block replaces the first loose uniform, or follows the last struct
//! definition a member's type depends on. Initializers are dropped since block
//! members cannot have them. Opaque uniforms never reach this pass unbound.

use std::sync::LazyLock;

use regex::Regex;

use super::bindings::{declarator_name, parse_uniform};
use super::{Unit, scanner};
use crate::syntax;

/// Name of the generated block.
pub const UNIFORM_BLOCK_NAME: &str = "PackUniforms";

static STRUCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*struct\s+([A-Za-z_]\w*)").expect("struct regex"));

struct Loose {
    line: usize,
    members: Vec<String>,
    names: Vec<String>,
    ty: String,
}

pub fn run(unit: &mut Unit) {
    if !unit.wrap_loose_uniforms {
        return;
    }
    let info = scanner::analyze(&unit.lines);

    let mut loose: Vec<Loose> = Vec::new();
    let mut struct_ends: Vec<(String, usize)> = Vec::new();
    let mut in_block = false;

    for (idx, (line, meta)) in unit.lines.iter().zip(&info).enumerate() {
        let comment: String = syntax::split_line(line, &mut in_block)
            .iter()
            .filter(|s| !s.is_code)
            .map(|s| s.text)
            .collect();
        if meta.depth != 0 {
            continue;
        }

        if let Some(caps) = STRUCT_RE.captures(&meta.code) {
            let mut opened = false;
            let end = (idx..info.len()).find(|&j| {
                opened |= info[j].code.contains('{');
                opened && info.get(j + 1).is_none_or(|next| next.depth == 0)
            });
            if let Some(end) = end {
                struct_ends.push((caps[1].to_string(), end));
            }
            continue;
        }

        let Some(decl) = parse_uniform(&meta.code) else {
            continue;
        };
        if decl.is_opaque() || decl.layout.as_ref().is_some_and(|l| l.binding.is_some()) {
            continue;
        }

        let mut members = Vec::new();
        let mut names = Vec::new();
        for declarator in &decl.declarators {
            let name = declarator_name(declarator);
            let array = declarator[name.len()..]
                .split('=')
                .next()
                .unwrap_or_default()
                .trim();
            if declarator.contains('=') {
                log::debug!("dropping initializer of uniform {name} moved into {UNIFORM_BLOCK_NAME}");
            }
            members.push(format!("    {}{} {name}{array};", decl.precision, decl.ty));
            names.push(name.to_string());
        }
        if let Some(first) = members.first_mut()
            && !comment.is_empty()
        {
            first.push(' ');
            first.push_str(&comment);
        }
        loose.push(Loose {
            line: idx,
            members,
            names,
            ty: decl.ty.to_string(),
        });
    }

    let Some(first) = loose.first() else {
        return;
    };

    // Place after the last struct any member depends on.
    let mut at = first.line;
    for entry in &loose {
        if let Some((_, end)) = struct_ends.iter().find(|(name, _)| *name == entry.ty) {
            at = at.max(end + 1);
        }
    }

    let binding = unit.bindings.allocate(1);
    let mut block = vec![format!(
        "layout(std140, set = 0, binding = {binding}) uniform {UNIFORM_BLOCK_NAME} {{"
    )];
    for entry in &loose {
        block.extend(entry.members.iter().cloned());
        unit.report.wrapped_uniforms.extend(entry.names.iter().cloned());
    }
    block.push("};".to_string());
    unit.report
        .bindings
        .push((UNIFORM_BLOCK_NAME.to_string(), binding));

    let removed_before = loose.iter().filter(|l| l.line < at).count();
    for entry in loose.iter().rev() {
        unit.lines.remove(entry.line);
    }
    let at = at - removed_before;
    unit.lines.splice(at..at, block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::ShaderStage;
    use crate::settings::PipelineSettings;

    fn apply(src: &str) -> Unit {
        let mut unit = Unit::new(ShaderStage::Fragment, &PipelineSettings::default(), src);
        unit.bindings.reserve(1, 1);
        run(&mut unit);
        unit
    }

    #[test]
    fn test_wraps_at_first_loose_uniform() {
        let unit = apply(
            "#version 450\nfloat helper;\nuniform float time; // seconds\nlayout(set = 0, binding = 1) uniform sampler2D tex;\nuniform vec3 sun;\nvoid main() {}",
        );
        assert_eq!(
            unit.lines,
            [
                "#version 450",
                "float helper;",
                "layout(std140, set = 0, binding = 2) uniform PackUniforms {",
                "    float time; // seconds",
                "    vec3 sun;",
                "};",
                "layout(set = 0, binding = 1) uniform sampler2D tex;",
                "void main() {}",
            ]
        );
        assert_eq!(unit.report.wrapped_uniforms, ["time", "sun"]);
    }

    #[test]
    fn test_block_follows_struct_dependency() {
        let unit = apply("uniform float a;\nstruct Light {\n    vec3 dir;\n};\nuniform Light light;\nvoid main() {}");
        assert_eq!(
            unit.lines,
            [
                "struct Light {",
                "    vec3 dir;",
                "};",
                "layout(std140, set = 0, binding = 2) uniform PackUniforms {",
                "    float a;",
                "    Light light;",
                "};",
                "void main() {}",
            ]
        );
    }

    #[test]
    fn test_initializers_dropped_arrays_kept() {
        let unit = apply("uniform float w = 1.0;\nuniform vec2 offsets[4];");
        assert_eq!(unit.lines[1], "    float w;");
        assert_eq!(unit.lines[2], "    vec2 offsets[4];");
    }

    #[test]
    fn test_disabled_wrapping() {
        let settings = PipelineSettings {
            wrap_loose_uniforms: false,
            ..PipelineSettings::default()
        };
        let mut unit = Unit::new(ShaderStage::Fragment, &settings, "uniform float a;");
        run(&mut unit);
        assert_eq!(unit.lines, ["uniform float a;"]);
    }
}
