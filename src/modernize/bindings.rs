//! Pass 7: resource bindings.
//!
//! Global uniform declarations without a binding are classified:
//!
//! - opaque (samplers, images, ...) get `layout(set = 0, binding = N)` with
//!   `N` ascending from 1 in encounter order;
//! - uniform and buffer blocks get a binding the same way, plus a default
//!   packing (`std140` / `std430`) when none is given;
//! - everything else is a loose uniform and is left for the [`blocks`] pass.
//!
//! Bindings already written in the source are reserved and skipped.
//! Multi-declarator uniform lines are split into one declaration per line.
//!
//! [`blocks`]: super::blocks

use std::sync::LazyLock;

use regex::Regex;

use super::Unit;
use super::scanner::{self, Layout};
use crate::syntax;

static UNIFORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*uniform\s+((?:(?:highp|mediump|lowp)\s+)?)([A-Za-z_]\w*)\s+([^;{}]+);\s*$")
        .expect("uniform regex")
});

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*((?:(?:readonly|writeonly|coherent|restrict|volatile)\s+)*)(uniform|buffer)\s+([A-Za-z_]\w*)\s*(\{.*)?$",
    )
    .expect("block regex")
});

/// A global `uniform TYPE a, b[2], ...;` declaration.
#[derive(Debug, Clone)]
pub struct UniformDecl<'a> {
    pub layout: Option<Layout>,
    pub precision: &'a str,
    pub ty: &'a str,
    /// Each declarator as written, e.g. `b[2]` or `x = 1.0`.
    pub declarators: Vec<&'a str>,
}

impl UniformDecl<'_> {
    #[must_use]
    pub fn is_opaque(&self) -> bool {
        scanner::is_opaque_type(self.ty)
    }
}

/// Parses a uniform declaration from one line of code.
#[must_use]
pub fn parse_uniform(code: &str) -> Option<UniformDecl<'_>> {
    let (layout, rest) = scanner::take_layout(code);
    let caps = UNIFORM_RE.captures(rest)?;
    Some(UniformDecl {
        layout,
        precision: caps.get(1).map_or("", |m| m.as_str()),
        ty: caps.get(2)?.as_str(),
        declarators: scanner::split_top_level(caps.get(3)?.as_str(), ',')
            .into_iter()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .collect(),
    })
}

/// Variable name of a declarator (`b[2]` → `b`, `x = 1.0` → `x`).
#[must_use]
pub fn declarator_name(declarator: &str) -> &str {
    let end = declarator
        .find(|c: char| !syntax::is_ident_char(c))
        .unwrap_or(declarator.len());
    &declarator[..end]
}

pub fn run(unit: &mut Unit) {
    let info = scanner::analyze(&unit.lines);

    for line in info.iter().filter(|l| l.depth == 0) {
        if let (Some(layout), _) = scanner::take_layout(&line.code)
            && let Some(binding) = layout.binding
            && layout.set.unwrap_or(0) == 0
        {
            unit.bindings.reserve(binding, 1);
        }
    }

    let mut out = Vec::with_capacity(unit.lines.len());
    let mut in_block = false;
    for (idx, (line, meta)) in unit.lines.iter().zip(&info).enumerate() {
        let comment: String = syntax::split_line(line, &mut in_block)
            .iter()
            .filter(|s| !s.is_code)
            .map(|s| s.text)
            .collect();
        let indent = syntax::indentation(line);
        let suffix = if comment.is_empty() {
            String::new()
        } else {
            format!(" {comment}")
        };

        if meta.depth != 0 {
            out.push(line.clone());
            continue;
        }

        if let Some(decl) = parse_uniform(&meta.code) {
            let bound = decl.layout.as_ref().is_some_and(|l| l.binding.is_some());
            if bound || (decl.declarators.len() == 1 && !decl.is_opaque()) {
                out.push(line.clone());
                continue;
            }
            for (i, declarator) in decl.declarators.iter().enumerate() {
                let suffix = if i == 0 { suffix.as_str() } else { "" };
                if decl.is_opaque() {
                    let binding = unit.bindings.allocate(1);
                    let layout = decl.layout.clone().unwrap_or_default();
                    let layout = layout.render(&["set = 0".into(), format!("binding = {binding}")]);
                    unit.report
                        .bindings
                        .push((declarator_name(declarator).to_string(), binding));
                    out.push(format!(
                        "{indent}{layout} uniform {}{} {declarator};{suffix}",
                        decl.precision, decl.ty
                    ));
                } else {
                    let layout = match &decl.layout {
                        Some(l) if !l.others.is_empty() => format!("{} ", l.render(&[])),
                        _ => String::new(),
                    };
                    out.push(format!(
                        "{indent}{layout}uniform {}{} {declarator};{suffix}",
                        decl.precision, decl.ty
                    ));
                }
            }
            continue;
        }

        let (layout, rest) = scanner::take_layout(&meta.code);
        if let Some(caps) = BLOCK_RE.captures(rest) {
            let opens_here = caps.get(4).is_some();
            let opens_next = info[idx + 1..]
                .iter()
                .find(|l| !l.code.trim().is_empty())
                .is_some_and(|l| l.code.trim_start().starts_with('{'));
            let bound = layout.as_ref().is_some_and(|l| l.binding.is_some());
            if (opens_here || opens_next) && !bound {
                let kind = &caps[2];
                let mut layout = layout.unwrap_or_default();
                let has_packing = layout
                    .others
                    .iter()
                    .any(|q| matches!(q.as_str(), "std140" | "std430" | "shared" | "packed"));
                if !has_packing {
                    layout
                        .others
                        .insert(0, if kind == "buffer" { "std430" } else { "std140" }.to_string());
                }
                let binding = unit.bindings.allocate(1);
                unit.report.bindings.push((caps[3].to_string(), binding));
                out.push(format!(
                    "{indent}{} {}{kind} {} {}{suffix}",
                    layout.render(&["set = 0".into(), format!("binding = {binding}")]),
                    &caps[1],
                    &caps[3],
                    caps.get(4).map_or("", |m| m.as_str()),
                ).trim_end().to_string());
                continue;
            }
        }

        out.push(line.clone());
    }
    unit.lines = out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::ShaderStage;
    use crate::settings::PipelineSettings;

    fn apply(src: &str) -> Unit {
        let mut unit = Unit::new(ShaderStage::Fragment, &PipelineSettings::default(), src);
        run(&mut unit);
        unit
    }

    #[test]
    fn test_opaque_uniforms_get_ascending_bindings() {
        let unit = apply("uniform sampler2D gcolor; // albedo\nuniform float time;\nuniform sampler2D depthtex0, depthtex1;");
        assert_eq!(
            unit.lines,
            [
                "layout(set = 0, binding = 1) uniform sampler2D gcolor; // albedo",
                "uniform float time;",
                "layout(set = 0, binding = 2) uniform sampler2D depthtex0;",
                "layout(set = 0, binding = 3) uniform sampler2D depthtex1;",
            ]
        );
    }

    #[test]
    fn test_existing_bindings_reserved() {
        let unit = apply("layout(binding = 1) uniform sampler2D a;\nuniform sampler2D b;\nlayout(rgba8) uniform image2D img;");
        assert_eq!(unit.lines[0], "layout(binding = 1) uniform sampler2D a;");
        assert_eq!(unit.lines[1], "layout(set = 0, binding = 2) uniform sampler2D b;");
        assert_eq!(unit.lines[2], "layout(rgba8, set = 0, binding = 3) uniform image2D img;");
    }

    #[test]
    fn test_loose_uniforms_are_split() {
        let unit = apply("uniform vec3 a, b;");
        assert_eq!(unit.lines, ["uniform vec3 a;", "uniform vec3 b;"]);
        assert!(unit.report.bindings.is_empty());
    }

    #[test]
    fn test_blocks_get_bindings() {
        let unit = apply("uniform Light {\n    vec3 dir;\n};\nlayout(std430) buffer Data\n{\n    float v[];\n};");
        assert_eq!(unit.lines[0], "layout(std140, set = 0, binding = 1) uniform Light {");
        assert_eq!(unit.lines[3], "layout(std430, set = 0, binding = 2) buffer Data");
    }

    #[test]
    fn test_opaque_classification() {
        assert!(scanner::is_opaque_type("sampler2DShadow"));
        assert!(scanner::is_opaque_type("usampler3D"));
        assert!(scanner::is_opaque_type("image2D"));
        assert!(!scanner::is_opaque_type("uint"));
        assert!(!scanner::is_opaque_type("mat4"));
    }
}
