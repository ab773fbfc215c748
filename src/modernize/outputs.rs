//! Pass 4: legacy fragment outputs.
//!
//! Every `gl_FragData[N]` and `gl_FragColor` (index 0) becomes a reference to
//! `pack_FragDataN`, declared as `layout(location = N) out vec4`. Indices are
//! collected by a pre-scan, so all declarations land in the header before any
//! use. Non-literal indices are left alone.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{Unit, scanner};
use crate::pack::ShaderStage;
use crate::syntax;

static FRAG_DATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bgl_FragData\s*\[\s*(\d+)\s*\]").expect("gl_FragData regex")
});

#[must_use]
pub fn fragment_output_name(index: u32) -> String {
    format!("pack_FragData{index}")
}

/// Declares fragment output `index` unless already declared.
pub fn declare_fragment_output(unit: &mut Unit, index: u32) {
    if !unit.fragment_outputs.insert(index) {
        return;
    }
    unit.outputs.reserve(index, 1);
    let name = fragment_output_name(index);
    unit.insert_header([format!("layout(location = {index}) out vec4 {name};")]);
    unit.report.fragment_outputs.push(index);
    unit.report.outputs.push((name, index));
}

pub fn run(unit: &mut Unit) {
    if unit.stage != ShaderStage::Fragment {
        return;
    }

    let mut used = BTreeSet::new();
    for line in scanner::analyze(&unit.lines) {
        for caps in FRAG_DATA_RE.captures_iter(&line.code) {
            if let Ok(index) = caps[1].parse::<u32>() {
                used.insert(index);
            }
        }
        if syntax::contains_identifier(&line.code, "gl_FragColor") {
            used.insert(0);
        }
    }
    if used.is_empty() {
        return;
    }

    for index in used {
        declare_fragment_output(unit, index);
    }

    unit.map_code(|code| {
        let code = FRAG_DATA_RE.replace_all(code, |caps: &Captures<'_>| {
            caps[1]
                .parse::<u32>()
                .map_or_else(|_| caps[0].to_string(), fragment_output_name)
        });
        syntax::replace_identifiers(&code, |id| {
            (id == "gl_FragColor").then(|| Cow::Owned(fragment_output_name(0)))
        })
    });

    if unit.references("gl_FragData") {
        log::debug!("gl_FragData with a non-constant index left unchanged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::PipelineSettings;

    fn apply(src: &str) -> Unit {
        let mut unit = Unit::new(ShaderStage::Fragment, &PipelineSettings::default(), src);
        run(&mut unit);
        unit
    }

    #[test]
    fn test_declarations_precede_use() {
        let unit = apply(
            "#version 450\nvoid main() {\n    gl_FragData[2] = vec4(0.0);\n    gl_FragData [ 0 ] = vec4(1.0);\n}",
        );
        assert_eq!(
            unit.text(),
            "#version 450\n\
             layout(location = 0) out vec4 pack_FragData0;\n\
             layout(location = 2) out vec4 pack_FragData2;\n\
             void main() {\n    pack_FragData2 = vec4(0.0);\n    pack_FragData0 = vec4(1.0);\n}"
        );
        assert_eq!(unit.report.fragment_outputs, [0, 2]);
    }

    #[test]
    fn test_frag_color_shares_index_zero() {
        let unit = apply("#version 450\nvoid main() { gl_FragColor = vec4(1.0); } // gl_FragColor");
        assert_eq!(unit.lines.len(), 3);
        assert_eq!(
            unit.lines[2],
            "void main() { pack_FragData0 = vec4(1.0); } // gl_FragColor"
        );
    }

    #[test]
    fn test_vertex_stage_untouched() {
        let src = "#version 450\nvoid main() { gl_FragData[0] = vec4(1.0); }";
        let mut unit = Unit::new(ShaderStage::Vertex, &PipelineSettings::default(), src);
        run(&mut unit);
        assert_eq!(unit.text(), src);
    }
}
