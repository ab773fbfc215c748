//! Pass 6: legacy built-in variables.
//!
//! Fixed-function matrices become members of a single std140 block,
//! `PackMatrices`, at the reserved binding; the block is injected once when
//! any matrix is referenced. Vertex attributes (`gl_Vertex`, `gl_Normal`,
//! `gl_MultiTexCoordN`, ...) become located inputs of vertex files, and the
//! legacy varyings (`gl_FrontColor`/`gl_Color`, `gl_TexCoord[N]`,
//! `gl_FogFragCoord`) become located outputs of vertex files and inputs of
//! fragment files. `ftransform()` is rewritten in vertex files.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{MATRIX_BLOCK_BINDING, Unit, scanner};
use crate::pack::ShaderStage;
use crate::syntax;

/// Name of the injected matrix block.
pub const MATRIX_BLOCK_NAME: &str = "PackMatrices";

/// Legacy name, replacement, member type, array suffix.
const MATRICES: &[(&str, &str, &str, &str)] = &[
    ("gl_ModelViewMatrix", "modelViewMatrix", "mat4", ""),
    ("gl_ProjectionMatrix", "projectionMatrix", "mat4", ""),
    ("gl_ModelViewProjectionMatrix", "modelViewProjectionMatrix", "mat4", ""),
    ("gl_ModelViewMatrixInverse", "modelViewMatrixInverse", "mat4", ""),
    ("gl_ProjectionMatrixInverse", "projectionMatrixInverse", "mat4", ""),
    ("gl_NormalMatrix", "normalMatrix", "mat3", ""),
    ("gl_TextureMatrix", "textureMatrix", "mat4", "[8]"),
];

/// Vertex attributes: legacy name, replacement, type.
const ATTRIBUTES: &[(&str, &str, &str)] = &[
    ("gl_Vertex", "vaPosition", "vec4"),
    ("gl_Normal", "vaNormal", "vec3"),
    ("gl_Color", "vaColor", "vec4"),
    ("gl_SecondaryColor", "vaSecondaryColor", "vec4"),
    ("gl_FogCoord", "vaFogCoord", "float"),
    ("gl_MultiTexCoord0", "vaUV0", "vec4"),
    ("gl_MultiTexCoord1", "vaUV1", "vec4"),
    ("gl_MultiTexCoord2", "vaUV2", "vec4"),
    ("gl_MultiTexCoord3", "vaUV3", "vec4"),
    ("gl_MultiTexCoord4", "vaUV4", "vec4"),
    ("gl_MultiTexCoord5", "vaUV5", "vec4"),
    ("gl_MultiTexCoord6", "vaUV6", "vec4"),
    ("gl_MultiTexCoord7", "vaUV7", "vec4"),
];

/// Legacy varyings as seen from the vertex side: legacy name, replacement,
/// type. In fragment files `gl_Color` reads what `gl_FrontColor` wrote.
const VERTEX_VARYINGS: &[(&str, &str, &str)] = &[
    ("gl_FrontColor", "pack_FrontColor", "vec4"),
    ("gl_FogFragCoord", "pack_FogFragCoord", "float"),
];

const FRAGMENT_VARYINGS: &[(&str, &str, &str)] = &[
    ("gl_Color", "pack_FrontColor", "vec4"),
    ("gl_FogFragCoord", "pack_FogFragCoord", "float"),
];

static FTRANSFORM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bftransform\s*\(\s*\)").expect("ftransform regex"));

static TEX_COORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bgl_TexCoord\s*\[\s*(\d+)\s*\]").expect("gl_TexCoord regex")
});

fn tex_coord_name(index: u32) -> String {
    format!("pack_TexCoord{index}")
}

/// Renders the matrix block declaration.
#[must_use]
pub fn matrix_block() -> Vec<String> {
    let mut lines = vec![format!(
        "layout(std140, set = 0, binding = {MATRIX_BLOCK_BINDING}) uniform {MATRIX_BLOCK_NAME} {{"
    )];
    lines.extend(
        MATRICES
            .iter()
            .map(|(_, name, ty, array)| format!("    {ty} {name}{array};")),
    );
    lines.push("};".to_string());
    lines
}

pub fn run(unit: &mut Unit) {
    let stage = unit.stage;
    if stage == ShaderStage::Vertex {
        unit.map_code(|code| {
            FTRANSFORM_RE
                .replace_all(code, "(gl_ModelViewProjectionMatrix * gl_Vertex)")
                .into_owned()
        });
    }

    let varyings: &[(&str, &str, &str)] = match stage {
        ShaderStage::Vertex => VERTEX_VARYINGS,
        ShaderStage::Fragment => FRAGMENT_VARYINGS,
        _ => &[],
    };
    let attributes: &[(&str, &str, &str)] = if stage == ShaderStage::Vertex {
        ATTRIBUTES
    } else {
        &[]
    };

    // Pre-scan.
    let mut used: BTreeSet<&str> = BTreeSet::new();
    let mut tex_coords: BTreeSet<u32> = BTreeSet::new();
    let track_tex_coords = !varyings.is_empty();
    for line in scanner::analyze(&unit.lines) {
        for (_, id) in syntax::identifiers(&line.code) {
            if let Some(m) = MATRICES.iter().find(|m| m.0 == id) {
                used.insert(m.0);
            }
            if let Some(a) = attributes.iter().chain(varyings).find(|a| a.0 == id) {
                used.insert(a.0);
            }
        }
        if track_tex_coords {
            for caps in TEX_COORD_RE.captures_iter(&line.code) {
                if let Ok(index) = caps[1].parse::<u32>() {
                    tex_coords.insert(index);
                }
            }
        }
    }

    let mut renames: BTreeMap<&str, &str> = BTreeMap::new();
    let mut declarations = Vec::new();

    if MATRICES.iter().any(|m| used.contains(m.0)) {
        declarations.extend(matrix_block());
        unit.report.matrix_block = true;
        unit.report
            .bindings
            .push((MATRIX_BLOCK_NAME.to_string(), MATRIX_BLOCK_BINDING));
        renames.extend(MATRICES.iter().map(|m| (m.0, m.1)));
    }

    // Vertex attributes are inputs; legacy varyings are inputs in fragment
    // files and outputs in vertex files.
    let varying_is_input = stage == ShaderStage::Fragment;
    let mut declare = |unit: &mut Unit, name: String, ty: &str, input: bool| {
        let (allocator, report, keyword) = if input {
            (&mut unit.inputs, &mut unit.report.inputs, "in")
        } else {
            (&mut unit.outputs, &mut unit.report.outputs, "out")
        };
        let location = allocator.allocate(1);
        declarations.push(format!("layout(location = {location}) {keyword} {ty} {name};"));
        report.push((name, location));
    };

    for (legacy, name, ty) in attributes {
        if used.contains(legacy) {
            declare(unit, (*name).to_string(), ty, true);
            renames.insert(legacy, name);
        }
    }
    for (legacy, name, ty) in varyings {
        if used.contains(legacy) {
            declare(unit, (*name).to_string(), ty, varying_is_input);
            renames.insert(legacy, name);
        }
    }
    for &index in &tex_coords {
        declare(unit, tex_coord_name(index), "vec4", varying_is_input);
    }

    if declarations.is_empty() {
        return;
    }
    unit.insert_header(declarations);

    unit.map_code(|code| {
        let code = if tex_coords.is_empty() {
            Cow::Borrowed(code)
        } else {
            TEX_COORD_RE.replace_all(code, |caps: &Captures<'_>| {
                caps[1]
                    .parse::<u32>()
                    .map_or_else(|_| caps[0].to_string(), tex_coord_name)
            })
        };
        syntax::replace_identifiers(&code, |id| renames.get(id).map(|n| Cow::Borrowed(*n)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::PipelineSettings;

    fn apply(stage: ShaderStage, src: &str) -> Unit {
        let mut unit = Unit::new(stage, &PipelineSettings::default(), src);
        run(&mut unit);
        unit
    }

    #[test]
    fn test_ftransform_and_attributes() {
        let unit = apply(
            ShaderStage::Vertex,
            "#version 450\nvoid main() {\n    gl_Position = ftransform();\n    gl_FrontColor = gl_Color;\n    gl_TexCoord[0] = gl_MultiTexCoord0;\n}",
        );
        let text = unit.text();
        assert!(text.contains("uniform PackMatrices {"));
        assert!(text.contains("gl_Position = (modelViewProjectionMatrix * vaPosition);"));
        assert!(text.contains("layout(location = 0) in vec4 vaPosition;"));
        assert!(text.contains("layout(location = 1) in vec4 vaColor;"));
        assert!(text.contains("layout(location = 2) in vec4 vaUV0;"));
        assert!(text.contains("layout(location = 0) out vec4 pack_FrontColor;"));
        assert!(text.contains("layout(location = 1) out vec4 pack_TexCoord0;"));
        assert!(text.contains("pack_FrontColor = vaColor;"));
        assert!(text.contains("pack_TexCoord0 = vaUV0;"));
        assert!(!text.contains("gl_Vertex"));
        assert!(unit.report.matrix_block);
    }

    #[test]
    fn test_matrix_block_injected_once() {
        let unit = apply(
            ShaderStage::Fragment,
            "#version 450\nvec3 a = gl_NormalMatrix * n;\nmat4 b = gl_ModelViewMatrix;",
        );
        let text = unit.text();
        assert_eq!(text.matches("uniform PackMatrices").count(), 1);
        assert!(text.contains("vec3 a = normalMatrix * n;"));
        assert!(text.contains("    mat4 textureMatrix[8];"));
    }

    #[test]
    fn test_fragment_reads_front_color() {
        let unit = apply(ShaderStage::Fragment, "#version 450\nvec4 c = gl_Color * gl_TexCoord[1];");
        let text = unit.text();
        assert!(text.contains("layout(location = 0) in vec4 pack_FrontColor;"));
        assert!(text.contains("layout(location = 1) in vec4 pack_TexCoord1;"));
        assert!(text.contains("vec4 c = pack_FrontColor * pack_TexCoord1;"));
        assert!(!unit.report.matrix_block);
    }

    #[test]
    fn test_nothing_to_do() {
        let src = "#version 450\nvoid main() {}";
        assert_eq!(apply(ShaderStage::Vertex, src).text(), src);
    }
}
