//! Pass 5: legacy texture sampling functions.
//!
//! Dimension-suffixed functions (`texture2D`, `textureCubeLod`,
//! `texture2DProjGradARB`, ...) map to their overloaded modern names. Legacy
//! `shadow*` calls returned a `vec4`; their modern forms return a `float`, so
//! a call whose argument list closes on the same line is wrapped in `vec4(...)`
//! to keep swizzles such as `.r` valid.

use std::borrow::Cow;

use super::{Unit, scanner};
use crate::syntax;

/// Legacy name → modern name.
pub const TEXTURE_FUNCTIONS: &[(&str, &str)] = &[
    ("texture1D", "texture"),
    ("texture2D", "texture"),
    ("texture3D", "texture"),
    ("textureCube", "texture"),
    ("texture2DRect", "texture"),
    ("texture1DLod", "textureLod"),
    ("texture2DLod", "textureLod"),
    ("texture3DLod", "textureLod"),
    ("textureCubeLod", "textureLod"),
    ("texture1DProj", "textureProj"),
    ("texture2DProj", "textureProj"),
    ("texture3DProj", "textureProj"),
    ("texture2DRectProj", "textureProj"),
    ("texture1DProjLod", "textureProjLod"),
    ("texture2DProjLod", "textureProjLod"),
    ("texture3DProjLod", "textureProjLod"),
    ("texture1DGrad", "textureGrad"),
    ("texture2DGrad", "textureGrad"),
    ("texture3DGrad", "textureGrad"),
    ("textureCubeGrad", "textureGrad"),
    ("texture2DGradARB", "textureGrad"),
    ("texture3DGradARB", "textureGrad"),
    ("textureCubeGradARB", "textureGrad"),
    ("texture2DProjGrad", "textureProjGrad"),
    ("texture2DProjGradARB", "textureProjGrad"),
    ("shadow1D", "texture"),
    ("shadow2D", "texture"),
    ("shadow2DRect", "texture"),
    ("shadow1DLod", "textureLod"),
    ("shadow2DLod", "textureLod"),
    ("shadow1DProj", "textureProj"),
    ("shadow2DProj", "textureProj"),
    ("shadow2DProjLod", "textureProjLod"),
    ("shadow2DGradARB", "textureGrad"),
];

#[must_use]
pub fn modern_name(legacy: &str) -> Option<&'static str> {
    TEXTURE_FUNCTIONS
        .iter()
        .find(|(from, _)| *from == legacy)
        .map(|(_, to)| *to)
}

/// Wraps the first single-line `shadow*(...)` call in `vec4(...)`.
fn wrap_one_shadow_call(code: &str) -> Option<String> {
    for (start, id) in syntax::identifiers(code) {
        if !id.starts_with("shadow") {
            continue;
        }
        let Some(modern) = modern_name(id) else {
            continue;
        };
        let after = start + id.len();
        let open = after + (code[after..].len() - code[after..].trim_start().len());
        if !code[open..].starts_with('(') {
            continue;
        }
        let close = scanner::matching_paren(code, open)?;
        return Some(format!(
            "{}vec4({modern}{})){}",
            &code[..start],
            &code[open..close],
            &code[close + 1..]
        ));
    }
    None
}

#[must_use]
pub fn rewrite(code: &str) -> String {
    let mut code = code.to_string();
    while let Some(next) = wrap_one_shadow_call(&code) {
        code = next;
    }
    syntax::replace_identifiers(&code, |id| modern_name(id).map(Cow::Borrowed))
}

pub fn run(unit: &mut Unit) {
    unit.map_code(rewrite);
}
