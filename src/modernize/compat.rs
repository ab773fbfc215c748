//! Pass 2: compatibility directives.

use std::sync::LazyLock;

use regex::Regex;

use super::{Unit, outputs};
use crate::pack::ShaderStage;
use crate::settings::IncludeMode;

/// Extension required when `#include` lines are left for the backend.
pub const INCLUDE_EXTENSION: &str = "GL_GOOGLE_include_directive";

static INCLUDE_EXTENSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*#\s*extension\s+(GL_GOOGLE_include_directive|GL_ARB_shading_language_include)\b")
        .expect("include extension regex")
});

pub fn run(unit: &mut Unit) {
    match unit.include_mode {
        IncludeMode::Callback => {
            let present = unit.lines.iter().any(|l| {
                INCLUDE_EXTENSION_RE
                    .captures(l)
                    .is_some_and(|c| &c[1] == INCLUDE_EXTENSION)
            });
            if !present {
                unit.insert_header([format!("#extension {INCLUDE_EXTENSION} : require")]);
            }
        }
        IncludeMode::Flatten => {
            // Nothing is left to include once the text is flattened.
            for line in &mut unit.lines {
                if INCLUDE_EXTENSION_RE.is_match(line) {
                    *line = format!("// {}", line.trim());
                }
            }
        }
    }

    if unit.stage == ShaderStage::Fragment
        && (unit.references("gl_FragColor") || unit.references("gl_FragData"))
    {
        outputs::declare_fragment_output(unit, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::PipelineSettings;

    fn apply(stage: ShaderStage, mode: IncludeMode, src: &str) -> Unit {
        let settings = PipelineSettings {
            include_mode: mode,
            ..PipelineSettings::default()
        };
        let mut unit = Unit::new(stage, &settings, src);
        run(&mut unit);
        unit
    }

    #[test]
    fn test_callback_mode_enables_include_extension() {
        let unit = apply(
            ShaderStage::Vertex,
            IncludeMode::Callback,
            "#version 450\n#extension GL_ARB_x : enable\nvoid main() {}",
        );
        assert_eq!(unit.lines[2], "#extension GL_GOOGLE_include_directive : require");
    }

    #[test]
    fn test_flatten_mode_disables_include_extension() {
        let unit = apply(
            ShaderStage::Vertex,
            IncludeMode::Flatten,
            "#version 450\n#extension GL_GOOGLE_include_directive : enable\nvoid main() {}",
        );
        assert!(unit.lines[1].starts_with("// #extension"));
    }

    #[test]
    fn test_fragment_default_output() {
        let unit = apply(
            ShaderStage::Fragment,
            IncludeMode::Flatten,
            "#version 450\nvoid main() { gl_FragColor = vec4(1.0); }",
        );
        assert_eq!(unit.lines[1], "layout(location = 0) out vec4 pack_FragData0;");
        assert!(unit.fragment_outputs.contains(&0));
    }

    #[test]
    fn test_no_output_without_sentinels() {
        let unit = apply(
            ShaderStage::Fragment,
            IncludeMode::Flatten,
            "#version 450\n// gl_FragColor in a comment\nvoid main() {}",
        );
        assert!(unit.fragment_outputs.is_empty());
        assert_eq!(unit.lines.len(), 3);
    }
}
