//! Shader stages and the stage-extension table.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::PackPath;
use crate::syntax;

/// The pipeline point a source file targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    Compute,
    TessControl,
    TessEvaluation,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 6] = [
        Self::Vertex,
        Self::Fragment,
        Self::Geometry,
        Self::Compute,
        Self::TessControl,
        Self::TessEvaluation,
    ];

    /// Maps a file extension to its stage. Ambiguous extensions (`glsl`,
    /// `inc`, ...) return `None`.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "vsh" | "vert" => Some(Self::Vertex),
            "fsh" | "frag" => Some(Self::Fragment),
            "gsh" | "geom" => Some(Self::Geometry),
            "csh" | "comp" => Some(Self::Compute),
            "tcs" | "tesc" => Some(Self::TessControl),
            "tes" | "tese" => Some(Self::TessEvaluation),
            _ => None,
        }
    }

    /// Guesses a stage from stage-specific keywords in the source's code;
    /// comments are not searched.
    ///
    /// Checked most-specific first: compute and tessellation keywords are
    /// unambiguous, `gl_Position` is also written by geometry shaders.
    #[must_use]
    pub fn sniff(source: &str) -> Option<Self> {
        const RULES: [(&str, ShaderStage); 9] = [
            ("local_size_x", ShaderStage::Compute),
            ("gl_TessLevel", ShaderStage::TessControl),
            ("gl_TessCoord", ShaderStage::TessEvaluation),
            ("EmitVertex", ShaderStage::Geometry),
            ("gl_FragColor", ShaderStage::Fragment),
            ("gl_FragData", ShaderStage::Fragment),
            ("gl_FragCoord", ShaderStage::Fragment),
            ("discard", ShaderStage::Fragment),
            ("gl_Position", ShaderStage::Vertex),
        ];
        let mut in_block = false;
        let code = source
            .lines()
            .map(|line| syntax::code_of(line, &mut in_block))
            .collect::<Vec<_>>()
            .join("\n");
        RULES
            .iter()
            .find(|(keyword, _)| code.contains(keyword))
            .map(|&(_, stage)| stage)
    }

    /// Stage from extension, falling back to keyword sniffing.
    #[must_use]
    pub fn infer(path: &PackPath, source: &str) -> Option<Self> {
        path.extension()
            .and_then(Self::from_extension)
            .or_else(|| Self::sniff(source))
    }

    /// Canonical short name (`vert`, `frag`, ...).
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Geometry => "geom",
            Self::Compute => "comp",
            Self::TessControl => "tesc",
            Self::TessEvaluation => "tese",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}
