//! GLSL → SPIR-V / WGSL through `naga`.
//!
//! `naga`'s GLSL frontend has no include support, so `#include` lines are
//! resolved through the [`IncludeCallback`] and spliced in before parsing.

use naga::back::{spv, wgsl};
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};

use super::{CompileError, CompileRequest, CompilerBackend, IncludeCallback, IncludeRequest, Payload};
use crate::errors::Result;
use crate::include::parse_include;
use crate::modernize::compat::INCLUDE_EXTENSION;
use crate::pack::ShaderStage;
use crate::settings::{CompileMode, OutputKind};
use crate::syntax;

/// Compiles with the pure-Rust `naga` toolchain.
///
/// Supports vertex, fragment and compute files.
#[derive(Debug, Default)]
pub struct NagaBackend {
    initialized: bool,
}

impl NagaBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn naga_stage(stage: ShaderStage) -> Option<naga::ShaderStage> {
    match stage {
        ShaderStage::Vertex => Some(naga::ShaderStage::Vertex),
        ShaderStage::Fragment => Some(naga::ShaderStage::Fragment),
        ShaderStage::Compute => Some(naga::ShaderStage::Compute),
        _ => None,
    }
}

/// Splices every `#include` in `source`, recursively.
fn inline_includes(
    requesting: &str,
    source: &str,
    includes: &mut dyn IncludeCallback,
    depth: usize,
    out: &mut String,
) {
    let mut in_block = false;
    for line in source.lines() {
        let code = syntax::code_of(line, &mut in_block);
        if code.contains(INCLUDE_EXTENSION) && code.trim_start().starts_with('#') {
            out.push('\n');
            continue;
        }
        match parse_include(&code) {
            Some(directive) => {
                let result = includes.resolve(&IncludeRequest {
                    requested: directive.target,
                    requesting,
                    kind: directive.kind,
                    depth: depth + 1,
                });
                if result.found {
                    inline_includes(&result.resolved_name, &result.content, includes, depth + 1, out);
                } else {
                    out.push_str(&result.content);
                    out.push('\n');
                }
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
}

impl CompilerBackend for NagaBackend {
    fn name(&self) -> &str {
        "naga"
    }

    fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        log::info!("naga backend ready");
        Ok(())
    }

    fn compile(
        &mut self,
        request: &CompileRequest<'_>,
        includes: &mut dyn IncludeCallback,
    ) -> std::result::Result<Payload, CompileError> {
        if !self.initialized {
            return Err(CompileError::new("backend used before initialization"));
        }
        let stage = naga_stage(request.stage).ok_or_else(|| {
            CompileError::new(format!(
                "{}: {} shaders are not supported by the naga backend",
                request.filename, request.stage
            ))
        })?;

        let mut source = String::with_capacity(request.source.len());
        inline_includes(request.filename, request.source, includes, 0, &mut source);

        let options = glsl::Options {
            stage,
            defines: request
                .macros
                .map(|m| m.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
                .unwrap_or_default(),
        };
        let module = glsl::Frontend::default()
            .parse(&options, &source)
            .map_err(|e| {
                let mut lines = Vec::new();
                let mut message = String::new();
                for err in &e.errors {
                    let line = err.meta.location(&source).line_number;
                    lines.push(line);
                    message.push_str(&format!("{}:{line}: {}\n", request.filename, err.kind));
                }
                CompileError::with_lines(message.trim_end(), lines)
            })?;

        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| CompileError::new(format!("{}: validation failed: {e:?}", request.filename)))?;

        match request.output {
            OutputKind::Binary => {
                let flags = match request.mode {
                    CompileMode::Debug => spv::WriterFlags::DEBUG | spv::WriterFlags::LABEL_VARYINGS,
                    CompileMode::Optimized => spv::WriterFlags::empty(),
                };
                let options = spv::Options {
                    flags,
                    ..spv::Options::default()
                };
                let pipeline = spv::PipelineOptions {
                    shader_stage: stage,
                    entry_point: "main".to_string(),
                };
                let words = spv::write_vec(&module, &info, &options, Some(&pipeline))
                    .map_err(|e| CompileError::new(format!("{}: SPIR-V export failed: {e:?}", request.filename)))?;
                Ok(Payload::Binary(
                    words.iter().flat_map(|w| w.to_le_bytes()).collect(),
                ))
            }
            OutputKind::Text => wgsl::write_string(&module, &info, wgsl::WriterFlags::EXPLICIT_TYPES)
                .map(Payload::Text)
                .map_err(|e| CompileError::new(format!("{}: WGSL export failed: {e:?}", request.filename))),
        }
    }
}
