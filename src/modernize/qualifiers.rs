//! Pass 3: storage qualifiers and interface locations.
//!
//! `attribute` becomes `in`; `varying` becomes `out` (or `in` in fragment
//! files). Every global interface variable without an explicit location gets
//! one, counting inputs and outputs separately in encounter order. Matrices
//! and arrays take as many slots as they occupy, and locations already written
//! in the source are never handed out again.
//!
//! Multi-declarator lines are split so every variable carries its own layout.
//! Locations are per file; matching a vertex file's outputs to a fragment
//! file's inputs is left to whoever links the two.

use std::sync::LazyLock;

use regex::Regex;

use super::{Unit, scanner};
use crate::pack::ShaderStage;
use crate::syntax;

static DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*((?:(?:flat|smooth|noperspective|centroid|invariant|sample|patch)\s+)*)(attribute|varying|in|out)\s+((?:(?:highp|mediump|lowp)\s+)?)([A-Za-z_]\w*)\s+([^;{}()]+);\s*$",
    )
    .expect("interface declaration regex")
});

static DECLARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_]\w*)\s*((?:\[[^\]]*\]\s*)*)$").expect("declarator regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

fn direction(qualifier: &str, stage: ShaderStage) -> Direction {
    match qualifier {
        "attribute" | "in" => Direction::In,
        "varying" if stage == ShaderStage::Fragment => Direction::In,
        _ => Direction::Out,
    }
}

/// A parsed interface declaration line.
struct Declaration<'a> {
    interpolation: &'a str,
    direction: Direction,
    precision: &'a str,
    ty: &'a str,
    /// `(name, array suffix)` per declarator.
    declarators: Vec<(&'a str, &'a str)>,
}

fn parse(code: &str, stage: ShaderStage) -> Option<Declaration<'_>> {
    let caps = DECL_RE.captures(code)?;
    let declarators = scanner::split_top_level(caps.get(5)?.as_str(), ',')
        .into_iter()
        .map(|d| {
            let d = DECLARATOR_RE.captures(d)?;
            Some((d.get(1)?.as_str(), d.get(2).map_or("", |m| m.as_str().trim())))
        })
        .collect::<Option<Vec<_>>>()?;
    Some(Declaration {
        interpolation: caps.get(1).map_or("", |m| m.as_str()),
        direction: direction(caps.get(2)?.as_str(), stage),
        precision: caps.get(3).map_or("", |m| m.as_str()),
        ty: caps.get(4)?.as_str(),
        declarators,
    })
}

/// Trailing comment text of a line, if any.
fn comment_of(line: &str, in_block: &mut bool) -> String {
    syntax::split_line(line, in_block)
        .iter()
        .filter(|s| !s.is_code)
        .map(|s| s.text)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn run(unit: &mut Unit) {
    let stage = unit.stage;
    let info = scanner::analyze(&unit.lines);

    // Reserve locations written in the source.
    for line in info.iter().filter(|l| l.depth == 0) {
        let (Some(layout), rest) = scanner::take_layout(&line.code) else {
            continue;
        };
        let (Some(location), Some(decl)) = (layout.location, parse(rest, stage)) else {
            continue;
        };
        let slots = decl
            .declarators
            .iter()
            .map(|(_, array)| scanner::slot_count(decl.ty, array))
            .sum();
        match decl.direction {
            Direction::In => unit.inputs.reserve(location, slots),
            Direction::Out => unit.outputs.reserve(location, slots),
        }
    }

    let mut out = Vec::with_capacity(unit.lines.len());
    let mut in_block = false;
    for (line, meta) in unit.lines.iter().zip(&info) {
        let comment = comment_of(line, &mut in_block);
        let decl = (meta.depth == 0 && !meta.code.trim_start().starts_with("layout"))
            .then(|| parse(&meta.code, stage))
            .flatten();
        let Some(decl) = decl else {
            out.push(line.clone());
            continue;
        };

        let indent = syntax::indentation(line);
        if decl.declarators.iter().any(|(name, _)| name.starts_with("gl_")) {
            // Built-in redeclarations are replaced by the builtins pass.
            out.push(format!("{indent}// {}", line.trim()));
            continue;
        }

        let keyword = match decl.direction {
            Direction::In => "in",
            Direction::Out => "out",
        };
        for (i, (name, array)) in decl.declarators.iter().enumerate() {
            let slots = scanner::slot_count(decl.ty, array);
            let (allocator, report) = match decl.direction {
                Direction::In => (&mut unit.inputs, &mut unit.report.inputs),
                Direction::Out => (&mut unit.outputs, &mut unit.report.outputs),
            };
            let location = allocator.allocate(slots);
            report.push(((*name).to_string(), location));

            let mut rendered = format!(
                "{indent}layout(location = {location}) {}{keyword} {}{} {name}{array};",
                decl.interpolation, decl.precision, decl.ty
            );
            if i == 0 && !comment.is_empty() {
                rendered.push(' ');
                rendered.push_str(&comment);
            }
            out.push(rendered);
        }
    }
    unit.lines = out;
}
