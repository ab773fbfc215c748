//! Pass 1: version directive.
//!
//! The first `#version` below the floor is raised to it; a missing directive
//! is inserted. Later `#version` lines (typically dragged in by flattening)
//! are commented out, and a directive preceded by code is moved to the top.

use std::sync::LazyLock;

use regex::Regex;

use super::{Unit, scanner};

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#\s*version\s+(\d+)").expect("version regex"));

pub fn run(unit: &mut Unit) {
    let info = scanner::analyze(&unit.lines);
    let mut first: Option<(usize, u32)> = None;
    let mut duplicates = Vec::new();

    for (idx, line) in info.iter().enumerate() {
        let Some(caps) = VERSION_RE.captures(&line.code) else {
            continue;
        };
        if first.is_none() {
            first = Some((idx, caps[1].parse().unwrap_or(0)));
        } else {
            duplicates.push(idx);
        }
    }

    for idx in duplicates {
        let line = &mut unit.lines[idx];
        log::debug!("commenting out duplicate version directive: {}", line.trim());
        *line = format!("// {}", line.trim());
    }

    let floor = unit.version_floor;
    match first {
        None => {
            unit.lines.insert(0, format!("#version {floor}"));
            unit.report.version = floor;
        }
        Some((idx, version)) => {
            if version < floor {
                unit.lines[idx] = format!("#version {floor}");
                unit.report.version = floor;
            } else {
                unit.report.version = version;
            }
            let code_before = info[..idx].iter().any(|l| !l.code.trim().is_empty());
            if code_before {
                let line = unit.lines.remove(idx);
                unit.lines.insert(0, line);
            }
        }
    }

    unit.header_end = scanner::insertion_point(&unit.lines);
}
