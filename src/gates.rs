//! Quality Gates parsing (spec.md §4.6 MergeEpic, §6 "parseable Quality
//! Gates table").
//!
//! `reality.md` carries a markdown table of the form `| Tool | Command |
//! Purpose |` that the merge prompt includes verbatim so the merging
//! agent knows which checks to run before merging a mirror back. Grounded
//! in `signals/parser.rs`'s `LazyLock<Regex>` idiom for compiling patterns
//! once per process.

use regex::Regex;
use std::sync::LazyLock;

static TABLE_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|\s*(.+?)\s*\|\s*(.+?)\s*\|\s*(.+?)\s*\|$").unwrap());

/// One row of the Quality Gates table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityGate {
    pub tool: String,
    pub command: String,
    pub purpose: String,
}

/// Parses every `| Tool | Command | Purpose |` row out of `reality.md`,
/// skipping the header and separator rows. Order is preserved.
pub fn parse_quality_gates(reality_md: &str) -> Vec<QualityGate> {
    let mut gates = Vec::new();
    let mut in_table = false;
    for line in reality_md.lines() {
        let trimmed = line.trim();
        let Some(caps) = TABLE_ROW.captures(trimmed) else {
            in_table = false;
            continue;
        };
        let tool = caps[1].to_string();
        let command = caps[2].to_string();
        let purpose = caps[3].to_string();

        if !in_table {
            // First matching row after a non-table line is the header;
            // the row right after it is the `---|---|---` separator.
            in_table = true;
            continue;
        }
        if tool.chars().all(|c| c == '-' || c == ':') {
            continue;
        }
        gates.push(QualityGate { tool, command, purpose });
    }
    gates
}

/// Renders gates back into the markdown block the merge prompt embeds.
pub fn render_quality_gates(gates: &[QualityGate]) -> String {
    if gates.is_empty() {
        return String::new();
    }
    let mut out = String::from("| Tool | Command | Purpose |\n|---|---|---|\n");
    for gate in gates {
        out.push_str(&format!("| {} | {} | {} |\n", gate.tool, gate.command, gate.purpose));
    }
    out
}
