//! Persisted run artifacts for the external dashboard renderer.
//!
//! Two outputs per run:
//! - `run_summary.json` — the machine-readable [`RunSummary`] handoff
//! - a rendered text table for terminal consumption

use crate::status::AcceptPolicy;
use crate::summary::{Overall, RunSummary};
use anyhow::{Context, Result};
use std::path::Path;

/// Write `run_summary.json` in pretty JSON format.
pub fn write_run_summary_json(path: &Path, summary: &RunSummary) -> Result<()> {
    let content = serde_json::to_string_pretty(summary).context("serialize run summary")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render the per-item table and count line for terminal output.
///
/// Items the policy rejects are marked `✗`, accepted items `✓`.
pub fn render_text_table(summary: &RunSummary, policy: &AcceptPolicy) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Regression Summary: {} (run {})\n",
        summary.category, summary.run_id
    ));
    out.push_str("=========================================\n");

    let unit_width = summary
        .outcomes
        .iter()
        .map(|o| o.item.unit.len())
        .max()
        .unwrap_or(4)
        .max(4);

    for outcome in &summary.outcomes {
        let mark = if policy.accepts(outcome.result.status) {
            '✓'
        } else {
            '✗'
        };
        out.push_str(&format!(
            "  {} {:unit_width$}  {:12}  {:>7}ms  {}\n",
            mark,
            outcome.item.unit,
            outcome.result.status.as_str(),
            outcome.result.duration_ms,
            outcome.result.details,
        ));
    }

    out.push_str("\nCounts:");
    for (status, count) in &summary.counts {
        out.push_str(&format!(" {}={}", status.as_str(), count));
    }
    out.push('\n');
    out.push_str(&format!(
        "Overall: {}\n",
        match summary.overall {
            Overall::Passing => "PASSING",
            Overall::Failing => "FAILING",
        }
    ));
    out
}
