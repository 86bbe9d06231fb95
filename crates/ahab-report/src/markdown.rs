//! Markdown report for CI artifacts and pull request comments.

use std::fmt::Write;

use ahab_contracts::{report::RunReport, result::Status};
use ahab_core::exec::{truncate_for_display, DISPLAY_LIMIT};

use crate::is_critical;

pub fn render_markdown(report: &RunReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Report\n");
    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(
        out,
        "- **Verdict:** {} (exit {})",
        report.verdict,
        report.verdict.exit_code()
    );
    let _ = writeln!(out, "- **Run:** `{}`", report.run_id);
    let _ = writeln!(out, "- **Finished:** {}", report.finished_at.to_rfc3339());
    let _ = writeln!(
        out,
        "- **Mode:** {}{}",
        report.mode,
        if report.strict { " (strict)" } else { "" }
    );
    let _ = writeln!(out, "- **Validators:** {}", report.outcomes.len());
    let _ = writeln!(out, "- **Passed:** {}", report.count_status(Status::Pass));
    let _ = writeln!(
        out,
        "- **Failed:** {} (critical: {})",
        report.failing().count(),
        report.counters.critical_failures
    );
    let _ = writeln!(out, "- **Warnings:** {}", report.count_status(Status::Warn));
    let _ = writeln!(out, "- **Skipped:** {}", report.count_status(Status::Skip));
    let _ = writeln!(out, "- **Duration:** {} ms\n", report.duration_ms());

    let _ = writeln!(out, "## Results\n");
    let _ = writeln!(out, "| Validator | Status | Duration | Message |");
    let _ = writeln!(out, "|-----------|--------|----------|---------|");
    for o in &report.outcomes {
        let _ = writeln!(
            out,
            "| {} | {} {} | {} ms | {} |",
            cell(o.validator_name.as_str()),
            o.status.symbol(),
            o.status.as_str(),
            o.duration_ms,
            cell(&o.message)
        );
    }
    out.push('\n');

    let _ = writeln!(out, "## Violations\n");
    let violations: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.status.is_failure() || o.status == Status::Warn)
        .collect();
    if violations.is_empty() {
        let _ = writeln!(out, "No violations.");
        return out;
    }
    for o in violations {
        let critical = if is_critical(report, o) { ", CRITICAL" } else { "" };
        let _ = writeln!(out, "### {} ({}{critical})\n", o.validator_name, o.status);
        let _ = writeln!(out, "{}\n", o.message);
        let output = o.output.trim_end();
        if !output.is_empty() {
            let _ = writeln!(out, "```text\n{}\n```\n", truncate_for_display(output, DISPLAY_LIMIT));
        }
    }
    out
}

/// Escape a table cell.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
