//! Console report.

use std::fmt::Write;

use ahab_contracts::{
    outcome::{RunVerdict, ValidatorOutcome},
    report::RunReport,
    result::Status,
};

use crate::{is_critical, ReportStyle};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn render_text(report: &RunReport, style: &ReportStyle) -> String {
    let paint = |color: &str, text: &str| -> String {
        if style.color {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", paint(BOLD, "Verification report"));
    let _ = writeln!(out, "Run:      {}", report.run_id);
    let _ = writeln!(
        out,
        "Mode:     {}{}",
        report.mode,
        if report.strict { " (strict)" } else { "" }
    );
    let _ = writeln!(out, "Duration: {} ms", report.duration_ms());
    out.push('\n');

    let width = report
        .outcomes
        .iter()
        .map(|o| o.validator_name.as_str().chars().count())
        .max()
        .unwrap_or(0);

    for outcome in &report.outcomes {
        let label = format!("{} {:<5}", outcome.status.symbol(), outcome.status.as_str());
        let mut line = format!(
            "  {} {:<width$}  {} ({} ms)",
            paint(status_color(outcome.status), &label),
            outcome.validator_name.as_str(),
            outcome.message,
            outcome.duration_ms,
        );
        if is_critical(report, outcome) {
            line.push_str(&format!(" {}", paint(RED, "[CRITICAL]")));
        }
        let _ = writeln!(out, "{line}");
    }
    out.push('\n');

    let skipped = report.count_status(Status::Skip);
    let counted = report.outcomes.len() - skipped;
    let passed = report.count_status(Status::Pass);
    let failed = report.failing().count();
    let _ = writeln!(
        out,
        "{passed}/{counted} passed, {failed} failed, {} warnings, {skipped} skipped",
        report.count_status(Status::Warn),
    );
    if report.counters.critical_failures > 0 {
        let _ = writeln!(out, "{} critical failure(s)", report.counters.critical_failures);
    }

    let failing: Vec<&str> = report.failing().map(|o| o.validator_name.as_str()).collect();
    if !failing.is_empty() {
        let _ = writeln!(out, "Failing validators: {}", failing.join(", "));
    }

    let verdict = format!("Verdict: {} (exit {})", report.verdict, report.verdict.exit_code());
    let _ = writeln!(out, "{}", paint(verdict_color(report.verdict), &verdict));

    if style.show_state_log && !report.state_log.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "State log:");
        for entry in &report.state_log {
            let line = format!(
                "  {} {:<12} {}",
                entry.timestamp.format("%H:%M:%S%.3f"),
                entry.category,
                entry.detail
            );
            let _ = writeln!(out, "{}", paint(DIM, &line));
        }
    }

    out
}

/// One-line summary for the end of a run, independent of the output format.
pub fn summary_line(report: &RunReport) -> String {
    let skipped = report.count_status(Status::Skip);
    let counted = report.outcomes.len() - skipped;
    let mut line = format!(
        "{}/{} passed, {} warnings: run {}",
        report.count_status(Status::Pass),
        counted,
        report.count_status(Status::Warn),
        report.verdict
    );
    let failing: Vec<&str> = report.failing().map(outcome_name).collect();
    if !failing.is_empty() {
        line.push_str(&format!(" (failing: {})", failing.join(", ")));
    }
    line
}

fn outcome_name(outcome: &ValidatorOutcome) -> &str {
    outcome.validator_name.as_str()
}

fn status_color(status: Status) -> &'static str {
    match status {
        Status::Pass => GREEN,
        Status::Fail | Status::Error => RED,
        Status::Warn => YELLOW,
        Status::Skip => DIM,
    }
}

fn verdict_color(verdict: RunVerdict) -> &'static str {
    match verdict {
        RunVerdict::Pass => GREEN,
        RunVerdict::PassWithWarnings => YELLOW,
        RunVerdict::Fail => RED,
    }
}
