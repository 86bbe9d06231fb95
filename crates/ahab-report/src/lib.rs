//! # ahab-report
//!
//! Renders a finalized `RunReport` as text, JSON or Markdown.
//!
//! Every format is a pure projection of the report: counts come from the
//! per-validator outcomes, never from re-reading captured output. JSON is
//! checked against an embedded JSON Schema with the `jsonschema` crate before
//! it is returned.

pub mod json;
pub mod markdown;
pub mod schema;
pub mod text;

use std::{fs, path::Path};

use tracing::info;

use ahab_contracts::{
    error::{AhabError, AhabResult},
    outcome::ValidatorOutcome,
    report::{ReportFormat, RunReport},
};

pub use json::{render_json, to_value};
pub use markdown::render_markdown;
pub use schema::{verify_report_json, REPORT_SCHEMA};
pub use text::{render_text, summary_line};

/// Presentation switches for the text format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportStyle {
    /// ANSI colors on statuses and the verdict.
    pub color: bool,
    /// Append the replayed state log.
    pub show_state_log: bool,
}

impl Default for ReportStyle {
    fn default() -> Self {
        Self { color: false, show_state_log: true }
    }
}

/// Render `report` in `format`.
pub fn render(report: &RunReport, format: ReportFormat, style: &ReportStyle) -> AhabResult<String> {
    match format {
        ReportFormat::Text => Ok(render_text(report, style)),
        ReportFormat::Json => render_json(report),
        ReportFormat::Markdown => Ok(render_markdown(report)),
    }
}

/// Write a rendered report to `path`, creating parent directories.
pub fn write_report(path: &Path, contents: &str) -> AhabResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| AhabError::Report {
            reason: format!("cannot create report directory '{}': {}", parent.display(), e),
        })?;
    }
    fs::write(path, contents).map_err(|e| AhabError::Report {
        reason: format!("cannot write report '{}': {}", path.display(), e),
    })?;
    info!(path = %path.display(), bytes = contents.len(), "report written");
    Ok(())
}

/// True when the run recorded a CRITICAL failure for this validator.
pub(crate) fn is_critical(report: &RunReport, outcome: &ValidatorOutcome) -> bool {
    report
        .results
        .iter()
        .any(|r| r.is_critical() && r.context() == Some(outcome.validator_name.as_str()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
