//! JSON projection of a `RunReport`.

use serde::Serialize;
use serde_json::Value;

use ahab_contracts::{
    error::{AhabError, AhabResult},
    outcome::{ExecutionMode, RunVerdict},
    report::RunReport,
    result::Status,
};

use crate::schema::verify_report_json;

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    timestamp: String,
    run_id: &'a str,
    verdict: RunVerdict,
    mode: ExecutionMode,
    strict: bool,
    duration_ms: u64,
    total_validators: usize,
    total_passed: usize,
    /// FAIL and ERROR outcomes.
    total_errors: usize,
    total_warnings: usize,
    total_skipped: usize,
    critical_failures: u64,
    results: Vec<JsonResult<'a>>,
}

#[derive(Debug, Serialize)]
struct JsonResult<'a> {
    validator: &'a str,
    status: Status,
    duration_ms: u64,
    exit_code: Option<i32>,
    message: &'a str,
}

/// Build the JSON value. Totals are counted from the per-validator outcomes.
pub fn to_value(report: &RunReport) -> AhabResult<Value> {
    let doc = JsonReport {
        timestamp: report.finished_at.to_rfc3339(),
        run_id: &report.run_id,
        verdict: report.verdict,
        mode: report.mode,
        strict: report.strict,
        duration_ms: report.duration_ms(),
        total_validators: report.outcomes.len(),
        total_passed: report.count_status(Status::Pass),
        total_errors: report.count_status(Status::Fail) + report.count_status(Status::Error),
        total_warnings: report.count_status(Status::Warn),
        total_skipped: report.count_status(Status::Skip),
        critical_failures: report.counters.critical_failures,
        results: report
            .outcomes
            .iter()
            .map(|o| JsonResult {
                validator: o.validator_name.as_str(),
                status: o.status,
                duration_ms: o.duration_ms,
                exit_code: o.exit_code,
                message: &o.message,
            })
            .collect(),
    };
    serde_json::to_value(&doc).map_err(|e| AhabError::Report {
        reason: format!("cannot serialize report: {e}"),
    })
}

/// Pretty-printed JSON, verified against the report schema.
pub fn render_json(report: &RunReport) -> AhabResult<String> {
    let value = to_value(report)?;
    verify_report_json(&value)?;
    serde_json::to_string_pretty(&value).map_err(|e| AhabError::Report {
        reason: format!("cannot serialize report: {e}"),
    })
}
