//! The JSON report schema and its verifier.
//!
//! Every JSON report is validated against this document before it leaves the
//! crate, so downstream tooling can rely on field presence.

use serde_json::Value;
use tracing::warn;

use ahab_contracts::error::{AhabError, AhabResult};

/// JSON Schema (draft 2020-12) for the JSON report.
pub const REPORT_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "title": "ahab-verify run report",
  "type": "object",
  "required": [
    "timestamp",
    "run_id",
    "verdict",
    "total_validators",
    "total_passed",
    "total_errors",
    "total_warnings",
    "total_skipped",
    "critical_failures",
    "results"
  ],
  "properties": {
    "timestamp": { "type": "string", "minLength": 1 },
    "run_id": { "type": "string", "minLength": 1 },
    "verdict": { "enum": ["pass", "pass_with_warnings", "fail"] },
    "mode": { "enum": ["sequential", "parallel"] },
    "strict": { "type": "boolean" },
    "total_validators": { "type": "integer", "minimum": 0 },
    "total_passed": { "type": "integer", "minimum": 0 },
    "total_errors": { "type": "integer", "minimum": 0 },
    "total_warnings": { "type": "integer", "minimum": 0 },
    "total_skipped": { "type": "integer", "minimum": 0 },
    "critical_failures": { "type": "integer", "minimum": 0 },
    "results": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["validator", "status", "duration_ms", "message"],
        "properties": {
          "validator": { "type": "string", "minLength": 1 },
          "status": { "enum": ["PASS", "FAIL", "WARN", "SKIP", "ERROR"] },
          "duration_ms": { "type": "integer", "minimum": 0 },
          "exit_code": { "type": ["integer", "null"] },
          "message": { "type": "string" }
        }
      }
    }
  }
}"#;

/// Validate `report` against `REPORT_SCHEMA`.
///
/// All violations are collected into one `AhabError::Report`.
pub fn verify_report_json(report: &Value) -> AhabResult<()> {
    let schema: Value = serde_json::from_str(REPORT_SCHEMA).map_err(|e| AhabError::Report {
        reason: format!("embedded report schema is not valid JSON: {e}"),
    })?;
    let validator = jsonschema::validator_for(&schema).map_err(|e| AhabError::Report {
        reason: format!("invalid report schema document: {e}"),
    })?;

    let violations: Vec<String> = validator
        .iter_errors(report)
        .map(|error| format!("at {}: {}", error.instance_path, error))
        .collect();

    if violations.is_empty() {
        return Ok(());
    }
    for message in &violations {
        warn!(%message, "report schema violation");
    }
    Err(AhabError::Report {
        reason: format!("JSON report violates schema: {}", violations.join("; ")),
    })
}
