//! The result vocabulary: statuses, severities and single check results.
//!
//! A `CheckResult` is created once and never modified. The run state folds it
//! into its counters and appends it to the state log exactly once.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome class of one verification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pass,
    Fail,
    Warn,
    Skip,
    Error,
}

impl Status {
    /// Map a validator exit code onto a status.
    ///
    /// `0 → PASS`, `1 → FAIL`, `2 → WARN`, anything else → `ERROR`.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Status::Pass,
            1 => Status::Fail,
            2 => Status::Warn,
            _ => Status::Error,
        }
    }

    /// True for the statuses that make a run fail.
    pub fn is_failure(self) -> bool {
        matches!(self, Status::Fail | Status::Error)
    }

    /// Upper-case label used in logs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Warn => "WARN",
            Status::Skip => "SKIP",
            Status::Error => "ERROR",
        }
    }

    /// Single-character console symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Status::Pass => "✓",
            Status::Fail => "✗",
            Status::Warn => "⚠",
            Status::Skip => "○",
            Status::Error => "!",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How severe a failure is. Only meaningful for `FAIL` and `ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[default]
    Normal,
    Critical,
}

/// One recorded verification outcome.
///
/// Fields are read through accessors only. The builders consume `self`, so a
/// result handed to the run state can no longer change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Human-readable description of what was checked.
    operation: String,
    status: Status,
    severity: Severity,
    /// Optional scoping information (which file, which validator).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    timestamp: DateTime<Utc>,
}

impl CheckResult {
    /// Build a result stamped with the current time.
    pub fn new(operation: impl Into<String>, status: Status) -> Self {
        Self {
            operation: operation.into(),
            status,
            severity: Severity::Normal,
            context: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set the severity. Ignored unless the status is a failure.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        if self.status.is_failure() {
            self.severity = severity;
        }
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_critical(&self) -> bool {
        self.status.is_failure() && self.severity == Severity::Critical
    }

    /// One console line: `✓ operation [context]`.
    pub fn display_line(&self) -> String {
        let mut line = format!("{} {}", self.status.symbol(), self.operation);
        if let Some(ctx) = &self.context {
            line.push_str(&format!(" [{ctx}]"));
        }
        if self.is_critical() {
            line.push_str(" (CRITICAL)");
        }
        line
    }
}
