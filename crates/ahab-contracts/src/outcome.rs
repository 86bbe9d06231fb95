//! Per-validator outcomes and the run-level verdict.
//!
//! A `ValidatorOutcome` is the orchestrator's record of one validator
//! invocation. It is driven by the validator's exit code, not by whatever the
//! validator printed about its own internal checks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::result::Status;

/// Stable identifier of a validator, e.g. `code-compliance`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValidatorName(pub String);

impl ValidatorName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The orchestrator's record of one validator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorOutcome {
    pub validator_name: ValidatorName,
    pub status: Status,
    pub duration_ms: u64,
    /// Exit code, absent on timeout, signal death, spawn failure or skip.
    pub exit_code: Option<i32>,
    /// One-line explanation ("exited with code 1", "timed out after 2s").
    pub message: String,
    /// Full captured stdout followed by stderr.
    #[serde(default)]
    pub output: String,
}

/// How validators are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// The aggregate decision for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    Pass,
    PassWithWarnings,
    Fail,
}

impl RunVerdict {
    /// Decide the verdict from per-validator statuses.
    ///
    /// Any `FAIL`/`ERROR` fails the run. Otherwise any `WARN` yields
    /// `PassWithWarnings`, or `Fail` when `strict` is set.
    pub fn from_statuses<I>(statuses: I, strict: bool) -> Self
    where
        I: IntoIterator<Item = Status>,
    {
        let mut warned = false;
        for status in statuses {
            match status {
                Status::Fail | Status::Error => return RunVerdict::Fail,
                Status::Warn => warned = true,
                Status::Pass | Status::Skip => {}
            }
        }
        match (warned, strict) {
            (true, true) => RunVerdict::Fail,
            (true, false) => RunVerdict::PassWithWarnings,
            (false, _) => RunVerdict::Pass,
        }
    }

    /// Process exit code, mirroring the per-validator convention.
    pub fn exit_code(self) -> i32 {
        match self {
            RunVerdict::Pass => 0,
            RunVerdict::Fail => 1,
            RunVerdict::PassWithWarnings => 2,
        }
    }

    pub fn is_success(self) -> bool {
        !matches!(self, RunVerdict::Fail)
    }
}

impl fmt::Display for RunVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunVerdict::Pass => f.write_str("passed"),
            RunVerdict::PassWithWarnings => f.write_str("passed with warnings"),
            RunVerdict::Fail => f.write_str("failed"),
        }
    }
}
