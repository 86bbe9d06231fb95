//! Counters and the finalized run report.
//!
//! `RunReport` is the only input the report generator sees. Every rendered
//! format is a projection of it; nothing is re-derived from captured output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    outcome::{ExecutionMode, RunVerdict, ValidatorOutcome},
    result::{CheckResult, Status},
    state::StateEntry,
};

/// Run-level bookkeeping.
///
/// Invariants after every fold: `total == passed + failed` and
/// `critical_failures <= failed`. Warnings and skips are tracked on the side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub warnings: u64,
    pub critical_failures: u64,
    pub skipped: u64,
}

impl Counters {
    /// Check both counter invariants.
    pub fn is_consistent(&self) -> bool {
        self.total == self.passed + self.failed && self.critical_failures <= self.failed
    }
}

/// The finalized state of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: ExecutionMode,
    pub strict: bool,
    pub counters: Counters,
    /// One entry per validator, in discovery order.
    pub outcomes: Vec<ValidatorOutcome>,
    /// Every result recorded during the run, in insertion order.
    pub results: Vec<CheckResult>,
    pub verdict: RunVerdict,
    /// Replay of the state log written during this run.
    #[serde(default)]
    pub state_log: Vec<StateEntry>,
}

impl RunReport {
    pub fn count_status(&self, status: Status) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Outcomes that made the run fail, in discovery order.
    pub fn failing(&self) -> impl Iterator<Item = &ValidatorOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_failure())
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Rendering format for a `RunReport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Markdown,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            other => Err(format!("unknown report format '{other}' (expected text, json or markdown)")),
        }
    }
}
