//! State log entry types.
//!
//! The state log is diagnostic, not authoritative: it exists so that a crash
//! in one run can be explained at the start of the next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of the first entry of every run.
pub const RUN_START: &str = "run.start";
/// Category of the terminal marker written by `finalize`.
pub const RUN_FINISH: &str = "run.finish";
/// Written before a command is spawned.
pub const EXEC_START: &str = "exec.start";
/// Written after a command completed, timed out or failed to spawn.
pub const EXEC_FINISH: &str = "exec.finish";

/// One immutable append to the state log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub timestamp: DateTime<Utc>,
    /// Dotted category, e.g. `exec.start` or `result.fail`.
    pub category: String,
    pub detail: String,
}

impl StateEntry {
    pub fn new(category: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category: category.into(),
            detail: detail.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.category == RUN_FINISH
    }
}
