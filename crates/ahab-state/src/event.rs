//! State event and log types.
//!
//! `StateEvent` is one line of the state file: a `StateEntry` with sequence
//! numbering and the SHA-256 hashes that make tampering detectable.
//! `StateLog` is the sealed view of one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ahab_contracts::state::StateEntry;

/// A single entry in the hash chain of one run.
///
/// Each event commits to the previous event of the same run via `prev_hash`.
/// Editing any field, including the embedded entry, invalidates `this_hash`
/// and every later `prev_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    /// Position in the run's chain, starting at 0.
    pub sequence: u64,

    pub run_id: String,

    pub entry: StateEntry,

    /// Hash of the previous event, or `GENESIS_HASH` for the first one.
    pub prev_hash: String,

    /// Computed by `hash_event()` over (run_id, sequence, prev_hash, entry).
    pub this_hash: String,
}

impl StateEvent {
    /// The `prev_hash` of the first event of every run.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// A sealed snapshot of one run's chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLog {
    pub run_id: String,
    pub events: Vec<StateEvent>,
    pub finalized_at: DateTime<Utc>,
    /// `this_hash` of the last event; empty when the log is empty.
    pub terminal_hash: String,
}

impl StateLog {
    pub fn entries(&self) -> impl Iterator<Item = &StateEntry> {
        self.events.iter().map(|e| &e.entry)
    }
}
