//! Core trait definitions for the verification engine.
//!
//! Two traits define the boundary the orchestrator works across:
//!
//! - `Validator` — untrusted check (usually an external executable)
//! - `StateSink` — trusted sink (records every operation the engine attempts)
//!
//! A validator's verdict is observed only through what `invoke()` returns: an
//! exit code plus captured output. No validator state is shared in-process.

use ahab_contracts::{error::AhabResult, outcome::ValidatorName, state::StateEntry};

use crate::exec::{ExecOutput, Limits};

/// One pluggable check.
///
/// Implementations must terminate and yield an exit code following the
/// `0 → PASS`, `1 → FAIL`, `2 → WARN`, other → `ERROR` convention. Returning
/// `Err` means no verdict could be obtained at all; the orchestrator records
/// that as `ERROR` and moves on to the next validator.
pub trait Validator: Send + Sync {
    /// Unique, stable name for this validator.
    fn name(&self) -> &ValidatorName;

    /// Run the check to completion within `limits`.
    ///
    /// `sink` receives the diagnostic entries the invocation produces.
    /// Implementations must not rely on it succeeding.
    fn invoke(&self, limits: &Limits, sink: &dyn StateSink) -> AhabResult<ExecOutput>;
}

/// The state recorder seen from the engine.
///
/// `append` is best-effort from the caller's point of view: an `Err` is
/// degraded to a warning, never a reason to stop verifying.
pub trait StateSink: Send + Sync {
    /// Append one entry. Implementations must serialize concurrent appends.
    fn append(&self, entry: StateEntry) -> AhabResult<()>;

    /// Write the terminal marker for this run and flush.
    fn finalize(&self, context: &str) -> AhabResult<()>;

    /// Block until every entry appended so far has been attempted, so that
    /// `failed_writes` is exact. Synchronous sinks have nothing to wait for.
    fn flush(&self) -> AhabResult<()> {
        Ok(())
    }

    /// Number of entries that could not be persisted so far.
    fn failed_writes(&self) -> u64 {
        0
    }

    /// Every entry recorded during this run, in append order.
    fn replay(&self) -> Vec<StateEntry> {
        Vec::new()
    }
}
