//! Error types for the ahab verification engine.
//!
//! Every fallible operation returns `AhabResult<T>`. The variants follow the
//! engine's failure taxonomy: infrastructure and configuration failures are
//! fatal to a run, everything else is folded into a result and the run goes on.

use thiserror::Error;

/// The unified error type for the ahab crates.
#[derive(Debug, Error)]
pub enum AhabError {
    /// The engine cannot vouch for its own bookkeeping (state sink could not be
    /// opened, counters overflowed). Fatal.
    #[error("infrastructure failure: {reason}")]
    Infrastructure { reason: String },

    /// A configuration value is missing or invalid. Fatal.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// A command could not be started at all.
    #[error("failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    /// A state log entry could not be handed to the recorder.
    ///
    /// Degrades to a warning; the run continues on in-memory state.
    #[error("state log write failed: {reason}")]
    StateWrite { reason: String },

    /// The report could not be rendered, verified or written.
    #[error("report error: {reason}")]
    Report { reason: String },

    /// An in-process validator failed without producing an exit code.
    #[error("validator '{name}' failed: {reason}")]
    Validator { name: String, reason: String },
}

impl AhabError {
    /// True for the variants that must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AhabError::Infrastructure { .. } | AhabError::Config { .. })
    }
}

/// Convenience alias used throughout the ahab crates.
pub type AhabResult<T> = Result<T, AhabError>;
