//! In-memory implementation of `StateSink`.
//!
//! `InMemoryStateRecorder` keeps the chained events in a `Vec` behind a
//! `Mutex`. It applies the same chaining as the file recorder, without a
//! file, for tests and for library callers that want no disk state.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::info;

use ahab_contracts::{
    error::{AhabError, AhabResult},
    state::{StateEntry, RUN_FINISH},
};
use ahab_core::traits::StateSink;

use crate::{
    chain::{verify_chain, ChainCursor},
    event::{StateEvent, StateLog},
};

pub(crate) struct InMemoryState {
    pub(crate) events: Vec<StateEvent>,
    pub(crate) cursor: ChainCursor,
    pub(crate) finalized: bool,
}

/// An append-only, hash-chained recorder that never touches disk.
pub struct InMemoryStateRecorder {
    run_id: String,
    pub(crate) state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryStateRecorder {
    pub fn new(run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let state = InMemoryState {
            events: Vec::new(),
            cursor: ChainCursor::new(run_id.clone()),
            finalized: false,
        };
        Self {
            run_id,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Sealed snapshot of everything recorded so far.
    pub fn export_log(&self) -> StateLog {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        StateLog {
            run_id: self.run_id.clone(),
            events: state.events.clone(),
            finalized_at: Utc::now(),
            terminal_hash: state.events.last().map(|e| e.this_hash.clone()).unwrap_or_default(),
        }
    }

    pub fn verify_integrity(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        verify_chain(&state.events)
    }

    fn push(&self, entry: StateEntry) -> AhabResult<()> {
        let mut state = self.state.lock().map_err(|e| AhabError::StateWrite {
            reason: format!("state lock poisoned: {}", e),
        })?;
        if state.finalized {
            return Err(AhabError::StateWrite {
                reason: format!("run {} is already finalized", self.run_id),
            });
        }
        let event = state.cursor.seal(entry);
        state.events.push(event);
        Ok(())
    }
}

impl StateSink for InMemoryStateRecorder {
    fn append(&self, entry: StateEntry) -> AhabResult<()> {
        self.push(entry)
    }

    /// Seal the run with a `run.finish` marker. Later appends are rejected.
    fn finalize(&self, context: &str) -> AhabResult<()> {
        self.push(StateEntry::new(RUN_FINISH, context))?;

        let mut state = self.state.lock().map_err(|e| AhabError::StateWrite {
            reason: format!("state lock poisoned: {}", e),
        })?;
        state.finalized = true;

        info!(
            run_id = %self.run_id,
            event_count = state.events.len(),
            terminal_hash = %state.cursor.last_hash(),
            "state log finalized"
        );
        Ok(())
    }

    fn replay(&self) -> Vec<StateEntry> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.events.iter().map(|e| e.entry.clone()).collect()
    }
}
