//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. run_id as UTF-8 bytes
//!   2. sequence as 8-byte little-endian
//!   3. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   4. entry timestamp as RFC 3339 with nanoseconds
//!   5. category length (8-byte LE) then category bytes
//!   6. detail length (8-byte LE) then detail bytes
//!
//! Lengths prefix the free-text fields so that moving bytes between
//! `category` and `detail` changes the hash.

use chrono::SecondsFormat;
use sha2::{Digest, Sha256};

use ahab_contracts::state::StateEntry;

use crate::event::StateEvent;

/// Assigns sequence numbers and links the events of one run.
#[derive(Debug, Clone)]
pub struct ChainCursor {
    run_id: String,
    sequence: u64,
    last_hash: String,
}

impl ChainCursor {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            sequence: 0,
            last_hash: StateEvent::GENESIS_HASH.to_string(),
        }
    }

    /// Wrap `entry` as the next event of the chain and advance.
    pub fn seal(&mut self, entry: StateEntry) -> StateEvent {
        let prev_hash = std::mem::take(&mut self.last_hash);
        let this_hash = hash_event(&self.run_id, self.sequence, &entry, &prev_hash);
        let event = StateEvent {
            sequence: self.sequence,
            run_id: self.run_id.clone(),
            entry,
            prev_hash,
            this_hash: this_hash.clone(),
        };
        self.sequence += 1;
        self.last_hash = this_hash;
        event
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    /// Events sealed so far.
    pub fn len(&self) -> u64 {
        self.sequence
    }

    pub fn is_empty(&self) -> bool {
        self.sequence == 0
    }
}

/// SHA-256 of one event's content, as 64 lowercase hex chars.
pub fn hash_event(run_id: &str, sequence: u64, entry: &StateEntry, prev_hash: &str) -> String {
    let timestamp = entry.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);

    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(timestamp.as_bytes());
    hasher.update((entry.category.len() as u64).to_le_bytes());
    hasher.update(entry.category.as_bytes());
    hasher.update((entry.detail.len() as u64).to_le_bytes());
    hasher.update(entry.detail.as_bytes());

    hex::encode(hasher.finalize())
}

/// Verify a complete chain that starts at `GENESIS_HASH`.
///
/// An empty chain is valid.
pub fn verify_chain(events: &[StateEvent]) -> bool {
    verify_chain_from(events, StateEvent::GENESIS_HASH)
}

/// Verify a chain segment whose first event must link to `start_prev`.
///
/// Checks prev-hash linkage, recomputed hashes and contiguous sequence
/// numbers. Returns `false` at the first mismatch.
pub fn verify_chain_from(events: &[StateEvent], start_prev: &str) -> bool {
    let mut expected_prev = start_prev.to_string();
    let mut expected_seq = events.first().map(|e| e.sequence).unwrap_or(0);

    for event in events {
        if event.prev_hash != expected_prev || event.sequence != expected_seq {
            return false;
        }

        let recomputed = hash_event(&event.run_id, event.sequence, &event.entry, &event.prev_hash);
        if event.this_hash != recomputed {
            return false;
        }

        expected_prev = event.this_hash.clone();
        expected_seq += 1;
    }

    true
}
