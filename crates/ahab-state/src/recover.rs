//! Startup recovery: explain how the previous run ended.
//!
//! Runs are never resumed. `recover` reads the tail of the state file, picks
//! out the most recent run and reports whether it reached its `run.finish`
//! marker and whether its chain still verifies.

use std::{
    fmt,
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use ahab_contracts::{
    error::{AhabError, AhabResult},
    state::RUN_FINISH,
};

use crate::{
    chain::{verify_chain, verify_chain_from},
    event::StateEvent,
    recorder::rotated_path,
};

/// Only this much of the end of the file is read.
pub const TAIL_BYTES: u64 = 256 * 1024;

/// What the state file says about the most recent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub run_id: String,
    /// `category: detail` of the last entry before any terminal marker.
    pub last_operation: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
    /// A `run.finish` marker was found for this run.
    pub clean_exit: bool,
    /// The run's events in the tail verify and no line was unreadable.
    pub intact: bool,
    /// Events of this run found in the tail.
    pub events: usize,
}

impl fmt::Display for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clean_exit {
            write!(f, "previous run {} finished cleanly", self.run_id)?;
        } else {
            write!(f, "previous run {} did not finish", self.run_id)?;
            if let Some(op) = &self.last_operation {
                write!(f, " (last operation: {op})")?;
            }
        }
        if !self.intact {
            f.write_str("; state log failed integrity check")?;
        }
        Ok(())
    }
}

/// Inspect the state file at `path`.
///
/// Falls back to the rotated `<path>.1` when `path` is missing or empty.
/// Returns `Ok(None)` when there is no previous run to explain.
pub fn recover(path: &Path) -> AhabResult<Option<Recovery>> {
    let tail = match read_tail(path, TAIL_BYTES)? {
        Some(tail) => tail,
        None => match read_tail(&rotated_path(path), TAIL_BYTES)? {
            Some(tail) => tail,
            None => return Ok(None),
        },
    };
    Ok(summarize(&tail))
}

/// Build a `Recovery` from raw JSON-lines text.
pub fn summarize(tail: &str) -> Option<Recovery> {
    let mut events = Vec::new();
    let mut unreadable = 0usize;
    for line in tail.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<StateEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => {
                unreadable += 1;
                debug!(error = %e, "unreadable state log line");
            }
        }
    }

    let run_id = events.last()?.run_id.clone();
    let start = events
        .iter()
        .rposition(|e| e.run_id != run_id)
        .map_or(0, |i| i + 1);
    let run = &events[start..];

    let chain_ok = match run.first() {
        Some(first) if first.sequence == 0 => verify_chain(run),
        Some(first) => verify_chain_from(run, &first.prev_hash),
        None => true,
    };
    let intact = chain_ok && unreadable == 0;
    if !intact {
        warn!(run_id = %run_id, unreadable, "previous state log failed integrity check");
    }

    let clean_exit = run.iter().any(|e| e.entry.category == RUN_FINISH);
    let last = run.iter().rev().find(|e| e.entry.category != RUN_FINISH);

    Some(Recovery {
        run_id,
        last_operation: last.map(|e| format!("{}: {}", e.entry.category, e.entry.detail)),
        last_timestamp: last.map(|e| e.entry.timestamp),
        clean_exit,
        intact,
        events: run.len(),
    })
}

/// The last `limit` bytes of `path`, starting on a line boundary.
///
/// `None` when the file does not exist or is empty.
fn read_tail(path: &Path, limit: u64) -> AhabResult<Option<String>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(read_error(path, e)),
    };
    let len = file.metadata().map_err(|e| read_error(path, e))?.len();
    if len == 0 {
        return Ok(None);
    }

    let offset = len.saturating_sub(limit);
    file.seek(SeekFrom::Start(offset)).map_err(|e| read_error(path, e))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| read_error(path, e))?;

    if offset > 0 {
        // Drop the partial first line.
        match bytes.iter().position(|b| *b == b'\n') {
            Some(nl) => {
                bytes.drain(..=nl);
            }
            None => bytes.clear(),
        }
    }
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

fn read_error(path: &Path, e: io::Error) -> AhabError {
    AhabError::Infrastructure {
        reason: format!("cannot read state file '{}': {}", path.display(), e),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;

    use ahab_contracts::state::{StateEntry, EXEC_START, RUN_START};
    use ahab_core::traits::StateSink;

    use super::*;
    use crate::recorder::FileStateRecorder;

    fn state_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join(".ahab-verify.state")
    }

    #[test]
    fn missing_file_means_no_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(recover(&state_path(&dir)).unwrap(), None);
    }

    #[test]
    fn clean_run_is_reported_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        let recorder = FileStateRecorder::init(&path, "run-ok").unwrap();
        recorder.append(StateEntry::new(RUN_START, "run run-ok")).unwrap();
        recorder.append(StateEntry::new("result.pass", "✓ docs passed")).unwrap();
        recorder.finalize("run run-ok passed").unwrap();

        let recovery = recover(&path).unwrap().unwrap();
        assert_eq!(recovery.run_id, "run-ok");
        assert!(recovery.clean_exit);
        assert!(recovery.intact);
        assert_eq!(recovery.last_operation.as_deref(), Some("result.pass: ✓ docs passed"));
        assert!(recovery.to_string().contains("finished cleanly"));
    }

    #[test]
    fn interrupted_run_names_last_operation() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        {
            let recorder = FileStateRecorder::init(&path, "run-crash").unwrap();
            recorder.append(StateEntry::new(RUN_START, "run run-crash")).unwrap();
            recorder.append(StateEntry::new(EXEC_START, "secrets: validate-secrets.sh")).unwrap();
            // Dropped without finalize, as after a crash.
        }

        let recovery = recover(&path).unwrap().unwrap();
        assert!(!recovery.clean_exit);
        assert!(recovery.intact);
        assert_eq!(recovery.events, 2);
        assert!(recovery.last_operation.unwrap().contains("validate-secrets.sh"));
    }

    #[test]
    fn only_the_latest_run_is_considered() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        let first = FileStateRecorder::init(&path, "run-1").unwrap();
        first.append(StateEntry::new(RUN_START, "one")).unwrap();
        first.finalize("done").unwrap();
        let second = FileStateRecorder::init(&path, "run-2").unwrap();
        second.append(StateEntry::new(RUN_START, "two")).unwrap();
        drop(second);

        let recovery = recover(&path).unwrap().unwrap();
        assert_eq!(recovery.run_id, "run-2");
        assert!(!recovery.clean_exit);
    }

    #[test]
    fn tampered_log_is_not_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        let recorder = FileStateRecorder::init(&path, "run-t").unwrap();
        recorder.append(StateEntry::new("result.fail", "✗ secrets exited with code 1")).unwrap();
        recorder.finalize("failed").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replace("✗ secrets exited with code 1", "✓ secrets passed")).unwrap();

        let recovery = recover(&path).unwrap().unwrap();
        assert!(!recovery.intact);
        assert!(recovery.to_string().contains("integrity"));
    }

    #[test]
    fn torn_last_line_is_not_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        let recorder = FileStateRecorder::init(&path, "run-torn").unwrap();
        recorder.append(StateEntry::new(RUN_START, "start")).unwrap();
        drop(recorder);

        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("{\"sequence\":1,\"run_id\":\"run-t");
        fs::write(&path, text).unwrap();

        let recovery = recover(&path).unwrap().unwrap();
        assert_eq!(recovery.run_id, "run-torn");
        assert!(!recovery.intact);
    }

    #[test]
    fn rotated_file_is_used_when_current_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        let recorder = FileStateRecorder::init(&path, "run-old").unwrap();
        recorder.finalize("done").unwrap();
        fs::rename(&path, rotated_path(&path)).unwrap();

        let recovery = recover(&path).unwrap().unwrap();
        assert_eq!(recovery.run_id, "run-old");
        assert!(recovery.clean_exit);
    }

    #[test]
    fn tail_read_skips_partial_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        fs::write(&path, "aaaa\nbbbb\ncccc\n").unwrap();
        let tail = read_tail(&path, 7).unwrap().unwrap();
        assert_eq!(tail, "cccc\n");
    }
}
