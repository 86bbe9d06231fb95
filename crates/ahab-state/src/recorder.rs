//! File-backed state recorder.
//!
//! One writer thread owns the file. `append` only enqueues a command on an
//! `mpsc` channel, so concurrent appends from parallel validator tasks are
//! serialized by the channel and no two lines can interleave. The writer
//! assigns sequence numbers, chains hashes and writes one JSON line per
//! event, flushing after each so that a crash leaves a readable tail.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
};

use tracing::{debug, info, warn};

use ahab_contracts::{
    error::{AhabError, AhabResult},
    state::{StateEntry, RUN_FINISH},
};
use ahab_core::traits::StateSink;

use crate::{chain::ChainCursor, event::StateEvent};

/// Above this size the file is rotated to `<path>.1` at finalize.
pub const ROTATE_BYTES: u64 = 4 * 1024 * 1024;

enum Command {
    Append(StateEntry),
    /// Acknowledged once every earlier command has been written.
    Barrier(mpsc::Sender<()>),
    Finish {
        context: String,
        done: mpsc::Sender<io::Result<()>>,
    },
}

#[derive(Default)]
struct Shared {
    failed_writes: AtomicU64,
    /// Every entry of this run, persisted or not.
    entries: Mutex<Vec<StateEntry>>,
}

/// A `StateSink` writing a hash-chained JSON-lines file.
pub struct FileStateRecorder {
    path: PathBuf,
    run_id: String,
    tx: Mutex<Option<mpsc::Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl FileStateRecorder {
    /// Open `path` for appending and start the writer thread.
    ///
    /// Failing to open the file is an infrastructure failure: a run must not
    /// start without somewhere to record what it does.
    pub fn init(path: impl Into<PathBuf>, run_id: impl Into<String>) -> AhabResult<Self> {
        let path = path.into();
        let run_id = run_id.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| AhabError::Infrastructure {
                reason: format!("cannot create state directory '{}': {}", parent.display(), e),
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AhabError::Infrastructure {
                reason: format!("cannot open state file '{}': {}", path.display(), e),
            })?;

        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared::default());
        let writer = Writer {
            file,
            cursor: ChainCursor::new(run_id.clone()),
            shared: Arc::clone(&shared),
        };
        let worker = thread::Builder::new()
            .name("state-recorder".to_string())
            .spawn(move || writer.run(rx))
            .map_err(|e| AhabError::Infrastructure {
                reason: format!("cannot start state writer: {}", e),
            })?;

        info!(path = %path.display(), run_id = %run_id, "state recorder opened");

        Ok(Self {
            path,
            run_id,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            shared,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn send(&self, command: Command) -> AhabResult<()> {
        let guard = self.tx.lock().map_err(|e| AhabError::StateWrite {
            reason: format!("recorder lock poisoned: {}", e),
        })?;
        let tx = guard.as_ref().ok_or_else(|| AhabError::StateWrite {
            reason: format!("run {} is already finalized", self.run_id),
        })?;
        tx.send(command).map_err(|_| AhabError::StateWrite {
            reason: "state writer has stopped".to_string(),
        })
    }

    /// Close the channel and wait for the writer to drain it.
    fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(path = %self.path.display(), "state writer panicked");
            }
        }
    }
}

impl StateSink for FileStateRecorder {
    fn append(&self, entry: StateEntry) -> AhabResult<()> {
        self.send(Command::Append(entry))
    }

    /// Write the `run.finish` marker, flush, stop the writer and rotate the
    /// file if it has grown past `ROTATE_BYTES`.
    fn finalize(&self, context: &str) -> AhabResult<()> {
        let (done_tx, done_rx) = mpsc::channel();
        self.send(Command::Finish {
            context: context.to_string(),
            done: done_tx,
        })?;

        let flushed = done_rx.recv().map_err(|_| AhabError::StateWrite {
            reason: "state writer stopped before finishing".to_string(),
        })?;
        self.shutdown();
        flushed.map_err(|e| AhabError::StateWrite {
            reason: format!("cannot flush state file '{}': {}", self.path.display(), e),
        })?;

        rotate_if_large(&self.path, ROTATE_BYTES).map_err(|e| AhabError::StateWrite {
            reason: format!("cannot rotate state file '{}': {}", self.path.display(), e),
        })?;

        info!(
            path = %self.path.display(),
            run_id = %self.run_id,
            failed_writes = self.failed_writes(),
            "state log finalized"
        );
        Ok(())
    }

    fn flush(&self) -> AhabResult<()> {
        let (done_tx, done_rx) = mpsc::channel();
        self.send(Command::Barrier(done_tx))?;
        done_rx.recv().map_err(|_| AhabError::StateWrite {
            reason: "state writer stopped before draining".to_string(),
        })
    }

    /// Exact once `flush` or `finalize` has returned.
    fn failed_writes(&self) -> u64 {
        self.shared.failed_writes.load(Ordering::SeqCst)
    }

    /// Entries the writer has processed so far. Call after `finalize` for the
    /// complete run.
    fn replay(&self) -> Vec<StateEntry> {
        self.shared
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for FileStateRecorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Writer thread ─────────────────────────────────────────────────────────────

struct Writer {
    file: File,
    cursor: ChainCursor,
    shared: Arc<Shared>,
}

impl Writer {
    fn run(mut self, rx: mpsc::Receiver<Command>) {
        for command in rx {
            match command {
                Command::Append(entry) => self.write(entry),
                Command::Barrier(done) => {
                    let _ = done.send(());
                }
                Command::Finish { context, done } => {
                    self.write(StateEntry::new(RUN_FINISH, context));
                    let flushed = self.file.flush().and_then(|()| self.file.sync_data());
                    let _ = done.send(flushed);
                    break;
                }
            }
        }
        debug!(run_id = %self.cursor.run_id(), events = self.cursor.len(), "state writer stopped");
    }

    fn write(&mut self, entry: StateEntry) {
        let event = self.cursor.seal(entry.clone());
        self.shared
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);

        if let Err(e) = self.write_line(&event) {
            self.shared.failed_writes.fetch_add(1, Ordering::SeqCst);
            warn!(
                run_id = %event.run_id,
                sequence = event.sequence,
                error = %e,
                "state log write failed"
            );
        }
    }

    fn write_line(&mut self, event: &StateEvent) -> io::Result<()> {
        let mut line = serde_json::to_vec(event).map_err(io::Error::other)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()
    }
}

// ── Rotation ──────────────────────────────────────────────────────────────────

/// `<path>.1`
pub fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".1");
    path.with_file_name(name)
}

/// Move `path` to `<path>.1` when it is larger than `limit` bytes.
///
/// Returns whether a rotation happened. A missing file is not an error.
pub fn rotate_if_large(path: &Path, limit: u64) -> io::Result<bool> {
    let len = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if len <= limit {
        return Ok(false);
    }
    let target = rotated_path(path);
    fs::rename(path, &target)?;
    info!(from = %path.display(), to = %target.display(), bytes = len, "state file rotated");
    Ok(true)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use ahab_contracts::state::{StateEntry, RUN_FINISH, RUN_START};
    use ahab_core::traits::StateSink;

    use super::*;
    use crate::{chain::verify_chain, event::StateEvent};

    fn read_events(path: &Path) -> Vec<StateEvent> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn writes_a_valid_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        let recorder = FileStateRecorder::init(&path, "run-1").unwrap();

        recorder.append(StateEntry::new(RUN_START, "run run-1")).unwrap();
        recorder.append(StateEntry::new("result.pass", "✓ docs passed")).unwrap();
        recorder.finalize("run run-1 passed").unwrap();

        let events = read_events(&path);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].prev_hash, StateEvent::GENESIS_HASH);
        assert_eq!(events[2].entry.category, RUN_FINISH);
        assert!(verify_chain(&events));
        assert_eq!(recorder.failed_writes(), 0);
    }

    #[test]
    fn replay_holds_the_whole_run() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStateRecorder::init(dir.path().join("s"), "run-r").unwrap();
        recorder.append(StateEntry::new(RUN_START, "start")).unwrap();
        recorder.finalize("done").unwrap();

        let replay = recorder.replay();
        assert_eq!(replay.len(), 2);
        assert!(replay[1].is_terminal());
    }

    #[test]
    fn concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        let recorder = Arc::new(FileStateRecorder::init(&path, "run-par").unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let recorder = Arc::clone(&recorder);
                thread::spawn(move || {
                    for i in 0..25 {
                        recorder
                            .append(StateEntry::new("exec.start", format!("task {t} line {i} {}", "x".repeat(200))))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        recorder.finalize("done").unwrap();

        let events = read_events(&path);
        assert_eq!(events.len(), 8 * 25 + 1);
        assert!(verify_chain(&events));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn flush_makes_write_failures_visible() {
        let recorder = FileStateRecorder::init("/dev/full", "run-full").unwrap();
        recorder.append(StateEntry::new(RUN_START, "run run-full")).unwrap();
        recorder.append(StateEntry::new("result.pass", "✓ docs passed")).unwrap();

        recorder.flush().unwrap();
        assert_eq!(recorder.failed_writes(), 2);
        assert_eq!(recorder.replay().len(), 2);
    }

    #[test]
    fn append_after_finalize_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStateRecorder::init(dir.path().join("s"), "run-2").unwrap();
        recorder.finalize("done").unwrap();

        let err = recorder.append(StateEntry::new("late", "too late")).unwrap_err();
        assert!(matches!(err, AhabError::StateWrite { .. }));
        assert!(recorder.finalize("again").is_err());
    }

    #[test]
    fn runs_append_to_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        for run in ["run-a", "run-b"] {
            let recorder = FileStateRecorder::init(&path, run).unwrap();
            recorder.append(StateEntry::new(RUN_START, run)).unwrap();
            recorder.finalize("done").unwrap();
        }

        let events = read_events(&path);
        assert_eq!(events.len(), 4);
        assert_eq!(events[2].run_id, "run-b");
        assert_eq!(events[2].sequence, 0);
        assert!(verify_chain(&events[2..]));
    }

    #[test]
    fn unopenable_path_is_infrastructure_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let err = FileStateRecorder::init(dir.path(), "run-x").err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn rotation_moves_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        fs::write(&path, vec![b'x'; 64]).unwrap();

        assert!(!rotate_if_large(&path, 1024).unwrap());
        assert!(rotate_if_large(&path, 16).unwrap());
        assert!(!path.exists());
        assert!(rotated_path(&path).exists());
        assert!(!rotate_if_large(&path, 16).unwrap());
    }

    #[test]
    fn rotated_path_appends_suffix() {
        assert_eq!(rotated_path(Path::new("a/.state")), PathBuf::from("a/.state.1"));
    }
}
