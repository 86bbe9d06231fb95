//! Bounded-timeout command execution.
//!
//! Every command runs under an explicit time budget and its outcome is
//! classified from what actually happened: exit code, signal, timeout,
//! captured output. Nothing is assumed to have succeeded.
//!
//! Lifecycle of one execution:
//!
//!   exec.start entry → spawn (own process group) → poll until exit or
//!   deadline → [SIGTERM → grace → SIGKILL] → drain pipes → exec.finish entry

use std::{
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{mpsc, Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use ahab_contracts::{
    error::{AhabError, AhabResult},
    result::{CheckResult, Status},
    state::{StateEntry, EXEC_FINISH, EXEC_START},
};

use crate::traits::StateSink;

/// Default time budget for one command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Time between the graceful termination signal and the forced kill.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Output echoed to the operator is cut beyond this many bytes.
pub const DISPLAY_LIMIT: usize = 1000;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const SPAWN_RETRIES: u32 = 5;

/// Time budget of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    pub grace: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            grace: DEFAULT_GRACE,
        }
    }
}

/// A command to run, with its limits and optional output expectation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Name used in messages and state log entries. Defaults to the program.
    pub label: Option<String>,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub limits: Limits,
    /// When set, a zero exit code only passes if the output contains this.
    pub expect_output: Option<String>,
    pub working_dir: Option<PathBuf>,
}

impl ExecRequest {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            label: None,
            program: program.into(),
            args: Vec::new(),
            limits: Limits::default(),
            expect_output: None,
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.limits.timeout = timeout;
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.limits.grace = grace;
        self
    }

    pub fn expect_output(mut self, needle: impl Into<String>) -> Self {
        self.expect_output = Some(needle.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Everything observed about one finished (or killed) command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code; `None` when the process died from a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal, unix only.
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// True when the deadline expired and the process was terminated.
    pub timed_out: bool,
}

impl ExecOutput {
    /// A completed invocation with the given exit code and stdout.
    pub fn exited(code: i32, stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let mut out = self.stdout.clone();
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&self.stderr);
                out
            }
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.stdout.contains(needle) || self.stderr.contains(needle)
    }
}

/// A classified execution: the result plus the raw output, if any.
#[derive(Debug, Clone)]
pub struct Execution {
    pub result: CheckResult,
    /// `None` when the command could not be started.
    pub output: Option<ExecOutput>,
}

// ── Public entry points ───────────────────────────────────────────────────────

/// Spawn `request` and wait for it under its limits.
///
/// Returns `Err(AhabError::Spawn)` only when the process could not be
/// started. Timeouts and non-zero exits are reported in the `ExecOutput`.
pub fn spawn_and_wait(request: &ExecRequest) -> AhabResult<ExecOutput> {
    let mut command = Command::new(&request.program);
    command
        .args(&request.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &request.working_dir {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group, so a timeout can take down grandchildren too.
        command.process_group(0);
    }

    let start = Instant::now();
    let mut child = spawn_with_retry(&mut command, &request.program)?;
    let stdout = Drain::start(child.stdout.take());
    let stderr = Drain::start(child.stderr.take());

    // `None` only for budgets past the end of the clock: no deadline.
    let deadline = start.checked_add(request.limits.timeout);
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                // Background grandchildren would otherwise keep the output
                // pipes open and outlive the run.
                signal_group(&mut child, Signal::Kill, false);
                break status;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(program = %request.program.display(), error = %e, "wait failed, killing child");
                break terminate(&mut child, Duration::ZERO).map_err(|e| spawn_error(&request.program, &e))?;
            }
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            timed_out = true;
            debug!(
                program = %request.program.display(),
                timeout_ms = request.limits.timeout.as_millis() as u64,
                "deadline expired, terminating process group"
            );
            break terminate(&mut child, request.limits.grace).map_err(|e| spawn_error(&request.program, &e))?;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.collect(request.limits.grace);
    let stderr = stderr.collect(request.limits.grace);

    Ok(ExecOutput {
        exit_code: status.code(),
        signal: exit_signal(&status),
        stdout,
        stderr,
        duration: start.elapsed(),
        timed_out,
    })
}

/// `spawn_and_wait` bracketed by `exec.start` / `exec.finish` state entries.
///
/// The start entry is written before the process exists, so a crash while it
/// runs is diagnosable from the state log of the next run.
pub fn execute_logged(request: &ExecRequest, sink: &dyn StateSink) -> AhabResult<ExecOutput> {
    let label = request.display_label();
    append_best_effort(
        sink,
        StateEntry::new(
            EXEC_START,
            format!(
                "{label}: {} (timeout {})",
                request.command_line(),
                format_secs(request.limits.timeout)
            ),
        ),
    );

    let outcome = spawn_and_wait(request);

    let detail = match &outcome {
        Ok(out) if out.timed_out => format!("{label}: timed out after {}", format_secs(request.limits.timeout)),
        Ok(out) => match (out.exit_code, out.signal) {
            (Some(code), _) => format!("{label}: exit code {code} in {} ms", out.duration.as_millis()),
            (None, Some(sig)) => format!("{label}: terminated by signal {sig}"),
            (None, None) => format!("{label}: terminated without exit code"),
        },
        Err(e) => format!("{label}: {e}"),
    };
    append_best_effort(sink, StateEntry::new(EXEC_FINISH, detail));

    outcome
}

/// Run `request` and classify the outcome as a `CheckResult`.
pub fn run_verified(request: &ExecRequest, sink: &dyn StateSink) -> Execution {
    match execute_logged(request, sink) {
        Ok(output) => Execution {
            result: classify(request, &output),
            output: Some(output),
        },
        Err(e) => Execution {
            result: CheckResult::new(
                format!("{}: failed to run: {e}", request.display_label()),
                Status::Fail,
            )
            .with_context(request.program.display().to_string()),
            output: None,
        },
    }
}

/// Classify a finished command.
///
/// Exit 0 passes unless an expected substring is missing, which is reported
/// as "ran but output did not contain …" rather than as a failure to run.
pub fn classify(request: &ExecRequest, output: &ExecOutput) -> CheckResult {
    let label = request.display_label();
    let (operation, status) = if output.timed_out {
        (
            format!("{label} timed out after {}", format_secs(request.limits.timeout)),
            Status::Fail,
        )
    } else {
        match output.exit_code {
            Some(0) => match &request.expect_output {
                Some(needle) if !output.contains(needle) => (
                    format!("{label} ran but output did not contain '{needle}'"),
                    Status::Fail,
                ),
                _ => (format!("{label} succeeded"), Status::Pass),
            },
            Some(code) => (format!("{label} exited with code {code}"), Status::Fail),
            None => match output.signal {
                Some(sig) => (format!("{label} terminated by signal {sig}"), Status::Fail),
                None => (format!("{label} terminated without exit code"), Status::Fail),
            },
        }
    };
    CheckResult::new(operation, status).with_context(request.program.display().to_string())
}

/// Cut `text` to at most `limit` bytes on a char boundary for console echo.
pub fn truncate_for_display(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}… ({} more bytes)", &text[..cut], text.len() - cut)
}

/// `2s`, or `1.5s` when the duration has a sub-second part.
pub fn format_secs(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn append_best_effort(sink: &dyn StateSink, entry: StateEntry) {
    if let Err(e) = sink.append(entry) {
        warn!(error = %e, "state log append failed, continuing");
    }
}

fn spawn_error(program: &Path, err: &io::Error) -> AhabError {
    AhabError::Spawn {
        program: program.display().to_string(),
        reason: err.to_string(),
    }
}

fn spawn_with_retry(command: &mut Command, program: &Path) -> AhabResult<Child> {
    let mut attempt = 0;
    loop {
        match command.spawn() {
            Ok(child) => return Ok(child),
            // ETXTBSY: the executable was just written and another fork still
            // holds a writable descriptor to it.
            Err(e) if is_text_busy(&e) && attempt < SPAWN_RETRIES => {
                attempt += 1;
                thread::sleep(Duration::from_millis(20 * u64::from(attempt)));
            }
            Err(e) => return Err(spawn_error(program, &e)),
        }
    }
}

/// Graceful then forced termination of the child's process group.
fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    signal_group(child, Signal::Terminate, true);
    let deadline = Instant::now().checked_add(grace);
    while deadline.map_or(true, |d| Instant::now() < d) {
        if let Some(status) = child.try_wait()? {
            // Stragglers in the group may still hold the output pipes. The
            // leader is reaped, so only the group may be signalled now.
            signal_group(child, Signal::Kill, false);
            return Ok(status);
        }
        thread::sleep(POLL_INTERVAL);
    }
    signal_group(child, Signal::Kill, true);
    // Already-dead children make kill() fail; wait() still reaps them.
    let _ = child.kill();
    child.wait()
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &mut Child, signal: Signal, leader_fallback: bool) {
    let sig = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    let pid = child.id() as libc::pid_t;
    // SAFETY: kill(2) takes plain integers and has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pid, sig) };
    if rc != 0 && leader_fallback {
        let _ = unsafe { libc::kill(pid, sig) };
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _signal: Signal, leader_fallback: bool) {
    if leader_fallback {
        let _ = child.kill();
    }
}

#[cfg(unix)]
fn is_text_busy(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ETXTBSY)
}

#[cfg(not(unix))]
fn is_text_busy(_err: &io::Error) -> bool {
    false
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Pipe reader running on its own thread.
///
/// Bytes land in a shared buffer so that whatever arrived can still be
/// collected if a detached grandchild keeps the pipe open past the deadline.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl Drain {
    fn start<R: Read + Send + 'static>(source: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        if let Some(mut source) = source {
            let target = Arc::clone(&buf);
            thread::spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match source.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => target
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
                let _ = tx.send(());
            });
        }
        Self { buf, done }
    }

    fn collect(self, wait: Duration) -> String {
        // Disconnected (no source) and timeout both mean: take what is there.
        let _ = self.done.recv_timeout(wait);
        let bytes = self
            .buf
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
