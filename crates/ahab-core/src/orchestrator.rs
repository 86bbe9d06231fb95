//! The orchestrator: runs every registered validator and aggregates the run.
//!
//! The orchestrator enforces the run model:
//!
//!   Registry → invoke (sequential | parallel) → fold → RunState → RunReport
//!
//! Validators never touch `RunState`. In parallel mode each validator runs on
//! its own scoped thread and sends exactly one `TaskReport` back over a
//! channel; the orchestrator thread drains that channel and is the only code
//! that folds outcomes into the counters.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{mpsc, Arc},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};
use uuid::Uuid;

use ahab_contracts::{
    error::AhabResult,
    outcome::{ExecutionMode, ValidatorName, ValidatorOutcome},
    report::RunReport,
    result::{Severity, Status},
};

use crate::{
    exec::{self, ExecOutput, Limits, DISPLAY_LIMIT},
    registry::{RegistryEntry, ValidatorRegistry},
    run_state::RunState,
    traits::{StateSink, Validator},
};

/// Knobs for one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub mode: ExecutionMode,
    /// Per-validator timeout and termination grace period.
    pub limits: Limits,
    /// Warnings fail the run.
    pub strict: bool,
    /// Validator names whose failures are recorded as CRITICAL.
    pub critical: Vec<String>,
    /// Echo one line per result to the console.
    pub echo: bool,
    /// Echo each validator's captured output as one block.
    pub show_output: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            limits: Limits::default(),
            strict: false,
            critical: Vec::new(),
            echo: false,
            show_output: false,
        }
    }
}

/// What a parallel task sends back to the aggregator.
struct TaskReport {
    /// Position of the validator in discovery order.
    index: usize,
    outcome: ValidatorOutcome,
}

/// Drives one run over a registry.
///
/// The orchestrator owns the state sink; each call to `run` opens a fresh
/// `RunState` against it.
pub struct Orchestrator {
    config: OrchestratorConfig,
    sink: Arc<dyn StateSink>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, sink: Arc<dyn StateSink>) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run every entry of `registry` under a fresh run id.
    pub fn run(&self, registry: &ValidatorRegistry) -> AhabResult<RunReport> {
        self.run_with_id(&Uuid::new_v4().to_string(), registry)
    }

    /// Run every entry of `registry`.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures are errors: the sink refusing the run
    /// start, or counter overflow. Validator failures, timeouts, crashes and
    /// panics are outcomes inside the returned report.
    pub fn run_with_id(&self, run_id: &str, registry: &ValidatorRegistry) -> AhabResult<RunReport> {
        let mut state = RunState::init(run_id, Arc::clone(&self.sink), self.config.echo)?;

        info!(
            run_id = %run_id,
            mode = %self.config.mode,
            validators = registry.len(),
            timeout = %exec::format_secs(self.config.limits.timeout),
            "run starting"
        );

        let outcomes = match self.config.mode {
            ExecutionMode::Sequential => self.run_sequential(registry, &mut state)?,
            ExecutionMode::Parallel => self.run_parallel(registry, &mut state)?,
        };

        state.finalize(self.config.mode, self.config.strict, outcomes)
    }

    // ── Scheduling ───────────────────────────────────────────────────────────

    fn run_sequential(
        &self,
        registry: &ValidatorRegistry,
        state: &mut RunState,
    ) -> AhabResult<Vec<ValidatorOutcome>> {
        let mut outcomes = Vec::with_capacity(registry.len());
        for entry in registry.entries() {
            let outcome = evaluate(entry, &self.config.limits, self.sink.as_ref());
            self.fold(state, &outcome)?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn run_parallel(
        &self,
        registry: &ValidatorRegistry,
        state: &mut RunState,
    ) -> AhabResult<Vec<ValidatorOutcome>> {
        let entries = registry.entries();
        let mut slots: Vec<Option<ValidatorOutcome>> = vec![None; entries.len()];
        let limits = self.config.limits;
        let sink: &dyn StateSink = self.sink.as_ref();

        thread::scope(|scope| -> AhabResult<()> {
            let (tx, rx) = mpsc::channel::<TaskReport>();
            let mut handles = Vec::with_capacity(entries.len());

            for (index, entry) in entries.iter().enumerate() {
                let tx = tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("validator-{}", entry.name()))
                    .spawn_scoped(scope, move || {
                        let outcome = evaluate(entry, &limits, sink);
                        // The aggregator only goes away on a fatal error.
                        let _ = tx.send(TaskReport { index, outcome });
                    });

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        warn!(validator = %entry.name(), error = %e, "could not start validator task");
                        let outcome = error_outcome(
                            entry.name(),
                            Duration::ZERO,
                            format!("could not start task: {e}"),
                        );
                        self.fold(state, &outcome)?;
                        slots[index] = Some(outcome);
                    }
                }
            }
            drop(tx);

            for report in rx {
                debug!(
                    validator = %report.outcome.validator_name,
                    status = %report.outcome.status,
                    "task report received"
                );
                self.fold(state, &report.outcome)?;
                slots[report.index] = Some(report.outcome);
            }

            for handle in handles {
                // Validator panics are caught inside the task; this only sees
                // a panic in the task plumbing itself.
                if handle.join().is_err() {
                    warn!("validator task panicked outside the validator");
                }
            }
            Ok(())
        })?;

        // A task that ended without reporting is an ERROR, never a gap.
        let mut outcomes = Vec::with_capacity(slots.len());
        for (entry, slot) in entries.iter().zip(slots) {
            let outcome = match slot {
                Some(outcome) => outcome,
                None => {
                    let outcome = error_outcome(
                        entry.name(),
                        Duration::ZERO,
                        "task ended without reporting".to_string(),
                    );
                    self.fold(state, &outcome)?;
                    outcome
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    // ── Aggregation ──────────────────────────────────────────────────────────

    /// Fold one outcome into the run state. Exactly one result per outcome.
    fn fold(&self, state: &mut RunState, outcome: &ValidatorOutcome) -> AhabResult<()> {
        let name = outcome.validator_name.as_str();
        let operation = format!("{name} {}", outcome.message);
        let context = Some(name);

        if self.config.echo && self.config.show_output && !outcome.output.trim().is_empty() {
            println!(
                "── {name} ──\n{}",
                exec::truncate_for_display(outcome.output.trim_end(), DISPLAY_LIMIT)
            );
        }

        match outcome.status {
            Status::Pass => state.record_pass(operation, context),
            Status::Fail => state.record_fail(operation, context, self.severity_of(name)),
            Status::Warn => state.record_warn(operation, context),
            Status::Skip => state.record_skip(operation, context),
            Status::Error => state.record_error(operation, context, self.severity_of(name)),
        }
    }

    fn severity_of(&self, name: &str) -> Severity {
        if self.config.critical.iter().any(|c| c == name) {
            Severity::Critical
        } else {
            Severity::Normal
        }
    }
}

// ── Invocation ────────────────────────────────────────────────────────────────

fn evaluate(entry: &RegistryEntry, limits: &Limits, sink: &dyn StateSink) -> ValidatorOutcome {
    match entry {
        RegistryEntry::Ready(validator) => invoke_validator(validator.as_ref(), limits, sink),
        RegistryEntry::Skipped { name, reason } => ValidatorOutcome {
            validator_name: name.clone(),
            status: Status::Skip,
            duration_ms: 0,
            exit_code: None,
            message: format!("skipped: {reason}"),
            output: String::new(),
        },
    }
}

/// Invoke one validator and turn whatever happens into an outcome.
///
/// Nothing escapes: an `Err` return and a panic are both `ERROR` outcomes.
pub fn invoke_validator(validator: &dyn Validator, limits: &Limits, sink: &dyn StateSink) -> ValidatorOutcome {
    let name = validator.name().clone();
    let start = Instant::now();

    let attempt = panic::catch_unwind(AssertUnwindSafe(|| validator.invoke(limits, sink)));
    let elapsed = start.elapsed();

    let outcome = match attempt {
        Ok(Ok(output)) => outcome_from_output(name, &output, limits, elapsed),
        Ok(Err(e)) => error_outcome(&name, elapsed, format!("failed to run: {e}")),
        Err(_) => error_outcome(&name, elapsed, "validator panicked during execution".to_string()),
    };

    match outcome.status {
        Status::Pass => debug!(validator = %outcome.validator_name, duration_ms = outcome.duration_ms, "validator passed"),
        status => warn!(
            validator = %outcome.validator_name,
            status = %status,
            message = %outcome.message,
            "validator did not pass"
        ),
    }
    outcome
}

fn outcome_from_output(
    name: ValidatorName,
    output: &ExecOutput,
    limits: &Limits,
    elapsed: Duration,
) -> ValidatorOutcome {
    let (status, message) = if output.timed_out {
        (Status::Fail, format!("timed out after {}", exec::format_secs(limits.timeout)))
    } else {
        match (output.exit_code, output.signal) {
            (Some(0), _) => (Status::Pass, "passed".to_string()),
            (Some(2), _) => (Status::Warn, "exited with code 2 (warnings)".to_string()),
            (Some(code), _) => (Status::from_exit_code(code), format!("exited with code {code}")),
            (None, Some(sig)) => (Status::Error, format!("terminated by signal {sig}")),
            (None, None) => (Status::Error, "terminated without exit code".to_string()),
        }
    };

    ValidatorOutcome {
        validator_name: name,
        status,
        duration_ms: millis(elapsed),
        exit_code: if output.timed_out { None } else { output.exit_code },
        message,
        output: output.combined(),
    }
}

fn error_outcome(name: &ValidatorName, elapsed: Duration, message: String) -> ValidatorOutcome {
    ValidatorOutcome {
        validator_name: name.clone(),
        status: Status::Error,
        duration_ms: millis(elapsed),
        exit_code: None,
        message,
        output: String::new(),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        thread,
        time::Duration,
    };

    use ahab_contracts::{
        error::{AhabError, AhabResult},
        outcome::{ExecutionMode, RunVerdict},
        report::RunReport,
        result::Status,
        state::StateEntry,
    };

    use super::{Orchestrator, OrchestratorConfig};
    use crate::{
        exec::{ExecOutput, Limits},
        registry::{FnValidator, ValidatorRegistry},
        traits::StateSink,
    };

    // ── Helpers ──────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct MockSink {
        entries: Mutex<Vec<StateEntry>>,
    }

    impl StateSink for MockSink {
        fn append(&self, entry: StateEntry) -> AhabResult<()> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }

        fn finalize(&self, _context: &str) -> AhabResult<()> {
            Ok(())
        }
    }

    fn registry_of(codes: &[(&str, i32)]) -> ValidatorRegistry {
        let mut registry = ValidatorRegistry::new();
        for (name, code) in codes {
            registry.register(Arc::new(FnValidator::exiting(*name, *code, format!("{name} output"))));
        }
        registry
    }

    fn config(mode: ExecutionMode) -> OrchestratorConfig {
        OrchestratorConfig { mode, ..OrchestratorConfig::default() }
    }

    fn run(config: OrchestratorConfig, registry: &ValidatorRegistry) -> RunReport {
        Orchestrator::new(config, Arc::new(MockSink::default()))
            .run(registry)
            .unwrap()
    }

    fn statuses(report: &RunReport) -> Vec<Status> {
        report.outcomes.iter().map(|o| o.status).collect()
    }

    fn names(report: &RunReport) -> Vec<String> {
        report.outcomes.iter().map(|o| o.validator_name.to_string()).collect()
    }

    // ── Verdicts ─────────────────────────────────────────────────────────────

    #[test]
    fn all_pass_exits_zero() {
        let registry = registry_of(&[("alpha", 0), ("beta", 0), ("gamma", 0)]);
        let report = run(config(ExecutionMode::Sequential), &registry);

        assert_eq!(report.verdict, RunVerdict::Pass);
        assert_eq!(report.verdict.exit_code(), 0);
        assert_eq!(report.counters.passed, 3);
        assert_eq!(report.counters.total, 3);
    }

    #[test]
    fn one_failure_fails_the_run_and_is_named() {
        let registry = registry_of(&[("alpha", 0), ("beta", 1), ("gamma", 0)]);
        let report = run(config(ExecutionMode::Sequential), &registry);

        assert_eq!(report.verdict, RunVerdict::Fail);
        assert_eq!(report.verdict.exit_code(), 1);
        let failing: Vec<_> = report.failing().map(|o| o.validator_name.to_string()).collect();
        assert_eq!(failing, vec!["beta"]);
        assert_eq!(report.outcomes[1].message, "exited with code 1");
    }

    #[test]
    fn warnings_only_pass_with_warnings() {
        let registry = registry_of(&[("alpha", 0), ("beta", 2), ("gamma", 2)]);
        let report = run(config(ExecutionMode::Sequential), &registry);

        assert_eq!(report.verdict, RunVerdict::PassWithWarnings);
        assert_eq!(report.verdict.exit_code(), 2);
        assert_eq!(report.counters.warnings, 2);
        assert_eq!(report.count_status(Status::Warn), 2);
    }

    #[test]
    fn strict_turns_warnings_into_failure() {
        let registry = registry_of(&[("alpha", 0), ("beta", 2)]);
        let report = run(
            OrchestratorConfig { strict: true, ..config(ExecutionMode::Sequential) },
            &registry,
        );
        assert_eq!(report.verdict, RunVerdict::Fail);
        assert!(report.strict);
    }

    #[test]
    fn critical_validator_counts_critical_failure() {
        let registry = registry_of(&[("secrets", 1), ("docs", 1)]);
        let report = run(
            OrchestratorConfig {
                critical: vec!["secrets".to_string()],
                ..config(ExecutionMode::Sequential)
            },
            &registry,
        );
        assert_eq!(report.counters.failed, 2);
        assert_eq!(report.counters.critical_failures, 1);
    }

    #[test]
    fn skipped_entry_is_reported_not_counted() {
        let mut registry = registry_of(&[("alpha", 0)]);
        registry.skip("docs", "not executable");
        let report = run(config(ExecutionMode::Sequential), &registry);

        assert_eq!(statuses(&report), vec![Status::Pass, Status::Skip]);
        assert_eq!(report.counters.skipped, 1);
        assert_eq!(report.counters.total, 1);
        assert_eq!(report.verdict, RunVerdict::Pass);
    }

    // ── Isolation ────────────────────────────────────────────────────────────

    fn crashing_registry() -> ValidatorRegistry {
        let mut registry = ValidatorRegistry::new();
        registry.register(Arc::new(FnValidator::exiting("killed", 137, "")));
        registry.register(Arc::new(FnValidator::new("panicky", || -> AhabResult<ExecOutput> {
            panic!("validator bug")
        })));
        registry.register(Arc::new(FnValidator::new("broken", || {
            Err(AhabError::Validator {
                name: "broken".to_string(),
                reason: "missing input".to_string(),
            })
        })));
        registry.register(Arc::new(FnValidator::exiting("healthy", 0, "ok")));
        registry
    }

    #[test]
    fn crashes_do_not_stop_the_batch_sequential() {
        let report = run(config(ExecutionMode::Sequential), &crashing_registry());

        assert_eq!(
            statuses(&report),
            vec![Status::Error, Status::Error, Status::Error, Status::Pass]
        );
        assert_eq!(report.outcomes[0].message, "exited with code 137");
        assert_eq!(report.outcomes[1].message, "validator panicked during execution");
        assert!(report.outcomes[2].message.contains("missing input"));
        assert_eq!(report.verdict, RunVerdict::Fail);
        assert!(report.counters.is_consistent());
    }

    #[test]
    fn crashes_do_not_stop_the_batch_parallel() {
        let report = run(config(ExecutionMode::Parallel), &crashing_registry());

        assert_eq!(names(&report), vec!["killed", "panicky", "broken", "healthy"]);
        assert_eq!(report.outcomes[3].status, Status::Pass);
        assert_eq!(report.counters.failed, 3);
        assert_eq!(report.counters.passed, 1);
    }

    #[test]
    fn in_process_overrun_is_a_timeout() {
        let mut registry = ValidatorRegistry::new();
        registry.register(Arc::new(FnValidator::new("slow", || {
            thread::sleep(Duration::from_millis(60));
            Ok(ExecOutput::exited(0, ""))
        })));
        let limits = Limits { timeout: Duration::from_millis(10), grace: Duration::ZERO };
        let report = run(
            OrchestratorConfig { limits, ..config(ExecutionMode::Sequential) },
            &registry,
        );

        assert_eq!(report.outcomes[0].status, Status::Fail);
        assert!(report.outcomes[0].message.contains("timed out"));
    }

    // ── Parallel ordering ────────────────────────────────────────────────────

    #[test]
    fn parallel_reports_in_discovery_order() {
        let mut registry = ValidatorRegistry::new();
        for (name, delay, code) in [("first", 80u64, 0), ("second", 0, 1), ("third", 40, 2)] {
            registry.register(Arc::new(FnValidator::new(name, move || {
                thread::sleep(Duration::from_millis(delay));
                Ok(ExecOutput::exited(code, ""))
            })));
        }
        let report = run(config(ExecutionMode::Parallel), &registry);

        assert_eq!(names(&report), vec!["first", "second", "third"]);
        assert_eq!(statuses(&report), vec![Status::Pass, Status::Fail, Status::Warn]);
        assert_eq!(report.mode, ExecutionMode::Parallel);
        assert!(report.counters.is_consistent());
    }

    #[test]
    fn repeated_runs_agree() {
        let registry = registry_of(&[("a", 0), ("b", 1), ("c", 2), ("d", 42)]);
        let first = run(config(ExecutionMode::Parallel), &registry);
        let second = run(config(ExecutionMode::Parallel), &registry);
        let sequential = run(config(ExecutionMode::Sequential), &registry);

        assert_eq!(statuses(&first), statuses(&second));
        assert_eq!(statuses(&first), statuses(&sequential));
    }

    #[test]
    fn run_is_bracketed_in_the_state_log() {
        let sink = Arc::new(MockSink::default());
        let registry = registry_of(&[("alpha", 0), ("beta", 1)]);
        Orchestrator::new(config(ExecutionMode::Sequential), sink.clone())
            .run_with_id("run-42", &registry)
            .unwrap();

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries[0].category, "run.start");
        assert!(entries[0].detail.contains("run-42"));
        let results: Vec<_> = entries.iter().filter(|e| e.category.starts_with("result.")).collect();
        assert_eq!(results.len(), 2);
    }

    // ── Real processes ───────────────────────────────────────────────────────

    #[cfg(unix)]
    mod scripts {
        use std::{fs, os::unix::fs::PermissionsExt, path::Path, time::Instant};

        use super::*;
        use crate::registry::ValidatorRegistry;

        fn write_script(dir: &Path, file: &str, body: &str) {
            let path = dir.join(file);
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        #[test]
        fn hung_validator_is_killed_at_the_timeout() {
            let dir = tempfile::tempdir().unwrap();
            write_script(dir.path(), "validate-hang.sh", "sleep 10");
            write_script(dir.path(), "validate-quick.sh", "echo fine");
            let registry = ValidatorRegistry::discover(dir.path()).unwrap();

            let limits = Limits { timeout: Duration::from_secs(2), grace: Duration::from_millis(500) };
            let started = Instant::now();
            let report = run(
                OrchestratorConfig { limits, ..config(ExecutionMode::Parallel) },
                &registry,
            );
            let wall = started.elapsed();

            assert_eq!(names(&report), vec!["hang", "quick"]);
            assert_eq!(report.outcomes[0].status, Status::Fail);
            assert_eq!(report.outcomes[0].message, "timed out after 2s");
            assert_eq!(report.outcomes[1].status, Status::Pass);
            assert!(wall < Duration::from_secs(5), "took {wall:?}");
        }

        #[test]
        fn exit_codes_map_through_scripts() {
            let dir = tempfile::tempdir().unwrap();
            write_script(dir.path(), "validate-a.sh", "exit 0");
            write_script(dir.path(), "validate-b.sh", "echo 'warning: long line' >&2; exit 2");
            write_script(dir.path(), "validate-c.sh", "exit 137");
            let registry = ValidatorRegistry::discover(dir.path()).unwrap();

            let report = run(config(ExecutionMode::Sequential), &registry);
            assert_eq!(statuses(&report), vec![Status::Pass, Status::Warn, Status::Error]);
            assert!(report.outcomes[1].output.contains("long line"));
            assert_eq!(report.outcomes[2].exit_code, Some(137));
        }
    }
}
