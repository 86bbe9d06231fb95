//! Run-level counters and the ordered result list.
//!
//! `RunState` is owned by exactly one aggregation point. Concurrent validator
//! tasks never touch it; they hand their outcome to the aggregator, which
//! folds it in here. That single-writer discipline is what keeps
//! `total == passed + failed` true in parallel mode.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use ahab_contracts::{
    error::{AhabError, AhabResult},
    outcome::{ExecutionMode, RunVerdict, ValidatorOutcome},
    report::{Counters, RunReport},
    result::{CheckResult, Severity, Status},
    state::{StateEntry, RUN_START},
};

use crate::traits::StateSink;

/// Mutable aggregate of one orchestrator invocation.
pub struct RunState {
    run_id: String,
    started_at: DateTime<Utc>,
    counters: Counters,
    results: Vec<CheckResult>,
    sink: Arc<dyn StateSink>,
    echo: bool,
    /// Appends rejected by the sink during this run.
    rejected_appends: u64,
}

impl RunState {
    /// Open a run.
    ///
    /// The sink must accept the `run.start` entry: a run that cannot record
    /// its own start cannot vouch for anything it records later, so a refusal
    /// here is an infrastructure failure.
    pub fn init(run_id: impl Into<String>, sink: Arc<dyn StateSink>, echo: bool) -> AhabResult<Self> {
        let run_id = run_id.into();
        sink.append(StateEntry::new(RUN_START, format!("run {run_id}")))
            .map_err(|e| AhabError::Infrastructure {
                reason: format!("state sink rejected the start of run {run_id}: {e}"),
            })?;

        info!(run_id = %run_id, "run state initialized");

        Ok(Self {
            run_id,
            started_at: Utc::now(),
            counters: Counters::default(),
            results: Vec::new(),
            sink,
            echo,
            rejected_appends: 0,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    pub fn record_pass(&mut self, operation: impl Into<String>, context: Option<&str>) -> AhabResult<()> {
        self.record(with_context(CheckResult::new(operation, Status::Pass), context))
    }

    pub fn record_fail(
        &mut self,
        operation: impl Into<String>,
        context: Option<&str>,
        severity: Severity,
    ) -> AhabResult<()> {
        self.record(with_context(CheckResult::new(operation, Status::Fail), context).with_severity(severity))
    }

    /// Counts toward `warnings` only; never changes the pass/fail totals.
    pub fn record_warn(&mut self, operation: impl Into<String>, context: Option<&str>) -> AhabResult<()> {
        self.record(with_context(CheckResult::new(operation, Status::Warn), context))
    }

    pub fn record_skip(&mut self, operation: impl Into<String>, context: Option<&str>) -> AhabResult<()> {
        self.record(with_context(CheckResult::new(operation, Status::Skip), context))
    }

    /// An unclassified failure. Counted as failed, reported as `ERROR`.
    pub fn record_error(
        &mut self,
        operation: impl Into<String>,
        context: Option<&str>,
        severity: Severity,
    ) -> AhabResult<()> {
        self.record(with_context(CheckResult::new(operation, Status::Error), context).with_severity(severity))
    }

    /// Fold one result into the counters, echo it and append it to the log.
    ///
    /// Counter overflow is the only error: bookkeeping that can no longer be
    /// trusted is an infrastructure failure.
    pub fn record(&mut self, result: CheckResult) -> AhabResult<()> {
        let mut next = self.counters;
        match result.status() {
            Status::Pass => {
                next.passed = bump(next.passed)?;
                next.total = bump(next.total)?;
            }
            Status::Fail | Status::Error => {
                next.failed = bump(next.failed)?;
                next.total = bump(next.total)?;
                if result.is_critical() {
                    next.critical_failures = bump(next.critical_failures)?;
                }
            }
            Status::Warn => next.warnings = bump(next.warnings)?,
            Status::Skip => next.skipped = bump(next.skipped)?,
        }
        self.counters = next;

        if self.echo {
            echo(&result);
        }
        self.append(StateEntry::new(
            format!("result.{}", result.status().as_str().to_ascii_lowercase()),
            result.display_line(),
        ));

        debug!(
            run_id = %self.run_id,
            status = %result.status(),
            operation = %result.operation(),
            "result recorded"
        );
        self.results.push(result);
        Ok(())
    }

    /// Close the run and project it into a `RunReport`.
    ///
    /// The verdict comes from the per-validator `outcomes`, never from the
    /// result counters. Consumes the state: a run is never reused.
    pub fn finalize(
        mut self,
        mode: ExecutionMode,
        strict: bool,
        outcomes: Vec<ValidatorOutcome>,
    ) -> AhabResult<RunReport> {
        let drained = self.sink.flush();
        if let Err(e) = &drained {
            warn!(run_id = %self.run_id, error = %e, "state log flush failed");
        }
        let lost = self.lost_entries();
        let degraded = lost > 0 || drained.is_err();
        if degraded {
            self.record_warn(degraded_message(lost), Some(DEGRADED_CONTEXT))?;
        }

        let verdict = RunVerdict::from_statuses(outcomes.iter().map(|o| o.status), strict);
        let context = format!(
            "run {} {}: {}/{} passed, {} warnings",
            self.run_id, verdict, self.counters.passed, self.counters.total, self.counters.warnings
        );
        let sealed = self.sink.finalize(&context);
        if let Err(e) = &sealed {
            warn!(run_id = %self.run_id, error = %e, "state log finalize failed");
        }
        // The run.finish marker itself can be lost. The log is sealed, so
        // the warning only reaches the report.
        if !degraded && (sealed.is_err() || self.lost_entries() > 0) {
            self.record_warn(degraded_message(self.lost_entries().max(1)), Some(DEGRADED_CONTEXT))?;
        }

        debug_assert!(self.counters.is_consistent(), "counter invariant broken: {:?}", self.counters);

        info!(
            run_id = %self.run_id,
            verdict = %verdict,
            total = self.counters.total,
            failed = self.counters.failed,
            warnings = self.counters.warnings,
            "run finalized"
        );

        Ok(RunReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            mode,
            strict,
            counters: self.counters,
            outcomes,
            results: self.results,
            verdict,
            state_log: self.sink.replay(),
        })
    }

    fn lost_entries(&self) -> u64 {
        self.sink.failed_writes().saturating_add(self.rejected_appends)
    }

    fn append(&mut self, entry: StateEntry) {
        if let Err(e) = self.sink.append(entry) {
            self.rejected_appends += 1;
            warn!(run_id = %self.run_id, error = %e, "state log append failed, continuing in memory");
        }
    }
}

const DEGRADED_CONTEXT: &str = "state-recorder";

fn degraded_message(lost: u64) -> String {
    format!("state log degraded: {lost} entries could not be written")
}

fn with_context(result: CheckResult, context: Option<&str>) -> CheckResult {
    match context {
        Some(ctx) => result.with_context(ctx),
        None => result,
    }
}

fn bump(value: u64) -> AhabResult<u64> {
    value.checked_add(1).ok_or_else(|| AhabError::Infrastructure {
        reason: "result counter overflow".to_string(),
    })
}

fn echo(result: &CheckResult) {
    match result.status() {
        Status::Pass => println!("{}", result.display_line()),
        _ => eprintln!("{}", result.display_line()),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
