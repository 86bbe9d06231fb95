//! Validator discovery and the ordered registry the orchestrator runs.
//!
//! Validators are found by naming convention: a file called
//! `validate-<name>.<ext>` in the validators directory becomes a
//! `ScriptValidator` named `<name>`. The registry never looks inside the
//! file; it only checks that it can be executed.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use tracing::{debug, info, warn};

use ahab_contracts::{
    error::{AhabError, AhabResult},
    outcome::ValidatorName,
};

use crate::{
    exec::{self, ExecOutput, ExecRequest, Limits},
    traits::{StateSink, Validator},
};

/// File-name prefix every discoverable validator carries.
pub const VALIDATOR_PREFIX: &str = "validate-";

// ── Validator implementations ────────────────────────────────────────────────

/// A validator backed by an executable file.
#[derive(Debug, Clone)]
pub struct ScriptValidator {
    name: ValidatorName,
    path: PathBuf,
}

impl ScriptValidator {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: ValidatorName::new(name),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Validator for ScriptValidator {
    fn name(&self) -> &ValidatorName {
        &self.name
    }

    fn invoke(&self, limits: &Limits, sink: &dyn StateSink) -> AhabResult<ExecOutput> {
        let request = ExecRequest::new(&self.path)
            .label(self.name.as_str())
            .limits(*limits);
        exec::execute_logged(&request, sink)
    }
}

type CheckFn = Box<dyn Fn() -> AhabResult<ExecOutput> + Send + Sync>;

/// An in-process validator backed by a closure.
///
/// In-process code cannot be killed, so the timeout is checked after the
/// fact: a closure that overran its budget is reported as timed out.
pub struct FnValidator {
    name: ValidatorName,
    check: CheckFn,
}

impl FnValidator {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> AhabResult<ExecOutput> + Send + Sync + 'static,
    {
        Self {
            name: ValidatorName::new(name),
            check: Box::new(check),
        }
    }

    /// A validator that always exits with `code` and prints `stdout`.
    pub fn exiting(name: impl Into<String>, code: i32, stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        Self::new(name, move || Ok(ExecOutput::exited(code, stdout.clone())))
    }
}

impl fmt::Debug for FnValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnValidator").field("name", &self.name).finish()
    }
}

impl Validator for FnValidator {
    fn name(&self) -> &ValidatorName {
        &self.name
    }

    fn invoke(&self, limits: &Limits, _sink: &dyn StateSink) -> AhabResult<ExecOutput> {
        let start = Instant::now();
        let mut output = (self.check)()?;
        let elapsed = start.elapsed();
        output.duration = elapsed;
        if elapsed > limits.timeout {
            output.timed_out = true;
        }
        Ok(output)
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// One slot in the registry: a runnable validator or a named skip.
#[derive(Clone)]
pub enum RegistryEntry {
    Ready(Arc<dyn Validator>),
    /// Present by name but not runnable; reported as `SKIP`.
    Skipped { name: ValidatorName, reason: String },
}

impl RegistryEntry {
    pub fn name(&self) -> &ValidatorName {
        match self {
            RegistryEntry::Ready(v) => v.name(),
            RegistryEntry::Skipped { name, .. } => name,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, RegistryEntry::Ready(_))
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryEntry::Ready(v) => f.debug_tuple("Ready").field(v.name()).finish(),
            RegistryEntry::Skipped { name, reason } => f
                .debug_struct("Skipped")
                .field("name", name)
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Ordered collection of validators for one run.
#[derive(Debug, Clone, Default)]
pub struct ValidatorRegistry {
    entries: Vec<RegistryEntry>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `dir` for `validate-<name>.<ext>` files.
    ///
    /// Entries are sorted by name, which is the discovery order used for
    /// sequential execution and for every report. Files that match the
    /// convention but are not executable regular files become `Skipped`.
    /// A missing or unreadable directory is a configuration error.
    pub fn discover(dir: &Path) -> AhabResult<Self> {
        let read = fs::read_dir(dir).map_err(|e| AhabError::Config {
            reason: format!("cannot read validators directory '{}': {}", dir.display(), e),
        })?;

        let mut candidates: Vec<(String, PathBuf, Result<(), String>)> = Vec::new();
        for item in read {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let file_name = item.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(name) = parse_validator_name(file_name) else {
                continue;
            };
            let path = item.path();
            let usable = check_runnable(&path);
            candidates.push((name, path, usable));
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut registry = Self::new();
        for (name, path, usable) in candidates {
            match usable {
                Ok(()) => registry.register(Arc::new(ScriptValidator::new(name, path))),
                Err(reason) => {
                    debug!(validator = %name, %reason, "validator not runnable");
                    registry.skip(name, reason);
                }
            }
        }

        info!(
            dir = %dir.display(),
            ready = registry.ready_count(),
            skipped = registry.len() - registry.ready_count(),
            "validator discovery complete"
        );
        Ok(registry)
    }

    /// Append a validator. A name that is already registered is kept as the
    /// first registration; the newcomer becomes a `Skipped` entry.
    pub fn register(&mut self, validator: Arc<dyn Validator>) {
        if self.contains(validator.name()) {
            let name = validator.name().clone();
            warn!(validator = %name, "duplicate validator name, keeping the first");
            self.entries.push(RegistryEntry::Skipped {
                name,
                reason: "duplicate validator name".to_string(),
            });
            return;
        }
        self.entries.push(RegistryEntry::Ready(validator));
    }

    /// Record a validator that exists by name but cannot run.
    pub fn skip(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.entries.push(RegistryEntry::Skipped {
            name: ValidatorName::new(name),
            reason: reason.into(),
        });
    }

    /// Restrict to `names`, in the order given.
    ///
    /// A requested name with no entry becomes `Skipped` ("validator not
    /// found") so the omission is visible in the report.
    pub fn select(&self, names: &[String]) -> Self {
        let mut selected = Self::new();
        for wanted in names {
            // Ready or skipped, a name is listed once.
            if selected.entries.iter().any(|e| e.name().as_str() == wanted) {
                continue;
            }
            match self.entries.iter().find(|e| e.name().as_str() == wanted) {
                Some(entry) => selected.entries.push(entry.clone()),
                None => selected.skip(wanted.clone(), "validator not found"),
            }
        }
        selected
    }

    pub fn contains(&self, name: &ValidatorName) -> bool {
        self.entries
            .iter()
            .any(|e| e.is_ready() && e.name() == name)
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&ValidatorName> {
        self.entries.iter().map(RegistryEntry::name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ready_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_ready()).count()
    }
}

/// `validate-code-compliance.sh` → `code-compliance`.
///
/// The extension is optional; only the last one is stripped.
pub fn parse_validator_name(file_name: &str) -> Option<String> {
    let rest = file_name.strip_prefix(VALIDATOR_PREFIX)?;
    let stem = match rest.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => rest,
    };
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

fn check_runnable(path: &Path) -> Result<(), String> {
    let meta = fs::metadata(path).map_err(|e| format!("unreadable: {e}"))?;
    if !meta.is_file() {
        return Err("not a regular file".to_string());
    }
    if !is_executable(&meta) {
        return Err("not executable".to_string());
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    true
}

// ── Tests ────────────────────────────────────────────────────────────────────
