//! Run configuration: an optional TOML file layered under CLI overrides.
//!
//! ```toml
//! validators_dir = "scripts/validators"
//! timeout_secs = 30
//! parallel = true
//! critical = ["secrets"]
//! ```
//!
//! Precedence is override, then file, then built-in default.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::debug;

use ahab_contracts::{
    error::{AhabError, AhabResult},
    outcome::ExecutionMode,
    report::ReportFormat,
};

use crate::{
    exec::{Limits, DEFAULT_GRACE, DEFAULT_TIMEOUT},
    orchestrator::OrchestratorConfig,
};

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "ahab-verify.toml";
pub const DEFAULT_STATE_FILE: &str = ".ahab-verify.state";
pub const DEFAULT_VALIDATORS_DIR: &str = "scripts/validators";

/// Upper bound on `timeout_secs` and `grace_secs`.
pub const MAX_BUDGET_SECS: u64 = 24 * 60 * 60;

/// The TOML document. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub validators_dir: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub grace_secs: Option<u64>,
    pub parallel: Option<bool>,
    pub strict: Option<bool>,
    pub output: Option<String>,
    pub report_file: Option<PathBuf>,
    #[serde(default)]
    pub critical: Vec<String>,
    #[serde(default)]
    pub only: Vec<String>,
}

impl FileConfig {
    /// Returns `AhabError::Config` if `s` is not valid TOML or carries an
    /// unknown key.
    pub fn from_toml_str(s: &str) -> AhabResult<Self> {
        toml::from_str(s).map_err(|e| AhabError::Config {
            reason: format!("failed to parse config TOML: {}", e),
        })
    }

    pub fn from_file(path: &Path) -> AhabResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| AhabError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load `explicit` if given (it must exist), else `ahab-verify.toml` in
    /// the working directory if present, else an empty config.
    pub fn discover(explicit: Option<&Path>) -> AhabResult<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    debug!(path = %default.display(), "loading default config file");
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Values given on the command line. `None` and empty mean "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub validators_dir: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub grace_secs: Option<u64>,
    pub parallel: Option<bool>,
    pub strict: Option<bool>,
    pub output: Option<ReportFormat>,
    pub report_file: Option<PathBuf>,
    pub only: Vec<String>,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub validators_dir: PathBuf,
    pub state_file: PathBuf,
    pub limits: Limits,
    pub mode: ExecutionMode,
    pub strict: bool,
    pub output: ReportFormat,
    pub report_file: Option<PathBuf>,
    pub critical: Vec<String>,
    /// Restrict the run to these validators; empty runs everything.
    pub only: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            validators_dir: PathBuf::from(DEFAULT_VALIDATORS_DIR),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            limits: Limits::default(),
            mode: ExecutionMode::Sequential,
            strict: false,
            output: ReportFormat::Text,
            report_file: None,
            critical: Vec::new(),
            only: Vec::new(),
        }
    }
}

impl Settings {
    /// Layer `overrides` over `file` over the defaults and validate.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> AhabResult<Self> {
        let file_output = file
            .output
            .as_deref()
            .map(str::parse::<ReportFormat>)
            .transpose()
            .map_err(|reason| AhabError::Config { reason })?;

        let timeout = budget("timeout", overrides.timeout_secs.or(file.timeout_secs), DEFAULT_TIMEOUT)?;
        if timeout.is_zero() {
            return Err(AhabError::Config {
                reason: "timeout must be at least one second".to_string(),
            });
        }
        let grace = budget("grace", overrides.grace_secs.or(file.grace_secs), DEFAULT_GRACE)?;

        let parallel = overrides.parallel.or(file.parallel).unwrap_or(false);

        let settings = Self {
            validators_dir: overrides
                .validators_dir
                .or(file.validators_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VALIDATORS_DIR)),
            state_file: overrides
                .state_file
                .or(file.state_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            limits: Limits { timeout, grace },
            mode: if parallel { ExecutionMode::Parallel } else { ExecutionMode::Sequential },
            strict: overrides.strict.or(file.strict).unwrap_or(false),
            output: overrides.output.or(file_output).unwrap_or_default(),
            report_file: overrides.report_file.or(file.report_file),
            critical: file.critical,
            only: if overrides.only.is_empty() { file.only } else { overrides.only },
        };

        debug!(
            validators_dir = %settings.validators_dir.display(),
            state_file = %settings.state_file.display(),
            mode = %settings.mode,
            strict = settings.strict,
            "settings resolved"
        );
        Ok(settings)
    }

    /// The orchestrator view of these settings.
    pub fn orchestrator_config(&self, echo: bool) -> OrchestratorConfig {
        OrchestratorConfig {
            mode: self.mode,
            limits: self.limits,
            strict: self.strict,
            critical: self.critical.clone(),
            echo,
            show_output: echo,
        }
    }
}

fn budget(key: &str, secs: Option<u64>, default: Duration) -> AhabResult<Duration> {
    match secs {
        None => Ok(default),
        Some(secs) if secs > MAX_BUDGET_SECS => Err(AhabError::Config {
            reason: format!("{key} of {secs}s exceeds the maximum of {MAX_BUDGET_SECS}s"),
        }),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
