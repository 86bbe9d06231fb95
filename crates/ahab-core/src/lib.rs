//! # ahab-core
//!
//! The verification runtime: runs pluggable validators under bounded
//! timeouts and aggregates their outcomes into a single run verdict.
//!
//! This crate provides:
//! - The two core traits (`Validator`, `StateSink`)
//! - The execution wrapper (`exec`) that spawns and supervises commands
//! - Validator discovery (`ValidatorRegistry`)
//! - The `Orchestrator` that runs a registry sequentially or in parallel and
//!   folds every outcome into `RunState` from a single aggregation point
//! - TOML configuration (`config`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ahab_core::{Orchestrator, OrchestratorConfig, ValidatorRegistry};
//!
//! let registry = ValidatorRegistry::discover(Path::new("scripts/validators"))?;
//! let report = Orchestrator::new(OrchestratorConfig::default(), sink).run(&registry)?;
//! std::process::exit(report.verdict.exit_code());
//! ```

pub mod config;
pub mod exec;
pub mod orchestrator;
pub mod registry;
pub mod run_state;
pub mod traits;

pub use config::{FileConfig, Overrides, Settings};
pub use exec::{ExecOutput, ExecRequest, Limits};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use registry::{FnValidator, RegistryEntry, ScriptValidator, ValidatorRegistry};
pub use run_state::RunState;
