//! # ahab-contracts
//!
//! Shared types for the ahab verification engine.
//!
//! Every crate in the workspace imports from here. No behaviour lives in this
//! crate, only data definitions, the exit-code mapping and the error type.

pub mod error;
pub mod outcome;
pub mod report;
pub mod result;
pub mod state;
