//! hg
//!
//! Mercurial access: process execution, failure classification, and the
//! repository operations built on them.
//!
//! # Modules
//!
//! - [`runner`] - Bounded execution of hg subcommands
//! - [`classify`] - Conflict vs. generic failure policy table
//! - [`interface`] - Repository operations on one working copy
//! - [`mock`] - Scripted runner for tests

pub mod classify;
pub mod interface;
pub mod mock;
pub mod runner;

pub use classify::{ConflictReport, FailurePolicy, HunkFailure};
pub use interface::{Hg, HgConfig, WorkingCopyStatus};
pub use runner::{CommandOutput, HgCommand, HgError, HgRunner, ProcessRunner};
