//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Resolves the working copy and loads configuration
//! 2. Calls the engine
//! 3. Formats output and picks an exit code
//!
//! Handlers do NOT run hg directly.

mod apply;
mod inspect;
mod outgoing;

pub use apply::apply;
pub use inspect::inspect;
pub use outgoing::outgoing;

use std::fs::File;
use std::io;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context as _, Result};

use super::args::Command;
use super::Context;
use crate::core::patch::Patch;

/// Patch rejected: structural error or conflict.
pub const EXIT_REJECTED: u8 = 1;
/// hg, session, or configuration failure.
pub const EXIT_FAILURE: u8 = 2;

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<ExitCode> {
    match command {
        Command::Apply {
            patch,
            repo,
            json,
            no_pull,
            no_strip,
            base,
            wait,
        } => apply(
            ctx,
            apply::ApplyArgs {
                patch,
                repo,
                json,
                no_pull,
                no_strip,
                base,
                wait,
            },
        ),
        Command::Inspect { patch, json } => inspect(ctx, &patch, json),
        Command::Outgoing { repo, json } => outgoing(ctx, repo.as_deref(), json),
    }
}

/// Read a patch from a file, or stdin for `-`.
pub(crate) fn read_patch(path: &Path) -> Result<Patch> {
    if path == Path::new("-") {
        Patch::read_from(io::stdin().lock()).context("failed to read patch from stdin")
    } else {
        let file =
            File::open(path).with_context(|| format!("cannot open patch {}", path.display()))?;
        Patch::read_from(file).with_context(|| format!("failed to read patch {}", path.display()))
    }
}
