//! cli
//!
//! Command-line interface layer for hgland.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Install the tracing subscriber
//! - Delegate to command handlers
//! - Map outcomes to exit codes
//!
//! # Architecture
//!
//! The CLI layer is thin. It parses arguments via clap and dispatches to
//! the [`crate::engine`]; every working copy mutation happens inside an
//! engine session.

pub mod args;
pub mod commands;

pub use args::Cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::core::paths::HgPaths;
use crate::ui::output::Verbosity;

/// Environment variable holding a tracing filter directive.
pub const LOG_ENV: &str = "HGLAND_LOG";

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit global config file.
    pub config: Option<PathBuf>,
    pub verbosity: Verbosity,
}

impl Context {
    /// Resolve the working copy root from `--repo` or the current directory.
    pub fn repo_root(&self, repo: Option<&Path>) -> Result<PathBuf> {
        let start = match repo {
            Some(path) => path.to_path_buf(),
            None => std::env::current_dir().context("cannot determine current directory")?,
        };
        HgPaths::discover(&start)
            .map(|paths| paths.root)
            .with_context(|| format!("no mercurial working copy at {}", start.display()))
    }
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse_args();
    init_tracing(cli.debug, cli.quiet);

    let ctx = Context {
        config: cli.config.clone(),
        verbosity: Verbosity::from_flags(cli.quiet, cli.debug),
    };

    commands::dispatch(cli.command, &ctx)
}

/// Log to stderr. `HGLAND_LOG` wins over the flags.
fn init_tracing(debug: bool, quiet: bool) {
    let default = if debug {
        "hgland=debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init();
}
