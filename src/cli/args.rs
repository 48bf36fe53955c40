//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--config <file>`: Use this global config file
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// hgland - land patches on Mercurial working copies
#[derive(Parser, Debug)]
#[command(name = "hgland")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Use this global config file instead of the search path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply a patch and commit it
    #[command(
        long_about = "Apply a patch and commit it.\n\n\
            Opens a session on the working copy (lock, pull, strip unpublished \
            commits, update to the base revision), then applies the patch with \
            `hg import`. Patches the strict importer rejects for format reasons \
            are retried with an external patch tool. Any failure leaves the \
            working copy clean.\n\n\
            The patch must be in `hg export` format and carry a \
            `# Diff Start Line` header.",
        after_help = "\
EXIT STATUS:
    0  landed
    1  patch rejected (structural error or conflict)
    2  hg or session failure

EXAMPLES:
    hgland apply --repo /srv/clones/central D1234.patch
    curl -s $PATCH_URL | hgland apply --json -"
    )]
    Apply {
        /// Patch file, or `-` for stdin
        #[arg(value_name = "PATCH")]
        patch: PathBuf,

        /// Working copy (default: discovered from the current directory)
        #[arg(long, value_name = "PATH")]
        repo: Option<PathBuf>,

        /// Print the landing report as JSON
        #[arg(long)]
        json: bool,

        /// Do not pull before updating
        #[arg(long)]
        no_pull: bool,

        /// Keep unpublished commits already in the working copy
        #[arg(long)]
        no_strip: bool,

        /// Revision to land on (overrides session.base_revision)
        #[arg(long, value_name = "REV")]
        base: Option<String>,

        /// Wait up to SECS for a busy working copy instead of failing
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,
    },

    /// Show the metadata of a patch without touching any repository
    Inspect {
        /// Patch file, or `-` for stdin
        #[arg(value_name = "PATCH")]
        patch: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List commits not yet pushed
    Outgoing {
        /// Working copy (default: discovered from the current directory)
        #[arg(long, value_name = "PATH")]
        repo: Option<PathBuf>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn apply_parses_flags() {
        let cli = Cli::try_parse_from([
            "hgland", "--debug", "apply", "--repo", "/r", "--no-pull", "--wait", "5", "-",
        ])
        .unwrap();
        assert!(cli.debug);
        match cli.command {
            Command::Apply {
                patch,
                repo,
                no_pull,
                wait,
                json,
                ..
            } => {
                assert_eq!(patch, PathBuf::from("-"));
                assert_eq!(repo, Some(PathBuf::from("/r")));
                assert!(no_pull);
                assert!(!json);
                assert_eq!(wait, Some(5));
            }
            other => panic!("expected apply, got {:?}", other),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["hgland", "inspect", "p.patch", "-q", "--config", "c.toml"])
            .unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn apply_requires_patch() {
        assert!(Cli::try_parse_from(["hgland", "apply"]).is_err());
    }
}
