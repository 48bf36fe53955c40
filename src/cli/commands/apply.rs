//! apply command - Land one patch on a working copy
//!
//! # Flow
//!
//! Parse first, so a malformed patch is rejected before the session pulls
//! or updates anything. Then enter a session, apply, close, and report.
//! A failed close never hides the outcome: it is folded into the report.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context as _, Result};

use super::{read_patch, EXIT_FAILURE, EXIT_REJECTED};
use crate::cli::Context;
use crate::core::config::Config;
use crate::core::ops::lock::LockPolicy;
use crate::engine::{ApplyError, LandingReport, LandingStatus, Session, Strategy};
use crate::hg::Hg;
use crate::ui::output;

/// Arguments of `hgland apply`.
#[derive(Debug, Clone)]
pub struct ApplyArgs {
    pub patch: PathBuf,
    pub repo: Option<PathBuf>,
    pub json: bool,
    pub no_pull: bool,
    pub no_strip: bool,
    pub base: Option<String>,
    pub wait: Option<u64>,
}

/// Land a patch.
pub fn apply(ctx: &Context, args: ApplyArgs) -> Result<ExitCode> {
    let patch = read_patch(&args.patch)?;
    let digest = patch.digest();

    if let Err(e) = patch.parse() {
        let report = LandingReport::failed(&ApplyError::from(e), Some(digest));
        emit(ctx, &report, args.json)?;
        return Ok(report_exit_code(&report));
    }

    let root = ctx.repo_root(args.repo.as_deref())?;
    let config = Config::load(Some(&root), ctx.config.as_deref())?.config;

    let mut options = config.session_options();
    if args.no_pull {
        options.pull_on_enter = false;
    }
    if args.no_strip {
        options.strip_drafts_on_enter = false;
    }
    if let Some(base) = args.base {
        options.base_revision = base;
    }
    if let Some(secs) = args.wait {
        options.lock_policy = LockPolicy::Wait(Duration::from_secs(secs));
    }

    let hg = Hg::open(&root, config.hg_config())?;
    let mut session = Session::enter(&hg, &options)
        .with_context(|| format!("cannot open session on {}", root.display()))?;
    output::debug(
        format!("session {} at {}", session.id(), session.entry_revision()),
        ctx.verbosity,
    );

    let result = session.apply(&patch);
    let mut report = LandingReport::from_result(&result, Some(digest)).with_session(session.id());
    if let Err(e) = session.close() {
        report = report.with_cleanup_error(&e);
    }

    emit(ctx, &report, args.json)?;
    Ok(report_exit_code(&report))
}

/// A working copy left unrestored needs an operator, whatever landed.
fn report_exit_code(report: &LandingReport) -> ExitCode {
    if report.cleanup_error.is_some() {
        return ExitCode::from(EXIT_FAILURE);
    }
    exit_code(report.status)
}

fn exit_code(status: LandingStatus) -> ExitCode {
    match status {
        LandingStatus::Landed => ExitCode::SUCCESS,
        LandingStatus::Structural | LandingStatus::PatchConflict => ExitCode::from(EXIT_REJECTED),
        LandingStatus::HgCommand => ExitCode::from(EXIT_FAILURE),
    }
}

fn emit(ctx: &Context, report: &LandingReport, json: bool) -> Result<()> {
    if json {
        output::json(report)?;
        return Ok(());
    }

    if let Some(cleanup) = &report.cleanup_error {
        output::error(format!("failed to close session: {}", cleanup));
    }
    match report.status {
        LandingStatus::Landed => {
            if let (Some(rev), Some(strategy)) = (&report.result, report.strategy) {
                if strategy == Strategy::Fallback {
                    output::warn(
                        "strict import rejected the patch; landed with the external patch tool",
                        ctx.verbosity,
                    );
                }
                output::success(format!("landed {} ({})", rev, strategy), ctx.verbosity);
            }
        }
        _ => {
            if let Some(error) = &report.error {
                output::error(error);
            }
            if let Some(conflict) = &report.conflict {
                if !conflict.paths.is_empty() {
                    eprintln!("{}", output::format_list(&conflict.paths, "  "));
                }
            }
            if let Some(diagnostics) = &report.diagnostics {
                output::debug(diagnostics, ctx.verbosity);
            }
        }
    }
    Ok(())
}
