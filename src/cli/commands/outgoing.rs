//! outgoing command - List commits not yet pushed
//!
//! Read-only; does not take the session lock.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;

use crate::cli::Context;
use crate::core::config::Config;
use crate::hg::Hg;
use crate::ui::output;

/// Print outgoing revisions, oldest first.
pub fn outgoing(ctx: &Context, repo: Option<&Path>, json: bool) -> Result<ExitCode> {
    let root = ctx.repo_root(repo)?;
    let config = Config::load(Some(&root), ctx.config.as_deref())?.config;
    let hg = Hg::open(&root, config.hg_config())?;

    let revisions = hg.outgoing()?;
    if json {
        output::json(&revisions)?;
    } else if revisions.is_empty() {
        output::print("no outgoing commits", ctx.verbosity);
    } else {
        output::print(output::format_list(&revisions, ""), ctx.verbosity);
    }
    Ok(ExitCode::SUCCESS)
}
