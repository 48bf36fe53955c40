//! inspect command - Show what hgland reads from a patch
//!
//! Read-only and repository-free: useful for checking a patch before
//! queueing it for landing.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use serde::Serialize;

use super::{read_patch, EXIT_REJECTED};
use crate::cli::Context;
use crate::core::patch::ParsedPatch;
use crate::core::types::PatchDigest;
use crate::ui::output;

#[derive(Debug, Serialize)]
struct Inspection<'a> {
    patch_sha256: &'a PatchDigest,
    #[serde(flatten)]
    patch: &'a ParsedPatch,
    diff_bytes: usize,
    /// RFC 3339 rendering of the date header, when it is in hg's
    /// internal format.
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

/// Print a patch's metadata.
pub fn inspect(ctx: &Context, path: &Path, json: bool) -> Result<ExitCode> {
    let patch = read_patch(path)?;
    let digest = patch.digest();

    let parsed = match patch.parse() {
        Ok(parsed) => parsed,
        Err(e) => {
            if json {
                output::json(&serde_json::json!({
                    "patch_sha256": digest,
                    "error": e,
                    "message": e.to_string(),
                }))?;
            } else {
                output::error(&e);
            }
            return Ok(ExitCode::from(EXIT_REJECTED));
        }
    };

    let inspection = Inspection {
        patch_sha256: &digest,
        patch: &parsed,
        diff_bytes: parsed.diff.len(),
        timestamp: parsed.attribution.timestamp().map(|t| t.to_rfc3339()),
    };

    if json {
        output::json(&inspection)?;
    } else {
        let v = ctx.verbosity;
        output::print(format!("User:            {}", parsed.attribution.user), v);
        match &inspection.timestamp {
            Some(ts) => output::print(
                format!("Date:            {} ({})", parsed.attribution.date, ts),
                v,
            ),
            None => output::print(format!("Date:            {}", parsed.attribution.date), v),
        }
        for (label, value) in [
            ("Node ID", &parsed.node_id),
            ("Parent", &parsed.parent),
            ("Branch", &parsed.branch),
        ] {
            if let Some(value) = value {
                output::print(format!("{:<17}{}", format!("{}:", label), value), v);
            }
        }
        output::print(format!("Diff start line: {}", parsed.diff_start_line), v);
        output::print(format!("Diff size:       {} bytes", parsed.diff.len()), v);
        output::print(format!("SHA-256:         {}", digest), v);
        output::print("", v);
        output::print(&parsed.message, v);
    }

    Ok(ExitCode::SUCCESS)
}
