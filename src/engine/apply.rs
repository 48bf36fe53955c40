//! engine::apply
//!
//! The patch applier: a two-strategy state machine.
//!
//! # Lifecycle
//!
//! ```text
//! Parse -> FastImport -> Done
//!                     \-> (recoverable failure) -> Revert -> Fallback -> Done | Failed
//! ```
//!
//! 1. **Parse**: metadata is extracted before anything touches the working
//!    copy. Structural problems stop here.
//! 2. **FastImport**: `hg import` applies and commits in one step.
//! 3. A conflict from the fast import is final. A timeout is final. Any
//!    other command failure that the [`FailurePolicy`] allows moves on.
//! 4. **Revert**: the working copy goes back to the entry revision and must
//!    be clean before the fallback starts, since the fallback is two
//!    non-atomic steps.
//! 5. **Fallback**: `hg import --no-commit` with the external patch tool,
//!    then `hg commit` with the parsed attribution. Every failure here is a
//!    command error, whatever its output looks like.
//!
//! The applier never cleans up after a failed attempt; the
//! [`Session`](super::session::Session) owns that.
//!
//! [`FailurePolicy`]: crate::hg::FailurePolicy

use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::patch::{ParsedPatch, Patch, PatchError};
use crate::core::types::{PatchDigest, Revision};
use crate::hg::{ConflictReport, Hg, HgError};

/// The three failure kinds callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The patch is unusable regardless of target content
    /// (`NoDiffStartLine` and friends). Reject it.
    Structural,
    /// The patch does not apply to the current target content. Retry only
    /// with a fresh patch.
    PatchConflict,
    /// hg failed for another reason, including timeouts. Not retryable here.
    HgCommand,
}

impl ErrorKind {
    /// Whether the same patch bytes could ever land.
    pub fn is_patch_fault(&self) -> bool {
        matches!(self, ErrorKind::Structural | ErrorKind::PatchConflict)
    }
}

/// Errors from applying a patch.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The patch failed metadata parsing.
    #[error("{0}")]
    Malformed(#[from] PatchError),

    /// The patch stream could not be read. Says nothing about the patch.
    #[error("failed to read patch: {0}")]
    Read(#[source] io::Error),

    /// The fast import reported a content conflict.
    #[error("{0}")]
    PatchConflict(ConflictReport),

    /// hg failed for any other reason, or the fallback failed.
    #[error("hg command failed: {0}")]
    HgCommand(#[source] HgError),

    /// The working copy was not clean after reverting for the fallback.
    #[error("working copy not clean before fallback: {status}")]
    NotClean { status: String },

    /// hg reported success but the head did not move.
    #[error("import reported success but no commit was created")]
    NoCommit,

    /// A scratch file could not be written.
    #[error("failed to write {what}: {source}")]
    Scratch {
        what: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ApplyError {
    /// Which of the three failure kinds this is.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplyError::Malformed(_) => ErrorKind::Structural,
            ApplyError::PatchConflict(_) => ErrorKind::PatchConflict,
            ApplyError::Read(_)
            | ApplyError::HgCommand(_)
            | ApplyError::NotClean { .. }
            | ApplyError::NoCommit
            | ApplyError::Scratch { .. } => ErrorKind::HgCommand,
        }
    }

    /// Whether the patch is missing its `Diff Start Line` directive.
    pub fn is_no_diff_start_line(&self) -> bool {
        matches!(self, ApplyError::Malformed(PatchError::NoDiffStartLine))
    }

    /// Whether an hg command was killed at its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ApplyError::HgCommand(e) if e.is_timeout())
    }

    /// Captured hg output for operators, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        let text = match self {
            ApplyError::PatchConflict(report) => report.details.as_str(),
            ApplyError::HgCommand(e) => e.diagnostics(),
            _ => return None,
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn from_fast_import(err: HgError) -> Self {
        match err {
            HgError::PatchConflict(report) => ApplyError::PatchConflict(report),
            other => ApplyError::HgCommand(other),
        }
    }
}

/// How a patch was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Single-step `hg import`.
    FastImport,
    /// External patch tool, then `hg commit`.
    Fallback,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::FastImport => write!(f, "fast import"),
            Strategy::Fallback => write!(f, "fallback"),
        }
    }
}

/// A successfully landed patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// The new commit.
    pub revision: Revision,
    /// Which strategy produced it.
    pub strategy: Strategy,
    /// SHA-256 of the patch bytes.
    pub digest: PatchDigest,
    /// Parsed metadata.
    pub patch: ParsedPatch,
}

/// Tagged result of one apply attempt.
///
/// Command failures are not an outcome: they stay errors, since the
/// caller cannot act on them the way it acts on these three.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Success {
        revision: Revision,
        strategy: Strategy,
    },
    Conflict(ConflictReport),
    StructuralError(PatchError),
}

impl ApplyOutcome {
    /// Sort a result into an outcome, passing command errors through.
    pub fn from_result(result: Result<Applied, ApplyError>) -> Result<Self, ApplyError> {
        match result {
            Ok(applied) => Ok(ApplyOutcome::Success {
                revision: applied.revision,
                strategy: applied.strategy,
            }),
            Err(ApplyError::PatchConflict(report)) => Ok(ApplyOutcome::Conflict(report)),
            Err(ApplyError::Malformed(e)) => Ok(ApplyOutcome::StructuralError(e)),
            Err(e) => Err(e),
        }
    }
}

/// Drives one patch through the two strategies.
#[derive(Debug)]
pub struct Applier<'a> {
    hg: &'a Hg,
}

impl<'a> Applier<'a> {
    pub fn new(hg: &'a Hg) -> Self {
        Self { hg }
    }

    /// Apply and commit `patch`.
    ///
    /// The working copy must be clean. On error it may be left dirty; the
    /// caller is responsible for restoring it.
    ///
    /// # Errors
    ///
    /// See [`ApplyError::kind`] for how errors group.
    pub fn apply(&self, patch: &Patch) -> Result<Applied, ApplyError> {
        let digest = patch.digest();
        let parsed = patch.parse()?;
        debug!(
            patch_sha256 = digest.short(),
            user = %parsed.attribution.user,
            diff_start_line = parsed.diff_start_line,
            "parsed patch"
        );

        let entry = self.hg.head().map_err(ApplyError::HgCommand)?;
        let scratch = self.hg.paths().tmp_dir();
        std::fs::create_dir_all(&scratch).map_err(|source| ApplyError::Scratch {
            what: "scratch directory",
            source,
        })?;
        let message = write_scratch(&scratch, "message-", ".txt", parsed.message.as_bytes())
            .map_err(|source| ApplyError::Scratch {
                what: "commit message",
                source,
            })?;

        let strategy = match self
            .hg
            .import_commit(&parsed.diff, &parsed.attribution, message.path())
        {
            Ok(()) => Strategy::FastImport,
            Err(err) if !self.should_fall_back(&err) => {
                debug!(error = %err, "fast import failed, not falling back");
                return Err(ApplyError::from_fast_import(err));
            }
            Err(err) => {
                warn!(error = %err, "fast import failed, trying fallback");
                self.prepare_fallback(&entry)?;
                self.fallback(&scratch, &parsed, message.path())?;
                Strategy::Fallback
            }
        };

        let revision = self.hg.head().map_err(ApplyError::HgCommand)?;
        if revision == entry {
            return Err(ApplyError::NoCommit);
        }
        info!(
            patch_sha256 = digest.short(),
            revision = revision.short(12),
            %strategy,
            "patch committed"
        );

        Ok(Applied {
            revision,
            strategy,
            digest,
            patch: parsed,
        })
    }

    /// Only generic command failures the policy table admits fall back.
    fn should_fall_back(&self, err: &HgError) -> bool {
        match err {
            HgError::Command { stdout, stderr, .. } => {
                self.hg.config().policy.allows_fallback(stdout, stderr)
            }
            _ => false,
        }
    }

    fn prepare_fallback(&self, entry: &Revision) -> Result<(), ApplyError> {
        self.hg
            .revert_to_clean(entry.as_str())
            .map_err(ApplyError::HgCommand)?;
        let status = self.hg.status().map_err(ApplyError::HgCommand)?;
        if !status.is_clean() {
            return Err(ApplyError::NotClean {
                status: status.describe(),
            });
        }
        Ok(())
    }

    fn fallback(
        &self,
        scratch: &Path,
        parsed: &ParsedPatch,
        message: &Path,
    ) -> Result<(), ApplyError> {
        let diff = write_scratch(scratch, "diff-", ".patch", &parsed.diff).map_err(|source| {
            ApplyError::Scratch {
                what: "diff",
                source,
            }
        })?;
        self.hg
            .import_no_commit(diff.path())
            .map_err(ApplyError::HgCommand)?;
        self.hg
            .commit(&parsed.attribution, message)
            .map_err(ApplyError::HgCommand)
    }
}

fn write_scratch(dir: &Path, prefix: &str, suffix: &str, bytes: &[u8]) -> io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}
