//! hg::interface
//!
//! The single doorway to Mercurial operations on a working copy.
//!
//! # Architecture
//!
//! [`Hg`] wraps an [`HgRunner`] and knows which hg subcommands implement
//! each repository operation hgland needs. No other module builds hg
//! argument lists. Every operation carries a deadline from [`HgConfig`]:
//! `import_timeout` for imports, `pull_timeout` for pulls, and
//! `command_timeout` for everything else.
//!
//! # Example
//!
//! ```ignore
//! use hgland::hg::{Hg, HgConfig};
//! use std::path::Path;
//!
//! let hg = Hg::open(Path::new("/srv/clones/central"), HgConfig::default())?;
//! if hg.status()?.is_clean() {
//!     println!("at {}", hg.head()?.short(12));
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::classify::FailurePolicy;
use super::runner::{CommandOutput, HgCommand, HgError, HgRunner, ProcessRunner};
use crate::core::patch::Attribution;
use crate::core::paths::HgPaths;
use crate::core::types::Revision;

/// Revset for commits a session may discard on entry.
const UNPUBLISHED: &str = "not public()";

/// Settings for invoking hg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HgConfig {
    /// Path or name of the hg executable.
    pub binary: String,
    /// Deadline for ordinary commands.
    pub command_timeout: Duration,
    /// Deadline for `hg import`.
    pub import_timeout: Duration,
    /// Deadline for `hg pull`.
    pub pull_timeout: Duration,
    /// `hg import --similarity` value for rename detection.
    pub similarity: u8,
    /// `ui.patch` command used by the fallback strategy.
    pub fallback_patch_tool: String,
    /// Failure classification table.
    pub policy: FailurePolicy,
}

impl Default for HgConfig {
    fn default() -> Self {
        Self {
            binary: "hg".to_string(),
            command_timeout: Duration::from_secs(60),
            import_timeout: Duration::from_secs(300),
            pull_timeout: Duration::from_secs(600),
            similarity: 95,
            fallback_patch_tool: "patch -r - --no-backup-if-mismatch".to_string(),
            policy: FailurePolicy::default(),
        }
    }
}

/// Summary of working copy status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingCopyStatus {
    pub modified: usize,
    pub added: usize,
    pub removed: usize,
    /// Tracked files missing from disk (`!`).
    pub deleted: usize,
    /// Untracked, unignored files (`?`).
    pub unknown: usize,
    /// The working copy has two parents.
    pub merge_pending: bool,
}

impl WorkingCopyStatus {
    /// No changes, no stray files, no merge in progress.
    pub fn is_clean(&self) -> bool {
        self.modified == 0
            && self.added == 0
            && self.removed == 0
            && self.deleted == 0
            && self.unknown == 0
            && !self.merge_pending
    }

    /// Human-readable summary, e.g. `"2 modified, 1 unknown"`.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        for (count, label) in [
            (self.modified, "modified"),
            (self.added, "added"),
            (self.removed, "removed"),
            (self.deleted, "missing"),
            (self.unknown, "unknown"),
        ] {
            if count > 0 {
                parts.push(format!("{} {}", count, label));
            }
        }
        if self.merge_pending {
            parts.push("uncommitted merge".to_string());
        }
        if parts.is_empty() {
            "clean".to_string()
        } else {
            parts.join(", ")
        }
    }

    fn parse(output: &str) -> Self {
        let mut status = Self::default();
        for line in output.lines() {
            match line.chars().next() {
                Some('M') => status.modified += 1,
                Some('A') => status.added += 1,
                Some('R') => status.removed += 1,
                Some('!') => status.deleted += 1,
                Some('?') => status.unknown += 1,
                _ => {}
            }
        }
        status
    }
}

/// Mercurial operations on one working copy.
#[derive(Debug, Clone)]
pub struct Hg {
    paths: HgPaths,
    config: HgConfig,
    runner: Arc<dyn HgRunner>,
}

impl Hg {
    /// Open the working copy at `root`, running the real hg executable.
    ///
    /// # Errors
    ///
    /// Returns [`HgError::NotAWorkingCopy`] if `root` has no `.hg`.
    pub fn open(root: &Path, config: HgConfig) -> Result<Self, HgError> {
        let paths = HgPaths::new(root.to_path_buf());
        if !paths.is_working_copy() {
            return Err(HgError::NotAWorkingCopy {
                path: root.to_path_buf(),
            });
        }
        let runner = Arc::new(ProcessRunner::new(
            config.binary.clone(),
            config.policy.clone(),
        ));
        Ok(Self::with_runner(root, config, runner))
    }

    /// Use a specific runner. Does not check that `root` exists.
    ///
    /// A relative `root` is resolved against the current directory, since
    /// hg runs inside the root and is handed scratch paths under it.
    pub fn with_runner(root: &Path, config: HgConfig, runner: Arc<dyn HgRunner>) -> Self {
        let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
        Self {
            paths: HgPaths::new(root),
            config,
            runner,
        }
    }

    /// Root of the working copy.
    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    /// hgland storage paths for this working copy.
    pub fn paths(&self) -> &HgPaths {
        &self.paths
    }

    /// Invocation settings.
    pub fn config(&self) -> &HgConfig {
        &self.config
    }

    fn exec(&self, command: HgCommand) -> Result<CommandOutput, HgError> {
        self.runner.run(self.paths.root(), &command)
    }

    /// Run an arbitrary hg command with the ordinary deadline.
    pub fn run(&self, args: &[&str]) -> Result<String, HgError> {
        self.exec(HgCommand::new(
            args.iter().copied(),
            self.config.command_timeout,
        ))
        .map(|out| out.stdout)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Working copy status, including whether a merge is pending.
    pub fn status(&self) -> Result<WorkingCopyStatus, HgError> {
        let output = self.run(&[
            "status",
            "--modified",
            "--added",
            "--removed",
            "--deleted",
            "--unknown",
        ])?;
        let mut status = WorkingCopyStatus::parse(&output);
        status.merge_pending = self.revisions("parents()")?.len() > 1;
        Ok(status)
    }

    /// Whether the working copy is clean.
    pub fn is_clean(&self) -> Result<bool, HgError> {
        Ok(self.status()?.is_clean())
    }

    /// Node of the working copy's first parent.
    pub fn head(&self) -> Result<Revision, HgError> {
        let output = self.run(&["log", "-r", ".", "-T", "{node}"])?;
        parse_revision("log -r .", output.trim())
    }

    /// Nodes matching `revset`, in revision order.
    pub fn revisions(&self, revset: &str) -> Result<Vec<Revision>, HgError> {
        let output = self.run(&["log", "-r", revset, "-T", "{node}\\n"])?;
        parse_revisions(&format!("log -r {}", revset), &output)
    }

    /// Local commits not present in the default push target.
    pub fn outgoing(&self) -> Result<Vec<Revision>, HgError> {
        let args = ["outgoing", "--quiet", "-T", "{node}\\n"];
        match self.run(&args) {
            Ok(output) => parse_revisions("outgoing", &output),
            // hg outgoing exits 1 when there is nothing to push.
            Err(HgError::Command {
                exit_code: Some(1), ..
            }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Pull from the default path.
    pub fn pull(&self) -> Result<(), HgError> {
        info!(root = %self.root().display(), "pulling");
        self.exec(HgCommand::new(["pull"], self.config.pull_timeout))?;
        Ok(())
    }

    /// Update to `rev`, discarding uncommitted changes.
    pub fn update_clean(&self, rev: &str) -> Result<(), HgError> {
        self.run(&["update", "--clean", "-r", rev])?;
        Ok(())
    }

    /// Delete untracked and ignored files.
    pub fn purge_all(&self) -> Result<(), HgError> {
        self.run(&["purge", "--all"])?;
        Ok(())
    }

    /// Revert the working tree to `rev` and remove every stray file.
    pub fn revert_to_clean(&self, rev: &str) -> Result<(), HgError> {
        debug!(rev, "reverting working copy");
        self.update_clean(rev)?;
        self.purge_all()
    }

    /// Strip the commits in `revset` without backup bundles.
    ///
    /// Returns how many commits were stripped; an empty revset is a no-op.
    pub fn strip(&self, revset: &str) -> Result<usize, HgError> {
        let doomed = self.revisions(revset)?;
        if doomed.is_empty() {
            return Ok(0);
        }
        info!(count = doomed.len(), revset, "stripping commits");
        self.run(&["strip", "--no-backup", "-r", revset])?;
        Ok(doomed.len())
    }

    /// Strip every unpublished commit.
    pub fn strip_unpublished(&self) -> Result<usize, HgError> {
        self.strip(UNPUBLISHED)
    }

    /// Apply and commit a diff in one step with `hg import`.
    ///
    /// The diff is fed on stdin; the message is read from `logfile`.
    pub fn import_commit(
        &self,
        diff: &[u8],
        attribution: &Attribution,
        logfile: &Path,
    ) -> Result<(), HgError> {
        let similarity = self.config.similarity.to_string();
        let logfile = logfile.to_string_lossy();
        let command = HgCommand::new(
            [
                "import",
                "--similarity",
                similarity.as_str(),
                "--user",
                attribution.user.as_str(),
                "--date",
                attribution.date.as_str(),
                "--logfile",
                &*logfile,
                "-",
            ],
            self.config.import_timeout,
        )
        .with_stdin(diff);
        self.exec(command)?;
        Ok(())
    }

    /// Apply the diff in `diff_file` to the working tree with the external
    /// patch tool, without committing.
    pub fn import_no_commit(&self, diff_file: &Path) -> Result<(), HgError> {
        let similarity = self.config.similarity.to_string();
        let tool = format!("ui.patch={}", self.config.fallback_patch_tool);
        let diff_file = diff_file.to_string_lossy();
        self.exec(HgCommand::new(
            [
                "import",
                "--no-commit",
                "--similarity",
                similarity.as_str(),
                "--config",
                tool.as_str(),
                &*diff_file,
            ],
            self.config.import_timeout,
        ))?;
        Ok(())
    }

    /// Commit the working tree with the given attribution.
    pub fn commit(&self, attribution: &Attribution, logfile: &Path) -> Result<(), HgError> {
        let logfile = logfile.to_string_lossy();
        self.run(&[
            "commit",
            "--user",
            &attribution.user,
            "--date",
            &attribution.date,
            "--logfile",
            &logfile,
        ])?;
        Ok(())
    }
}

fn parse_revision(args: &str, text: &str) -> Result<Revision, HgError> {
    Revision::new(text).map_err(|e| HgError::UnexpectedOutput {
        args: args.to_string(),
        message: e.to_string(),
    })
}

fn parse_revisions(args: &str, output: &str) -> Result<Vec<Revision>, HgError> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| parse_revision(args, l))
        .collect()
}
