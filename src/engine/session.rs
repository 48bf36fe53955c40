//! engine::session
//!
//! Scoped, exclusive access to one working copy.
//!
//! # Lifecycle
//!
//! ```text
//! enter: Lock -> Check clean -> [Pull] -> [Strip drafts] -> Update to base
//! apply: Applier -> (on failure) Discard attempt
//! close: Revert if dirty -> Unlock
//! ```
//!
//! # Invariants
//!
//! - The lock is held from the start of `enter` until `close` or drop
//! - A session never starts on a dirty working copy or an uncommitted merge
//! - A failed apply leaves the working copy at the head it started from,
//!   clean, with no commits added; earlier landings in the session survive
//! - Dropping a session without `close` still reverts and unlocks; errors
//!   are logged instead of returned
//!
//! # Example
//!
//! ```ignore
//! use hgland::engine::session::{Session, SessionOptions};
//! use hgland::hg::{Hg, HgConfig};
//!
//! let hg = Hg::open(root, HgConfig::default())?;
//! let mut session = Session::enter(&hg, &SessionOptions::default())?;
//! let applied = session.apply_patch(std::fs::File::open("D123.patch")?)?;
//! assert!(session.outgoing()?.contains(&applied.revision));
//! session.close()?;
//! ```

use std::io::Read;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info, info_span, warn, Span};

use super::apply::{Applied, Applier, ApplyError, ErrorKind};
use crate::core::ops::lock::{LockError, LockPolicy, WorkingCopyLock};
use crate::core::patch::Patch;
use crate::core::types::{Revision, SessionId};
use crate::hg::{Hg, HgError};

/// How a session prepares the working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Revision to update to on entry.
    pub base_revision: String,
    /// Pull from the default path before updating.
    pub pull_on_enter: bool,
    /// Strip unpublished commits left behind by earlier sessions.
    pub strip_drafts_on_enter: bool,
    /// What to do if another session holds the working copy.
    pub lock_policy: LockPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            base_revision: "default".to_string(),
            pull_on_enter: true,
            strip_drafts_on_enter: true,
            lock_policy: LockPolicy::FailFast,
        }
    }
}

/// Errors from entering or closing a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Another session holds the working copy.
    #[error("working copy {path} is busy: another session holds the lock")]
    Busy { path: PathBuf },

    /// Any other locking failure, including a wait that timed out.
    #[error(transparent)]
    Lock(LockError),

    /// The working copy has changes or a merge in progress.
    #[error("working copy is not clean: {status}")]
    Dirty { status: String },

    /// An hg command failed while preparing the working copy.
    #[error("failed to prepare working copy: {0}")]
    Hg(#[from] HgError),

    /// Restoring the working copy on exit failed.
    #[error("failed to restore working copy: {0}")]
    Cleanup(#[source] HgError),
}

/// An open landing session.
#[derive(Debug)]
pub struct Session {
    hg: Hg,
    lock: WorkingCopyLock,
    id: SessionId,
    entry: Revision,
    /// Head after the last successful apply; failed attempts return here.
    tip: Revision,
    span: Span,
    closed: bool,
}

impl Session {
    /// Lock the working copy and bring it to `options.base_revision`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Busy`] if another session holds the working copy
    ///   under [`LockPolicy::FailFast`]
    /// - [`SessionError::Lock`] if waiting timed out or locking failed
    /// - [`SessionError::Dirty`] if the working copy is not clean
    /// - [`SessionError::Hg`] if pull, strip, or update failed
    ///
    /// The lock is released on every error path.
    pub fn enter(hg: &Hg, options: &SessionOptions) -> Result<Self, SessionError> {
        let id = SessionId::new();
        let span = info_span!("session", session_id = %id, root = %hg.root().display());
        let (lock, entry) = span.in_scope(|| prepare(hg, options))?;

        Ok(Self {
            hg: hg.clone(),
            lock,
            id,
            tip: entry.clone(),
            entry,
            span,
            closed: false,
        })
    }

    /// This session's identifier, as seen in logs.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The revision the working copy was at after entry.
    pub fn entry_revision(&self) -> &Revision {
        &self.entry
    }

    /// The underlying hg handle.
    pub fn hg(&self) -> &Hg {
        &self.hg
    }

    /// Read a patch from `reader` and apply it.
    ///
    /// # Errors
    ///
    /// As [`Session::apply`]; an unreadable stream is an
    /// [`ErrorKind::HgCommand`] error and touches nothing.
    pub fn apply_patch(&mut self, reader: impl Read) -> Result<Applied, ApplyError> {
        let patch = Patch::read_from(reader).map_err(ApplyError::Read)?;
        self.apply(&patch)
    }

    /// Apply and commit `patch`.
    ///
    /// On any failure that may have touched the working copy, the attempt
    /// is discarded before the error is returned.
    pub fn apply(&mut self, patch: &Patch) -> Result<Applied, ApplyError> {
        let span = self.span.clone();
        let _guard = span.enter();

        let result = Applier::new(&self.hg).apply(patch);
        match &result {
            Ok(applied) => self.tip = applied.revision.clone(),
            Err(err) => {
                warn!(error = %err, kind = ?err.kind(), "apply failed");
                if err.kind() != ErrorKind::Structural {
                    if let Err(cleanup) = self.discard_attempt() {
                        error!(error = %cleanup, "failed to discard apply attempt");
                    }
                }
            }
        }
        result
    }

    /// The working copy's current parent.
    pub fn head(&self) -> Result<Revision, HgError> {
        self.hg.head()
    }

    /// Commits not yet in the push target.
    pub fn outgoing(&self) -> Result<Vec<Revision>, HgError> {
        self.hg.outgoing()
    }

    /// Revert any stray changes and release the working copy.
    ///
    /// # Errors
    ///
    /// [`SessionError::Cleanup`] if the revert failed. The lock is released
    /// either way.
    pub fn close(mut self) -> Result<(), SessionError> {
        self.closed = true;
        let span = self.span.clone();
        let _guard = span.enter();

        let reverted = self.revert_if_dirty();
        let released = self.lock.release();
        info!("session closed");

        reverted.map_err(SessionError::Cleanup)?;
        released.map_err(SessionError::Lock)
    }

    /// Back to the pre-attempt head: drop new commits and stray files.
    fn discard_attempt(&self) -> Result<(), HgError> {
        let tip = self.tip.as_str();
        self.hg.update_clean(tip)?;
        let created = format!("(descendants({0}) - {0}) and not public()", tip);
        self.hg.strip(&created)?;
        self.hg.purge_all()
    }

    fn revert_if_dirty(&self) -> Result<(), HgError> {
        let status = self.hg.status()?;
        if status.is_clean() {
            return Ok(());
        }
        warn!(status = %status.describe(), "working copy dirty on exit, reverting");
        self.hg.revert_to_clean(".")
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let _guard = self.span.enter();
        if let Err(e) = self.revert_if_dirty() {
            error!(error = %e, "failed to restore working copy on drop");
        }
    }
}

fn prepare(hg: &Hg, options: &SessionOptions) -> Result<(WorkingCopyLock, Revision), SessionError> {
    let lock =
        WorkingCopyLock::acquire_with(hg.paths(), options.lock_policy).map_err(|e| match e {
            LockError::AlreadyLocked => SessionError::Busy {
                path: hg.root().to_path_buf(),
            },
            other => SessionError::Lock(other),
        })?;

    let status = hg.status()?;
    if !status.is_clean() {
        return Err(SessionError::Dirty {
            status: status.describe(),
        });
    }

    if options.pull_on_enter {
        hg.pull()?;
    }
    if options.strip_drafts_on_enter {
        hg.strip_unpublished()?;
    }
    hg.update_clean(&options.base_revision)?;

    let entry = hg.head()?;
    info!(entry = entry.short(12), base = %options.base_revision, "session entered");
    Ok((lock, entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hg::mock::{Reply, ScriptedRunner};
    use crate::hg::HgConfig;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const ENTRY: &str = "1111111111111111111111111111111111111111";
    const LANDED: &str = "2222222222222222222222222222222222222222";

    const PATCH: &[u8] = b"# HG changeset patch
# User Test User <test@example.com>
# Date 0 0
# Diff Start Line 6
add another line
diff --git a/test.txt b/test.txt
--- a/test.txt
+++ b/test.txt
@@ -1,1 +1,2 @@
 TEST
+adding another line
";

    fn setup() -> (TempDir, ScriptedRunner, Hg) {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        let hg = Hg::with_runner(temp.path(), HgConfig::default(), Arc::new(runner.clone()));
        (temp, runner, hg)
    }

    fn quiet() -> SessionOptions {
        SessionOptions {
            pull_on_enter: false,
            strip_drafts_on_enter: false,
            ..Default::default()
        }
    }

    fn args(runner: &ScriptedRunner) -> Vec<String> {
        runner.calls().into_iter().map(|c| c.args.join(" ")).collect()
    }

    #[test]
    fn enter_prepares_working_copy() {
        let (_temp, runner, hg) = setup();
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));

        let session = Session::enter(&hg, &SessionOptions::default()).unwrap();
        assert_eq!(session.entry_revision().as_str(), ENTRY);

        let calls = args(&runner);
        let pos = |prefix: &str| calls.iter().position(|a| a.starts_with(prefix)).unwrap();
        assert!(pos("status") < pos("pull"));
        assert!(pos("pull") < pos("log -r not public()"));
        assert!(pos("log -r not public()") < pos("update --clean -r default"));
        session.close().unwrap();
    }

    #[test]
    fn enter_can_skip_pull_and_strip() {
        let (_temp, runner, hg) = setup();
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));

        let session = Session::enter(&hg, &quiet()).unwrap();
        assert_eq!(runner.count(&["pull"]), 0);
        assert_eq!(runner.count(&["log", "-r", "not public()"]), 0);
        session.close().unwrap();
    }

    #[test]
    fn dirty_working_copy_is_rejected() {
        let (_temp, runner, hg) = setup();
        runner.on(&["status"], Reply::ok("M test.txt\n"));

        match Session::enter(&hg, &quiet()) {
            Err(SessionError::Dirty { status }) => assert_eq!(status, "1 modified"),
            other => panic!("expected Dirty, got {:?}", other),
        }
        assert_eq!(runner.count(&["update"]), 0);

        // The lock was released on the error path.
        assert!(WorkingCopyLock::acquire(hg.paths()).is_ok());
    }

    #[test]
    fn pending_merge_is_rejected() {
        let (_temp, runner, hg) = setup();
        runner.on(
            &["log", "-r", "parents()"],
            Reply::ok(format!("{}\n{}\n", ENTRY, LANDED)),
        );

        assert!(matches!(
            Session::enter(&hg, &quiet()),
            Err(SessionError::Dirty { .. })
        ));
    }

    #[test]
    fn second_session_is_busy() {
        let (_temp, runner, hg) = setup();
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));

        let first = Session::enter(&hg, &quiet()).unwrap();
        assert!(matches!(
            Session::enter(&hg, &quiet()),
            Err(SessionError::Busy { .. })
        ));
        first.close().unwrap();

        let again = Session::enter(&hg, &quiet()).unwrap();
        again.close().unwrap();
    }

    #[test]
    fn waiting_session_times_out() {
        let (_temp, runner, hg) = setup();
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));

        let _first = Session::enter(&hg, &quiet()).unwrap();
        let waiting = SessionOptions {
            lock_policy: LockPolicy::Wait(Duration::from_millis(100)),
            ..quiet()
        };
        assert!(matches!(
            Session::enter(&hg, &waiting),
            Err(SessionError::Lock(LockError::WaitTimedOut { .. }))
        ));
    }

    #[test]
    fn successful_apply_keeps_commit() {
        let (_temp, runner, hg) = setup();
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));
        runner.on(&["log", "-r", "."], Reply::ok(LANDED));

        let mut session = Session::enter(&hg, &quiet()).unwrap();
        let applied = session.apply_patch(PATCH).unwrap();
        assert_eq!(applied.revision.as_str(), LANDED);
        session.close().unwrap();

        assert_eq!(runner.count(&["strip"]), 0);
        assert_eq!(runner.count(&["purge"]), 0);
    }

    #[test]
    fn failed_apply_discards_attempt() {
        let (_temp, runner, hg) = setup();
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));
        runner.on(
            &["import"],
            Reply::exit(
                255,
                "1 out of 1 hunks FAILED -- saving rejects to file test.txt.rej\n",
            ),
        );

        let mut session = Session::enter(&hg, &quiet()).unwrap();
        let err = session.apply_patch(PATCH).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PatchConflict);

        let calls = args(&runner);
        let import = calls.iter().position(|a| a.starts_with("import")).unwrap();
        let after: Vec<&String> = calls[import + 1..].iter().collect();
        assert_eq!(after[0], &format!("update --clean -r {}", ENTRY));
        assert!(after[1].starts_with(&format!("log -r (descendants({0}) - {0})", ENTRY)));
        assert_eq!(after[2], "purge --all");
        session.close().unwrap();
    }

    #[test]
    fn failed_apply_keeps_earlier_landing() {
        let (_temp, runner, hg) = setup();
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));
        runner.on(&["log", "-r", "."], Reply::ok(LANDED));
        runner.on(&["import"], Reply::ok(""));
        runner.on(
            &["import"],
            Reply::exit(
                255,
                "1 out of 1 hunks FAILED -- saving rejects to file test.txt.rej\n",
            ),
        );

        let mut session = Session::enter(&hg, &quiet()).unwrap();
        let first = session.apply_patch(PATCH).unwrap();
        assert_eq!(first.revision.as_str(), LANDED);

        let err = session.apply_patch(PATCH).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PatchConflict);

        let calls = args(&runner);
        let import = calls.iter().rposition(|a| a.starts_with("import")).unwrap();
        let after: Vec<&String> = calls[import + 1..].iter().collect();
        assert_eq!(after[0], &format!("update --clean -r {}", LANDED));
        assert!(after[1].starts_with(&format!("log -r (descendants({0}) - {0})", LANDED)));
        assert!(!calls.iter().any(|a| a.contains(&format!("descendants({})", ENTRY))));
        assert_eq!(after[2], "purge --all");
        session.close().unwrap();
    }

    #[test]
    fn unreadable_stream_touches_nothing() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            }
        }

        let (_temp, runner, hg) = setup();
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));

        let mut session = Session::enter(&hg, &quiet()).unwrap();
        let before = runner.calls().len();
        let err = session.apply_patch(Broken).unwrap_err();
        assert!(matches!(err, ApplyError::Read(_)));
        assert_eq!(err.kind(), ErrorKind::HgCommand);
        assert!(!err.kind().is_patch_fault());
        assert_eq!(runner.calls().len(), before);
        session.close().unwrap();
    }

    #[test]
    fn structural_failure_skips_cleanup() {
        let (_temp, runner, hg) = setup();
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));

        let mut session = Session::enter(&hg, &quiet()).unwrap();
        let before = runner.calls().len();
        let err = session
            .apply_patch(&b"# HG changeset patch\n# User a <a@b>\n# Date 0 0\nmsg\n"[..])
            .unwrap_err();
        assert!(err.is_no_diff_start_line());
        assert_eq!(runner.calls().len(), before);
        session.close().unwrap();
    }

    #[test]
    fn close_reverts_dirty_working_copy() {
        let (_temp, runner, hg) = setup();
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));
        runner.on(&["status"], Reply::ok(""));
        runner.on(&["status"], Reply::ok("? leftover.rej\n"));

        let session = Session::enter(&hg, &quiet()).unwrap();
        session.close().unwrap();

        assert_eq!(runner.count(&["update", "--clean", "-r", "."]), 1);
        assert_eq!(runner.count(&["purge", "--all"]), 1);
    }

    #[test]
    fn close_reports_cleanup_failure_and_unlocks() {
        let (_temp, runner, hg) = setup();
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));
        runner.on(&["status"], Reply::ok(""));
        runner.on(&["status"], Reply::ok("M test.txt\n"));
        runner.on(&["update", "--clean", "-r", "."], Reply::exit(255, "abort: disk full\n"));

        let session = Session::enter(&hg, &quiet()).unwrap();
        assert!(matches!(session.close(), Err(SessionError::Cleanup(_))));
        assert!(WorkingCopyLock::acquire(hg.paths()).is_ok());
    }

    #[test]
    fn drop_reverts_and_unlocks() {
        let (_temp, runner, hg) = setup();
        runner.on(&["log", "-r", "."], Reply::ok(ENTRY));
        runner.on(&["status"], Reply::ok(""));
        runner.on(&["status"], Reply::ok("A new-file\n"));

        {
            let _session = Session::enter(&hg, &quiet()).unwrap();
        }

        assert_eq!(runner.count(&["update", "--clean", "-r", "."]), 1);
        assert!(WorkingCopyLock::acquire(hg.paths()).is_ok());
    }

    #[test]
    fn sessions_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Session>();
    }
}
