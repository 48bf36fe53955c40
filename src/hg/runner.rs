//! hg::runner
//!
//! Bounded execution of hg subcommands.
//!
//! # Architecture
//!
//! [`HgRunner`] is the seam between hgland and the `hg` executable. The
//! production implementation, [`ProcessRunner`], spawns one process per
//! command; tests substitute the scripted runner from [`crate::hg::mock`].
//!
//! Every command runs with:
//! - `HGPLAIN=1` so output is stable and unlocalized
//! - `ui.interactive=False` so hg never prompts
//! - the `purge` and `strip` extensions enabled
//! - a deadline, after which the process is killed
//!
//! # Termination
//!
//! The child is started in its own process group. On timeout the whole
//! group is killed, which also takes down any `patch` process hg spawned
//! for an external patch tool. A `ChildGuard` kills and reaps the child
//! if the runner unwinds for any other reason, so no call leaves a process
//! behind.
//!
//! Output is collected by reader threads into shared buffers. A timed-out
//! command still reports whatever stderr it produced before it was killed,
//! and a reader stuck on a pipe held open by an escaped grandchild cannot
//! hang the caller: joins are bounded by [`DRAIN_TIMEOUT`].

use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use super::classify::{ConflictReport, FailurePolicy};

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on waiting for output readers after the child is gone.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Options prepended to every hg invocation.
const GLOBAL_ARGS: &[&str] = &[
    "--config",
    "ui.interactive=False",
    "--config",
    "extensions.purge=",
    "--config",
    "extensions.strip=",
];

/// Errors from running hg.
#[derive(Debug, Error)]
pub enum HgError {
    /// The command failed and its output carries a conflict signature.
    #[error("{0}")]
    PatchConflict(ConflictReport),

    /// The command exited unsuccessfully for any other reason.
    #[error("hg {args} failed ({}): {}", describe_exit(.exit_code), first_line(.stderr))]
    Command {
        /// The hg arguments, space-joined.
        args: String,
        /// Exit code, `None` if killed by a signal.
        exit_code: Option<i32>,
        /// Captured stdout.
        stdout: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The command did not finish in time and was killed.
    #[error("hg {args} timed out after {timeout:?}")]
    Timeout {
        /// The hg arguments, space-joined.
        args: String,
        /// The deadline that was exceeded.
        timeout: Duration,
        /// Stderr produced before the kill.
        stderr: String,
    },

    /// The hg executable could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// The executable that failed to start.
        program: String,
        #[source]
        source: io::Error,
    },

    /// Waiting on the child failed.
    #[error("i/o error running hg {args}: {source}")]
    Io {
        /// The hg arguments, space-joined.
        args: String,
        #[source]
        source: io::Error,
    },

    /// The path is not a Mercurial working copy.
    #[error("not a mercurial working copy: {path}")]
    NotAWorkingCopy {
        /// The path that was checked.
        path: std::path::PathBuf,
    },

    /// hg succeeded but printed something we could not interpret.
    #[error("unexpected output from hg {args}: {message}")]
    UnexpectedOutput {
        /// The hg arguments, space-joined.
        args: String,
        /// What was wrong.
        message: String,
    },
}

impl HgError {
    /// Whether this is a content conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, HgError::PatchConflict(_))
    }

    /// Whether the command was killed at its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HgError::Timeout { .. })
    }

    /// Captured diagnostic output, if any.
    pub fn diagnostics(&self) -> &str {
        match self {
            HgError::PatchConflict(report) => &report.details,
            HgError::Command { stderr, stdout, .. } => {
                if stderr.trim().is_empty() {
                    stdout
                } else {
                    stderr
                }
            }
            HgError::Timeout { stderr, .. } => stderr,
            _ => "",
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit {}", code),
        None => "killed by signal".to_string(),
    }
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output")
}

/// One hg invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HgCommand {
    /// Arguments after `hg` (global options are added by the runner).
    pub args: Vec<String>,
    /// Bytes written to the child's stdin.
    pub stdin: Option<Vec<u8>>,
    /// Deadline for the whole invocation.
    pub timeout: Duration,
}

impl HgCommand {
    /// Build a command from arguments.
    pub fn new<I, S>(args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout,
        }
    }

    /// Feed `bytes` to the command's stdin.
    pub fn with_stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    /// Arguments joined for logs and error messages.
    pub fn display(&self) -> String {
        self.args.join(" ")
    }
}

/// Output of a successful command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Executes hg commands in a working copy.
pub trait HgRunner: Send + Sync + std::fmt::Debug {
    /// Run `command` with `cwd` as the working directory.
    ///
    /// # Errors
    ///
    /// A nonzero exit is classified into [`HgError::PatchConflict`] or
    /// [`HgError::Command`]; a missed deadline is [`HgError::Timeout`].
    fn run(&self, cwd: &Path, command: &HgCommand) -> Result<CommandOutput, HgError>;
}

/// Map a failed exit to an [`HgError`] using the policy table.
pub fn classify_exit(
    policy: &FailurePolicy,
    command: &HgCommand,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
) -> HgError {
    if policy.is_conflict(&stdout, &stderr) {
        HgError::PatchConflict(ConflictReport::from_output(&stdout, &stderr))
    } else {
        HgError::Command {
            args: command.display(),
            exit_code,
            stdout,
            stderr,
        }
    }
}

/// Runs hg as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    binary: String,
    policy: FailurePolicy,
}

impl ProcessRunner {
    /// Create a runner for the given executable and classification table.
    pub fn new(binary: impl Into<String>, policy: FailurePolicy) -> Self {
        Self {
            binary: binary.into(),
            policy,
        }
    }

    /// The executable this runner invokes.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn command(&self, cwd: &Path, command: &HgCommand) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(GLOBAL_ARGS)
            .args(&command.args)
            .current_dir(cwd)
            .env("HGPLAIN", "1")
            .env("HGENCODING", "utf-8")
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        cmd
    }
}

impl HgRunner for ProcessRunner {
    fn run(&self, cwd: &Path, command: &HgCommand) -> Result<CommandOutput, HgError> {
        let args = command.display();
        debug!(cwd = %cwd.display(), %args, "running hg");

        let start = Instant::now();
        let child = self
            .command(cwd, command)
            .spawn()
            .map_err(|source| HgError::Spawn {
                program: self.binary.clone(),
                source,
            })?;
        let mut guard = ChildGuard::new(child);

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let stdout_reader = guard
            .child
            .stdout
            .take()
            .map(|pipe| spawn_reader(pipe, Arc::clone(&stdout_buf)));
        let stderr_reader = guard
            .child
            .stderr
            .take()
            .map(|pipe| spawn_reader(pipe, Arc::clone(&stderr_buf)));
        let stdin_writer = match (guard.child.stdin.take(), &command.stdin) {
            (Some(pipe), Some(bytes)) => Some(spawn_writer(pipe, bytes.clone())),
            _ => None,
        };

        let deadline = start + command.timeout;
        let status: ExitStatus = loop {
            match guard.child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => return Err(HgError::Io { args, source }),
            }

            if Instant::now() >= deadline {
                guard.kill();
                join_bounded(stdin_writer);
                join_bounded(stdout_reader);
                join_bounded(stderr_reader);
                let stderr = snapshot(&stderr_buf);
                warn!(%args, timeout = ?command.timeout, "hg timed out, killed");
                return Err(HgError::Timeout {
                    args,
                    timeout: command.timeout,
                    stderr,
                });
            }

            thread::sleep(POLL_INTERVAL);
        };
        guard.reaped = true;

        join_bounded(stdin_writer);
        join_bounded(stdout_reader);
        join_bounded(stderr_reader);
        let stdout = snapshot(&stdout_buf);
        let stderr = snapshot(&stderr_buf);
        let elapsed = start.elapsed();

        if status.success() {
            debug!(%args, ?elapsed, "hg finished");
            Ok(CommandOutput {
                stdout,
                stderr,
                elapsed,
            })
        } else {
            debug!(%args, code = ?status.code(), ?elapsed, "hg failed");
            Err(classify_exit(
                &self.policy,
                command,
                status.code(),
                stdout,
                stderr,
            ))
        }
    }
}

/// Kills and reaps the child unless it already exited.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn kill(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = kill_process_group(&self.child) {
            debug!(error = %e, "failed to kill process group");
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) -> io::Result<()> {
    // The child was spawned with process_group(0), so its pid is the pgid.
    let pgid = child.id() as libc::pid_t;
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_process_group(_: &Child) -> io::Result<()> {
    Ok(())
}

fn spawn_reader<R>(mut pipe: R, buf: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => match buf.lock() {
                    Ok(mut out) => out.extend_from_slice(&chunk[..n]),
                    Err(_) => break,
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    })
}

fn spawn_writer<W>(mut pipe: W, bytes: Vec<u8>) -> JoinHandle<()>
where
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        if let Err(e) = pipe.write_all(&bytes) {
            if e.kind() != io::ErrorKind::BrokenPipe {
                debug!(error = %e, "failed writing hg stdin");
            }
        }
        // Dropping the pipe closes stdin.
    })
}

fn join_bounded(handle: Option<JoinHandle<()>>) {
    let Some(handle) = handle else {
        return;
    };
    let start = Instant::now();
    while !handle.is_finished() {
        if start.elapsed() >= DRAIN_TIMEOUT {
            debug!("output pipe still open after drain timeout, detaching reader");
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }
    let _ = handle.join();
}

fn snapshot(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    match buf.lock() {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
    }
}
