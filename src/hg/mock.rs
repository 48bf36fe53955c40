//! hg::mock
//!
//! Scripted runner for deterministic testing.
//!
//! # Design
//!
//! [`ScriptedRunner`] implements [`HgRunner`] without spawning anything.
//! Replies are registered against argument prefixes; a call is answered by
//! the rule with the longest matching prefix. Each rule holds a queue of
//! replies consumed in order, and its last reply repeats forever. Calls
//! with no matching rule succeed with empty output.
//!
//! Failed replies go through the same classification as the real runner,
//! so conflict detection is exercised end to end.
//!
//! # Example
//!
//! ```
//! use hgland::hg::mock::{Reply, ScriptedRunner};
//! use hgland::hg::{HgCommand, HgRunner};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let runner = ScriptedRunner::new();
//! runner.on(&["log", "-r", "."], Reply::ok("first"));
//! runner.on(&["log", "-r", "."], Reply::ok("second"));
//!
//! let cmd = HgCommand::new(["log", "-r", ".", "-T", "{node}"], Duration::from_secs(1));
//! let cwd = Path::new("/repo");
//! assert_eq!(runner.run(cwd, &cmd).unwrap().stdout, "first");
//! assert_eq!(runner.run(cwd, &cmd).unwrap().stdout, "second");
//! assert_eq!(runner.run(cwd, &cmd).unwrap().stdout, "second");
//! assert_eq!(runner.count(&["log"]), 3);
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::classify::FailurePolicy;
use super::runner::{classify_exit, CommandOutput, HgCommand, HgError, HgRunner};

/// A canned response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Exit 0 with this stdout.
    Ok(String),
    /// Nonzero exit with this output.
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Miss the deadline.
    Timeout { stderr: String },
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Reply::Ok(stdout.into())
    }

    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        Reply::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn timeout() -> Self {
        Reply::Timeout {
            stderr: String::new(),
        }
    }
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
}

#[derive(Debug)]
struct Rule {
    prefix: Vec<String>,
    replies: VecDeque<Reply>,
}

#[derive(Debug, Default)]
struct Inner {
    rules: Vec<Rule>,
    calls: Vec<RecordedCall>,
}

/// Runner that answers from a script and records every call.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct ScriptedRunner {
    inner: Arc<Mutex<Inner>>,
    policy: FailurePolicy,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRunner {
    /// Create a runner with the default classification table.
    pub fn new() -> Self {
        Self::with_policy(FailurePolicy::default())
    }

    /// Create a runner with a specific classification table.
    pub fn with_policy(policy: FailurePolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            policy,
        }
    }

    /// Queue `reply` for commands starting with `prefix`.
    pub fn on(&self, prefix: &[&str], reply: Reply) -> &Self {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let prefix: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        match inner.rules.iter_mut().find(|r| r.prefix == prefix) {
            Some(rule) => rule.replies.push_back(reply),
            None => inner.rules.push(Rule {
                prefix,
                replies: VecDeque::from([reply]),
            }),
        }
        self
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.lock().expect("lock poisoned").calls.clone()
    }

    /// Number of calls whose arguments start with `prefix`.
    pub fn count(&self, prefix: &[&str]) -> usize {
        self.inner
            .lock()
            .expect("lock poisoned")
            .calls
            .iter()
            .filter(|c| starts_with(&c.args, prefix))
            .count()
    }

    fn next_reply(&self, command: &HgCommand) -> Reply {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.calls.push(RecordedCall {
            args: command.args.clone(),
            stdin: command.stdin.clone(),
            timeout: command.timeout,
        });

        let rule = inner
            .rules
            .iter_mut()
            .filter(|r| {
                let prefix: Vec<&str> = r.prefix.iter().map(String::as_str).collect();
                starts_with(&command.args, &prefix)
            })
            .max_by_key(|r| r.prefix.len());

        match rule {
            Some(rule) if rule.replies.len() > 1 => rule
                .replies
                .pop_front()
                .unwrap_or_else(|| Reply::ok("")),
            Some(rule) => rule.replies.front().cloned().unwrap_or_else(|| Reply::ok("")),
            None => Reply::ok(""),
        }
    }
}

fn starts_with(args: &[String], prefix: &[&str]) -> bool {
    args.len() >= prefix.len() && args.iter().zip(prefix).all(|(a, p)| a == p)
}

impl HgRunner for ScriptedRunner {
    fn run(&self, _cwd: &Path, command: &HgCommand) -> Result<CommandOutput, HgError> {
        match self.next_reply(command) {
            Reply::Ok(stdout) => Ok(CommandOutput {
                stdout,
                ..Default::default()
            }),
            Reply::Exit {
                code,
                stdout,
                stderr,
            } => Err(classify_exit(
                &self.policy,
                command,
                Some(code),
                stdout,
                stderr,
            )),
            Reply::Timeout { stderr } => Err(HgError::Timeout {
                args: command.display(),
                timeout: command.timeout,
                stderr,
            }),
        }
    }
}
