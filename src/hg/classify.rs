//! hg::classify
//!
//! Failure classification for hg command output.
//!
//! # Policy Table
//!
//! Whether a failed command means "the patch conflicts with the target" or
//! "something else went wrong" is decided by matching the command's output
//! against a [`FailurePolicy`]. The table is data, not code: hg and GNU
//! patch have changed their wording across releases, so deployments can
//! override the patterns in the `[classify]` config section after checking
//! them against the tool versions they actually run.
//!
//! Matching is plain, case-sensitive substring search over stdout and
//! stderr combined.
//!
//! # Conflict Reports
//!
//! When output is classified as a conflict, [`ConflictReport::from_output`]
//! extracts the affected paths and failed hunks from the two formats we see
//! in practice:
//!
//! ```text
//! unable to find 'not-real.txt' for patching
//! Hunk #1 FAILED at 0
//! 1 out of 1 hunks FAILED -- saving rejects to file not-real.txt.rej
//! abort: patch failed to apply
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Conflict markers emitted by hg's internal patcher and GNU patch.
pub const DEFAULT_CONFLICT_PATTERNS: &[&str] = &[
    "hunk FAILED",
    "hunks FAILED",
    "FAILED -- saving rejects",
    "unable to find '",
    "patch does not apply",
];

/// Classification table for failed commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Output substrings that mark a content conflict.
    pub conflict_patterns: Vec<String>,
    /// Output substrings that permit the fallback strategy after a failed
    /// fast import. Empty means every non-conflict failure qualifies.
    pub fallback_patterns: Vec<String>,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            conflict_patterns: DEFAULT_CONFLICT_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            fallback_patterns: Vec::new(),
        }
    }
}

impl FailurePolicy {
    /// Whether the output carries a content-conflict signature.
    pub fn is_conflict(&self, stdout: &str, stderr: &str) -> bool {
        matches_any(&self.conflict_patterns, stdout, stderr)
    }

    /// Whether a non-conflict fast-import failure may be retried with the
    /// fallback strategy.
    pub fn allows_fallback(&self, stdout: &str, stderr: &str) -> bool {
        self.fallback_patterns.is_empty() || matches_any(&self.fallback_patterns, stdout, stderr)
    }
}

fn matches_any(patterns: &[String], stdout: &str, stderr: &str) -> bool {
    patterns
        .iter()
        .any(|p| stderr.contains(p.as_str()) || stdout.contains(p.as_str()))
}

/// One hunk that failed to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HunkFailure {
    /// File the hunk belongs to, when the output names it.
    pub path: Option<String>,
    /// 1-based hunk number within the file.
    pub hunk: u32,
    /// Line the patcher tried, when reported.
    pub line: Option<u64>,
}

/// Structured description of a content conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ConflictReport {
    /// Files that could not be patched, in first-seen order, deduplicated.
    pub paths: Vec<String>,
    /// Hunk-level detail, if the patcher reported it.
    pub hunks: Vec<HunkFailure>,
    /// The patcher's diagnostic output.
    pub details: String,
}

struct Patterns {
    rejects: Regex,
    missing: Regex,
    hunk: Regex,
    patching: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        rejects: Regex::new(r"saving rejects to file (.+?)\.rej\b").expect("valid regex"),
        missing: Regex::new(r"unable to find '([^']+)' for patching").expect("valid regex"),
        hunk: Regex::new(r"Hunk #(\d+) FAILED(?: at (\d+))?").expect("valid regex"),
        patching: Regex::new(r"^patching file (.+?)\s*$").expect("valid regex"),
    })
}

impl ConflictReport {
    /// Build a report from a failed command's output.
    ///
    /// Hunk lines are attributed to the most recent `patching file` line,
    /// or to the file named by the `saving rejects` summary that follows
    /// them.
    pub fn from_output(stdout: &str, stderr: &str) -> Self {
        let p = patterns();
        let mut report = ConflictReport {
            details: combined(stdout, stderr),
            ..Default::default()
        };

        let mut current: Option<String> = None;
        let mut pending: Vec<usize> = Vec::new();

        for line in stdout.lines().chain(stderr.lines()) {
            if let Some(caps) = p.patching.captures(line) {
                current = Some(caps[1].to_string());
                pending.clear();
            } else if let Some(caps) = p.missing.captures(line) {
                let path = caps[1].to_string();
                report.add_path(&path);
                current = Some(path);
                pending.clear();
            } else if let Some(caps) = p.hunk.captures(line) {
                let hunk = caps[1].parse().unwrap_or(0);
                let at = caps.get(2).and_then(|m| m.as_str().parse().ok());
                report.hunks.push(HunkFailure {
                    path: current.clone(),
                    hunk,
                    line: at,
                });
                if current.is_none() {
                    pending.push(report.hunks.len() - 1);
                }
            }

            if let Some(caps) = p.rejects.captures(line) {
                let path = caps[1].to_string();
                for idx in pending.drain(..) {
                    report.hunks[idx].path = Some(path.clone());
                }
                report.add_path(&path);
                current = None;
            }
        }

        report
    }

    fn add_path(&mut self, path: &str) {
        if !self.paths.iter().any(|p| p == path) {
            self.paths.push(path.to_string());
        }
    }

    /// Whether the report names at least one file.
    pub fn has_paths(&self) -> bool {
        !self.paths.is_empty()
    }
}

impl std::fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.paths.is_empty() {
            write!(f, "patch does not apply")
        } else {
            write!(f, "patch does not apply to {}", self.paths.join(", "))
        }
    }
}

fn combined(stdout: &str, stderr: &str) -> String {
    match (stdout.trim(), stderr.trim()) {
        ("", err) => err.to_string(),
        (out, "") => out.to_string(),
        (out, err) => format!("{}\n{}", out, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HG_MISSING_FILE: &str = "\
applying patch from stdin
unable to find 'not-real.txt' for patching
(use '--prefix' to apply patch relative to the current directory)
1 out of 1 hunks FAILED -- saving rejects to file not-real.txt.rej
abort: patch failed to apply
";

    const GNU_PATCH_DRIFT: &str = "\
patching file src/main.c
Hunk #2 FAILED at 41.
Hunk #3 FAILED at 77.
2 out of 3 hunks FAILED -- saving rejects to file src/main.c.rej
patching file README
";

    #[test]
    fn default_policy_detects_hg_conflict() {
        let policy = FailurePolicy::default();
        assert!(policy.is_conflict("", HG_MISSING_FILE));
    }

    #[test]
    fn default_policy_detects_conflict_on_stdout() {
        let policy = FailurePolicy::default();
        assert!(policy.is_conflict(GNU_PATCH_DRIFT, ""));
    }

    #[test]
    fn generic_failure_is_not_conflict() {
        let policy = FailurePolicy::default();
        assert!(!policy.is_conflict("", "abort: repository default not found!"));
    }

    #[test]
    fn empty_fallback_table_allows_everything() {
        let policy = FailurePolicy::default();
        assert!(policy.allows_fallback("", "abort: anything at all"));
    }

    #[test]
    fn fallback_table_restricts() {
        let policy = FailurePolicy {
            fallback_patterns: vec!["malformed patch".to_string()],
            ..Default::default()
        };
        assert!(policy.allows_fallback("", "abort: malformed patch at line 3"));
        assert!(!policy.allows_fallback("", "abort: no username supplied"));
    }

    #[test]
    fn report_from_missing_file() {
        let report = ConflictReport::from_output("", HG_MISSING_FILE);
        assert_eq!(report.paths, vec!["not-real.txt".to_string()]);
        assert!(report.details.contains("abort: patch failed to apply"));
        assert_eq!(report.to_string(), "patch does not apply to not-real.txt");
    }

    #[test]
    fn report_attributes_hunks_to_patching_file() {
        let report = ConflictReport::from_output(GNU_PATCH_DRIFT, "");
        assert_eq!(report.paths, vec!["src/main.c".to_string()]);
        assert_eq!(
            report.hunks,
            vec![
                HunkFailure {
                    path: Some("src/main.c".into()),
                    hunk: 2,
                    line: Some(41),
                },
                HunkFailure {
                    path: Some("src/main.c".into()),
                    hunk: 3,
                    line: Some(77),
                },
            ]
        );
    }

    #[test]
    fn report_attributes_pending_hunks_to_rejects_file() {
        let output = "Hunk #1 FAILED at 3\n1 out of 1 hunks FAILED -- saving rejects to file a/b.txt.rej\n";
        let report = ConflictReport::from_output("", output);
        assert_eq!(report.hunks.len(), 1);
        assert_eq!(report.hunks[0].path.as_deref(), Some("a/b.txt"));
        assert_eq!(report.paths, vec!["a/b.txt".to_string()]);
    }

    #[test]
    fn report_without_paths_displays_generically() {
        let report = ConflictReport::from_output("", "patch does not apply");
        assert!(!report.has_paths());
        assert_eq!(report.to_string(), "patch does not apply");
    }

    #[test]
    fn paths_are_deduplicated() {
        let output = "\
unable to find 'x.txt' for patching
1 out of 1 hunks FAILED -- saving rejects to file x.txt.rej
";
        let report = ConflictReport::from_output("", output);
        assert_eq!(report.paths, vec!["x.txt".to_string()]);
    }
}
