//! core::patch
//!
//! Patch metadata parsing.
//!
//! # Format
//!
//! Patches arrive in the "HG changeset patch" export format: a block of
//! `#`-prefixed header lines, a free-text commit message, and the diff
//! payload. Because a commit message may itself contain diff-shaped text,
//! the payload start is never guessed. The patch must carry an explicit
//! directive naming the 1-based line where the diff begins:
//!
//! ```text
//! # HG changeset patch
//! # User Test User <test@example.com>
//! # Date 0 0
//! #      Thu Jan 01 00:00:00 1970 +0000
//! # Diff Start Line 7
//! add another file.
//! diff --git a/test.txt b/test.txt
//! ...
//! ```
//!
//! # Invariants
//!
//! - Parsing is pure: no I/O, no repository access
//! - A patch without `Diff Start Line` is always rejected with
//!   [`PatchError::NoDiffStartLine`], before any other validation
//! - The diff payload is the exact byte suffix of the input starting at the
//!   directive's line, unterminated last line included

use std::io::Read;
use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, TimeZone};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::core::types::PatchDigest;

/// Structural problems that make a patch unusable regardless of target content.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchError {
    /// The patch does not say where its diff begins.
    #[error("patch is missing the 'Diff Start Line' header")]
    NoDiffStartLine,

    /// The directive exists but does not point at a usable line.
    #[error("invalid 'Diff Start Line' value '{value}': {reason}")]
    InvalidDiffStartLine { value: String, reason: String },

    /// A header required for attribution is missing.
    #[error("patch is missing the '{header}' header")]
    MissingHeader { header: &'static str },

    /// Nothing between the header block and the diff.
    #[error("patch has an empty commit message")]
    EmptyCommitMessage,
}

/// Commit attribution taken from the patch headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribution {
    /// Value of `# User`, e.g. `Test User <test@example.com>`.
    pub user: String,
    /// Value of `# Date`, passed to hg verbatim (usually `<unixtime> <offset>`).
    pub date: String,
}

impl Attribution {
    /// Interpret the date in hg's internal `<unixtime> <offset>` form.
    ///
    /// The offset is seconds *west* of UTC, so `-3600` means UTC+01:00.
    /// Returns `None` for any other date format; hg still accepts those.
    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        let mut parts = self.date.split_whitespace();
        let secs: i64 = parts.next()?.parse().ok()?;
        let offset: i32 = parts.next().unwrap_or("0").parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        let tz = FixedOffset::west_opt(offset)?;
        tz.timestamp_opt(secs, 0).single()
    }
}

/// A patch after successful metadata parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedPatch {
    /// Author and date.
    pub attribution: Attribution,
    /// Commit message with trailing whitespace removed.
    pub message: String,
    /// 1-based line where the diff payload starts.
    pub diff_start_line: usize,
    /// Number of leading `#` header lines.
    pub header_lines: usize,
    /// `# Node ID` header, if present.
    pub node_id: Option<String>,
    /// `# Parent` header, if present.
    pub parent: Option<String>,
    /// `# Branch` header, if present.
    pub branch: Option<String>,
    /// The diff payload.
    #[serde(skip)]
    pub diff: Vec<u8>,
}

/// Raw patch bytes. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    bytes: Vec<u8>,
}

impl Patch {
    /// Wrap raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Read a whole patch from a stream.
    pub fn read_from(mut reader: impl Read) -> std::io::Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Self { bytes })
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 of the raw bytes.
    pub fn digest(&self) -> PatchDigest {
        PatchDigest::compute(&self.bytes)
    }

    /// Parse headers, commit message, and diff payload.
    ///
    /// # Errors
    ///
    /// Returns a [`PatchError`] describing the first structural problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use hgland::core::patch::{Patch, PatchError};
    ///
    /// let patch = Patch::new(&b"# HG changeset patch\n# User a <a@b>\n# Date 0 0\nmsg\ndiff\n"[..]);
    /// assert_eq!(patch.parse(), Err(PatchError::NoDiffStartLine));
    /// ```
    pub fn parse(&self) -> Result<ParsedPatch, PatchError> {
        parse(&self.bytes)
    }
}

/// Known header keys, in the order they usually appear.
const HEADER_KEYS: &[&str] = &[
    "User",
    "Date",
    "Node ID",
    "Parent",
    "Branch",
    "Diff Start Line",
];

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let keys = HEADER_KEYS
            .iter()
            .map(|k| regex::escape(k).replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(r"(?i)^#\s+({keys})\s+(.*?)\s*$");
        Regex::new(&pattern).expect("header pattern is valid")
    })
}

#[derive(Debug, Default)]
struct Headers {
    user: Option<String>,
    date: Option<String>,
    node_id: Option<String>,
    parent: Option<String>,
    branch: Option<String>,
    diff_start_line: Option<String>,
}

impl Headers {
    fn set(&mut self, key: &str, value: String) {
        let key = key.split_whitespace().collect::<Vec<_>>().join(" ");
        let slot = match key.to_ascii_lowercase().as_str() {
            "user" => &mut self.user,
            "date" => &mut self.date,
            "node id" => &mut self.node_id,
            "parent" => &mut self.parent,
            "branch" => &mut self.branch,
            "diff start line" => &mut self.diff_start_line,
            _ => return,
        };
        // Later headers override earlier ones.
        *slot = Some(value);
    }
}

fn parse(bytes: &[u8]) -> Result<ParsedPatch, PatchError> {
    let lines: Vec<&[u8]> = bytes.split_inclusive(|b| *b == b'\n').collect();

    let mut headers = Headers::default();
    let mut header_lines = 0;
    for line in &lines {
        if !line.starts_with(b"#") {
            break;
        }
        header_lines += 1;
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\r', '\n']);
        if let Some(caps) = header_regex().captures(text) {
            headers.set(&caps[1], caps[2].to_string());
        }
    }

    let raw_start = headers
        .diff_start_line
        .take()
        .ok_or(PatchError::NoDiffStartLine)?;
    let diff_start_line = validate_start_line(&raw_start, header_lines, lines.len())?;

    let user = non_empty(headers.user).ok_or(PatchError::MissingHeader { header: "User" })?;
    let date = non_empty(headers.date).ok_or(PatchError::MissingHeader { header: "Date" })?;

    let message_lines = &lines[header_lines..diff_start_line - 1];
    let message = String::from_utf8_lossy(&message_lines.concat())
        .trim_end()
        .to_string();
    if message.trim().is_empty() {
        return Err(PatchError::EmptyCommitMessage);
    }

    let diff = lines[diff_start_line - 1..].concat();

    Ok(ParsedPatch {
        attribution: Attribution { user, date },
        message,
        diff_start_line,
        header_lines,
        node_id: headers.node_id,
        parent: headers.parent,
        branch: headers.branch,
        diff,
    })
}

fn validate_start_line(raw: &str, header_lines: usize, total: usize) -> Result<usize, PatchError> {
    let invalid = |reason: String| PatchError::InvalidDiffStartLine {
        value: raw.to_string(),
        reason,
    };
    let line: usize = raw
        .parse()
        .map_err(|_| invalid("not a positive integer".into()))?;
    if line <= header_lines {
        return Err(invalid(format!(
            "line {} is inside the {}-line header block",
            line, header_lines
        )));
    }
    if line > total {
        return Err(invalid(format!("patch has only {} lines", total)));
    }
    Ok(line)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NORMAL: &str = "\
# HG changeset patch
# User Test User <test@example.com>
# Date 0 0
#      Thu Jan 01 00:00:00 1970 +0000
# Diff Start Line 7
add another file.
diff --git a/test.txt b/test.txt
--- a/test.txt
+++ b/test.txt
@@ -1,1 +1,2 @@
 TEST
+adding another line";

    fn parse_str(s: &str) -> Result<ParsedPatch, PatchError> {
        Patch::new(s.as_bytes()).parse()
    }

    #[test]
    fn parses_attribution_and_message() {
        let parsed = parse_str(NORMAL).unwrap();
        assert_eq!(parsed.attribution.user, "Test User <test@example.com>");
        assert_eq!(parsed.attribution.date, "0 0");
        assert_eq!(parsed.message, "add another file.");
        assert_eq!(parsed.header_lines, 5);
        assert_eq!(parsed.diff_start_line, 7);
    }

    #[test]
    fn diff_is_exact_suffix() {
        let parsed = parse_str(NORMAL).unwrap();
        let diff = String::from_utf8(parsed.diff).unwrap();
        assert!(diff.starts_with("diff --git a/test.txt b/test.txt\n"));
        assert!(diff.ends_with("+adding another line"));
        assert!(!diff.contains("add another file."));
        assert!(NORMAL.ends_with(&diff));
    }

    #[test]
    fn missing_newline_marker_is_kept_verbatim() {
        let patch = "\
# HG changeset patch
# User Test User <test@example.com>
# Date 0 0
# Diff Start Line 6
file added
diff --git a/test-newline-file b/test-newline-file
new file mode 100644
--- /dev/null
+++ b/test-newline-file
@@ -0,0 +1,1 @@
+hello
\\ No newline at end of file";
        let parsed = parse_str(patch).unwrap();
        assert!(parsed.diff.ends_with(b"+hello\n\\ No newline at end of file"));
    }

    #[test]
    fn missing_start_line_is_rejected() {
        let patch = NORMAL.replace("# Diff Start Line 7\n", "");
        assert_eq!(parse_str(&patch), Err(PatchError::NoDiffStartLine));
    }

    #[test]
    fn missing_start_line_wins_over_missing_user() {
        let patch = "# HG changeset patch\nmessage\ndiff --git a/x b/x\n";
        assert_eq!(parse_str(patch), Err(PatchError::NoDiffStartLine));
    }

    #[test]
    fn empty_input_has_no_start_line() {
        assert_eq!(parse_str(""), Err(PatchError::NoDiffStartLine));
    }

    #[test]
    fn diff_shaped_commit_message_is_kept_in_message() {
        let patch = "\
# HG changeset patch
# User Test User <test@example.com>
# Date 0 0
# Diff Start Line 8
Fix the thing

diff --git a/fake b/fake
diff --git a/real.txt b/real.txt
--- a/real.txt
+++ b/real.txt
";
        let parsed = parse_str(patch).unwrap();
        assert_eq!(parsed.message, "Fix the thing\n\ndiff --git a/fake b/fake");
        assert!(parsed.diff.starts_with(b"diff --git a/real.txt"));
    }

    #[test]
    fn header_keys_are_case_insensitive() {
        let patch = NORMAL
            .replace("# User", "# user")
            .replace("# Diff Start Line", "# diff start line");
        let parsed = parse_str(&patch).unwrap();
        assert_eq!(parsed.attribution.user, "Test User <test@example.com>");
    }

    #[test]
    fn optional_headers_are_captured() {
        let patch = "\
# HG changeset patch
# User u <u@x>
# Date 1500000000 -3600
# Node ID 0123456789abcdef0123456789abcdef01234567
# Parent  fedcba9876543210fedcba9876543210fedcba98
# Branch default
# Diff Start Line 9
msg
diff --git a/a b/a
";
        let parsed = parse_str(patch).unwrap();
        assert_eq!(
            parsed.node_id.as_deref(),
            Some("0123456789abcdef0123456789abcdef01234567")
        );
        assert_eq!(
            parsed.parent.as_deref(),
            Some("fedcba9876543210fedcba9876543210fedcba98")
        );
        assert_eq!(parsed.branch.as_deref(), Some("default"));
    }

    #[test]
    fn non_numeric_start_line_is_invalid() {
        let patch = NORMAL.replace("# Diff Start Line 7", "# Diff Start Line seven");
        assert!(matches!(
            parse_str(&patch),
            Err(PatchError::InvalidDiffStartLine { .. })
        ));
    }

    #[test]
    fn start_line_inside_header_is_invalid() {
        let patch = NORMAL.replace("# Diff Start Line 7", "# Diff Start Line 3");
        assert!(matches!(
            parse_str(&patch),
            Err(PatchError::InvalidDiffStartLine { .. })
        ));
    }

    #[test]
    fn start_line_past_end_is_invalid() {
        let patch = NORMAL.replace("# Diff Start Line 7", "# Diff Start Line 99");
        assert!(matches!(
            parse_str(&patch),
            Err(PatchError::InvalidDiffStartLine { .. })
        ));
    }

    #[test]
    fn invalid_start_line_serializes_value_and_reason() {
        let err = parse_str(&NORMAL.replace("# Diff Start Line 7", "# Diff Start Line 99"))
            .unwrap_err();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "invalid_diff_start_line");
        assert_eq!(json["value"], "99");
        assert!(!json["reason"].as_str().unwrap().is_empty());
    }

    #[test]
    fn missing_user_is_rejected() {
        let patch = NORMAL.replace("# User Test User <test@example.com>\n", "");
        let patch = patch.replace("# Diff Start Line 7", "# Diff Start Line 6");
        assert_eq!(
            parse_str(&patch),
            Err(PatchError::MissingHeader { header: "User" })
        );
    }

    #[test]
    fn missing_date_is_rejected() {
        let patch = NORMAL.replace("# Date 0 0\n", "");
        let patch = patch.replace("# Diff Start Line 7", "# Diff Start Line 6");
        assert_eq!(
            parse_str(&patch),
            Err(PatchError::MissingHeader { header: "Date" })
        );
    }

    #[test]
    fn empty_message_is_rejected() {
        let patch = NORMAL
            .replace("add another file.\n", "")
            .replace("# Diff Start Line 7", "# Diff Start Line 6");
        assert_eq!(parse_str(&patch), Err(PatchError::EmptyCommitMessage));
    }

    #[test]
    fn crlf_headers_parse() {
        let patch = NORMAL.replace('\n', "\r\n");
        let parsed = parse_str(&patch).unwrap();
        assert_eq!(parsed.attribution.date, "0 0");
        assert_eq!(parsed.diff_start_line, 7);
    }

    #[test]
    fn timestamp_uses_west_offset() {
        let attribution = Attribution {
            user: "u".into(),
            date: "1500000000 -3600".into(),
        };
        let ts = attribution.timestamp().unwrap();
        assert_eq!(ts.offset().local_minus_utc(), 3600);
        assert_eq!(ts.timestamp(), 1_500_000_000);
    }

    #[test]
    fn timestamp_is_none_for_free_form_dates() {
        let attribution = Attribution {
            user: "u".into(),
            date: "Thu Jan 01 00:00:00 1970 +0000".into(),
        };
        assert!(attribution.timestamp().is_none());
    }

    #[test]
    fn read_from_stream() {
        let patch = Patch::read_from(NORMAL.as_bytes()).unwrap();
        assert_eq!(patch.as_bytes(), NORMAL.as_bytes());
        assert_eq!(patch.digest(), PatchDigest::compute(NORMAL.as_bytes()));
    }
}
