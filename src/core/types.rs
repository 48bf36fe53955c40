//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`Revision`] - Mercurial changeset id (40-char hex node)
//! - [`PatchDigest`] - SHA-256 of raw patch bytes, used for log correlation
//! - [`SessionId`] - Unique id for one working copy session
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented.
//!
//! # Examples
//!
//! ```
//! use hgland::core::types::Revision;
//!
//! let rev = Revision::new("abc123def4567890abc123def4567890abc12345").unwrap();
//! assert_eq!(rev.short(12), "abc123def456");
//!
//! assert!(Revision::new("not-a-node").is_err());
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid revision: {0}")]
    InvalidRevision(String),
}

/// A validated Mercurial changeset id.
///
/// Always the full 40-character hexadecimal node, normalized to lowercase.
/// Short hashes are display-only (see [`Revision::short`]).
///
/// # Example
///
/// ```
/// use hgland::core::types::Revision;
///
/// let rev = Revision::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(rev.as_str(), "abc123def4567890abc123def4567890abc12345");
/// assert!(!rev.is_null());
/// assert!(Revision::null().is_null());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision(String);

impl Revision {
    /// The null revision (parent of the first commit).
    const NULL_NODE: &'static str = "0000000000000000000000000000000000000000";

    /// Create a new validated revision.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRevision` if the string is not a 40-char hex node.
    pub fn new(node: impl Into<String>) -> Result<Self, TypeError> {
        let node = node.into().trim().to_ascii_lowercase();
        Self::validate(&node)?;
        Ok(Self(node))
    }

    /// The null revision. An empty repository has this as its working parent.
    pub fn null() -> Self {
        Self(Self::NULL_NODE.to_string())
    }

    /// Check if this is the null revision.
    pub fn is_null(&self) -> bool {
        self.0.chars().all(|c| c == '0')
    }

    /// Abbreviated form of the node.
    ///
    /// Returns the first `len` characters, or the full node if `len` is larger.
    pub fn short(&self, len: usize) -> &str {
        let end = len.min(self.0.len());
        &self.0[..end]
    }

    fn validate(node: &str) -> Result<(), TypeError> {
        if node.len() != 40 {
            return Err(TypeError::InvalidRevision(format!(
                "expected 40 hex characters, got {}",
                node.len()
            )));
        }
        if !node.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidRevision(
                "revision must be hexadecimal".into(),
            ));
        }
        Ok(())
    }

    /// Get the revision as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Revision {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Revision> for String {
    fn from(rev: Revision) -> Self {
        rev.0
    }
}

impl AsRef<str> for Revision {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 digest of a raw patch.
///
/// Two identical patches always share a digest, which lets operators
/// correlate repeated attempts of the same bytes across log lines.
///
/// # Example
///
/// ```
/// use hgland::core::types::PatchDigest;
///
/// let a = PatchDigest::compute(b"diff --git a/x b/x\n");
/// let b = PatchDigest::compute(b"diff --git a/x b/x\n");
/// assert_eq!(a, b);
/// assert_eq!(a.as_str().len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchDigest(String);

impl PatchDigest {
    /// Compute the digest of the given bytes.
    pub fn compute(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Get the digest as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl std::fmt::Display for PatchDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a working copy session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Generate a new random session id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
