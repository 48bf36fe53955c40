//! engine::report
//!
//! A flat, serializable summary of one landing attempt.
//!
//! The caller that owns the landing record stores `result` (the new
//! revision) on success and `error` (a human-readable message) otherwise;
//! `status` tells it which of its retry paths to take.

use serde::Serialize;

use super::apply::{Applied, ApplyError, ErrorKind, Strategy};
use crate::core::types::{PatchDigest, Revision, SessionId};
use crate::hg::ConflictReport;

/// Final state of a landing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LandingStatus {
    Landed,
    Structural,
    PatchConflict,
    HgCommand,
}

impl From<ErrorKind> for LandingStatus {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Structural => LandingStatus::Structural,
            ErrorKind::PatchConflict => LandingStatus::PatchConflict,
            ErrorKind::HgCommand => LandingStatus::HgCommand,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LandingReport {
    pub status: LandingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_sha256: Option<PatchDigest>,
    /// The landed revision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Revision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictReport>,
    /// Captured hg output for operators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    /// Restoring the working copy after the attempt failed. The outcome
    /// above still stands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
}

impl LandingReport {
    pub fn landed(applied: &Applied) -> Self {
        Self {
            status: LandingStatus::Landed,
            session_id: None,
            patch_sha256: Some(applied.digest.clone()),
            result: Some(applied.revision.clone()),
            strategy: Some(applied.strategy),
            error: None,
            conflict: None,
            diagnostics: None,
            cleanup_error: None,
        }
    }

    pub fn failed(err: &ApplyError, digest: Option<PatchDigest>) -> Self {
        let conflict = match err {
            ApplyError::PatchConflict(report) => Some(report.clone()),
            _ => None,
        };
        // A conflict report already carries the output.
        let diagnostics = if conflict.is_some() {
            None
        } else {
            err.diagnostics().map(|d| d.trim().to_string())
        };
        Self {
            status: err.kind().into(),
            session_id: None,
            patch_sha256: digest,
            result: None,
            strategy: None,
            error: Some(err.to_string()),
            conflict,
            diagnostics,
            cleanup_error: None,
        }
    }

    pub fn from_result(result: &Result<Applied, ApplyError>, digest: Option<PatchDigest>) -> Self {
        match result {
            Ok(applied) => Self::landed(applied),
            Err(err) => Self::failed(err, digest),
        }
    }

    pub fn with_session(mut self, id: SessionId) -> Self {
        self.session_id = Some(id);
        self
    }

    /// Record that closing the session failed after the attempt.
    pub fn with_cleanup_error(mut self, err: &impl std::fmt::Display) -> Self {
        self.cleanup_error = Some(err.to_string());
        self
    }

    pub fn is_landed(&self) -> bool {
        self.status == LandingStatus::Landed
    }
}
