//! core::config::schema
//!
//! Configuration schema types.
//!
//! Global and repository config files share one schema; every field is
//! optional so a repository file only needs to name what it overrides.
//!
//! # Example
//!
//! ```toml
//! [hg]
//! binary = "/usr/bin/hg"
//! command_timeout_secs = 60
//! import_timeout_secs = 300
//! similarity = 95
//! fallback_patch_tool = "patch -r - --no-backup-if-mismatch"
//!
//! [session]
//! base_revision = "central"
//! pull_on_enter = true
//! strip_drafts_on_enter = true
//! lock_policy = "wait"
//! lock_wait_secs = 30
//!
//! [classify]
//! conflict_patterns = ["hunk FAILED", "hunks FAILED"]
//! fallback_patterns = []
//! ```
//!
//! # Validation
//!
//! Values are validated after parsing; see [`ConfigFile::validate`].

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// One configuration file (global or repository scope).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Mercurial invocation settings.
    pub hg: Option<HgSection>,

    /// Working copy session settings.
    pub session: Option<SessionSection>,

    /// Failure classification policy table.
    pub classify: Option<ClassifySection>,
}

impl ConfigFile {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(hg) = &self.hg {
            hg.validate()?;
        }
        if let Some(session) = &self.session {
            session.validate()?;
        }
        if let Some(classify) = &self.classify {
            classify.validate()?;
        }
        Ok(())
    }
}

/// `[hg]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HgSection {
    /// Path or name of the hg executable.
    pub binary: Option<String>,

    /// Timeout for ordinary commands (status, update, commit...).
    pub command_timeout_secs: Option<u64>,

    /// Timeout for `hg import`, which may rewrite many files.
    pub import_timeout_secs: Option<u64>,

    /// Timeout for `hg pull`.
    pub pull_timeout_secs: Option<u64>,

    /// Rename detection threshold passed to `hg import --similarity`.
    pub similarity: Option<u8>,

    /// External patch tool used by the fallback strategy (`ui.patch`).
    pub fallback_patch_tool: Option<String>,
}

impl HgSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(binary) = &self.binary {
            if binary.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "hg.binary cannot be empty".to_string(),
                ));
            }
        }
        for (name, value) in [
            ("hg.command_timeout_secs", self.command_timeout_secs),
            ("hg.import_timeout_secs", self.import_timeout_secs),
            ("hg.pull_timeout_secs", self.pull_timeout_secs),
        ] {
            if value == Some(0) {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if let Some(similarity) = self.similarity {
            if similarity > 100 {
                return Err(ConfigError::InvalidValue(format!(
                    "hg.similarity must be between 0 and 100, got {}",
                    similarity
                )));
            }
        }
        if let Some(tool) = &self.fallback_patch_tool {
            if tool.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "hg.fallback_patch_tool cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// `[session]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    /// Revision the working copy is updated to on entry.
    pub base_revision: Option<String>,

    /// Pull from the default path before updating.
    pub pull_on_enter: Option<bool>,

    /// Strip draft (unpublished) commits left by earlier sessions.
    pub strip_drafts_on_enter: Option<bool>,

    /// "fail_fast" or "wait".
    pub lock_policy: Option<String>,

    /// How long the "wait" policy waits for the lock.
    pub lock_wait_secs: Option<u64>,
}

impl SessionSection {
    /// Valid lock policies.
    pub const VALID_LOCK_POLICIES: &'static [&'static str] = &["fail_fast", "wait"];

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(base) = &self.base_revision {
            if base.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "session.base_revision cannot be empty".to_string(),
                ));
            }
        }
        if let Some(policy) = &self.lock_policy {
            if !Self::VALID_LOCK_POLICIES.contains(&policy.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "invalid session.lock_policy '{}', must be one of: {}",
                    policy,
                    Self::VALID_LOCK_POLICIES.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// `[classify]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifySection {
    /// Output substrings that mark a content conflict.
    pub conflict_patterns: Option<Vec<String>>,

    /// Output substrings that allow the fallback strategy. Empty means any
    /// non-conflict failure of the fast import falls back.
    pub fallback_patterns: Option<Vec<String>>,
}

impl ClassifySection {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(patterns) = &self.conflict_patterns {
            if patterns.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "classify.conflict_patterns cannot be empty".to_string(),
                ));
            }
        }
        let all = self
            .conflict_patterns
            .iter()
            .chain(self.fallback_patterns.iter())
            .flatten();
        for pattern in all {
            if pattern.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "classify patterns cannot be blank".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_parses() {
        let file: ConfigFile = toml::from_str("").unwrap();
        assert_eq!(file, ConfigFile::default());
        assert!(file.validate().is_ok());
    }

    #[test]
    fn full_file_parses() {
        let file: ConfigFile = toml::from_str(
            r#"
            [hg]
            binary = "/opt/hg/bin/hg"
            command_timeout_secs = 10
            similarity = 90

            [session]
            base_revision = "central"
            lock_policy = "wait"
            lock_wait_secs = 5

            [classify]
            fallback_patterns = ["malformed patch"]
            "#,
        )
        .unwrap();
        assert!(file.validate().is_ok());
        assert_eq!(file.hg.unwrap().similarity, Some(90));
        assert_eq!(
            file.session.unwrap().base_revision.as_deref(),
            Some("central")
        );
    }

    #[test]
    fn unknown_section_rejected() {
        let result: Result<ConfigFile, _> = toml::from_str("[forge]\nkind = \"github\"");
        assert!(result.is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let file = ConfigFile {
            hg: Some(HgSection {
                import_timeout_secs: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(file.validate().is_err());
    }

    #[test]
    fn similarity_over_100_rejected() {
        let file = ConfigFile {
            hg: Some(HgSection {
                similarity: Some(101),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(file.validate().is_err());
    }

    #[test]
    fn invalid_lock_policy_rejected() {
        let file = ConfigFile {
            session: Some(SessionSection {
                lock_policy: Some("spin".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = file.validate().unwrap_err();
        assert!(err.to_string().contains("fail_fast"));
    }

    #[test]
    fn empty_conflict_table_rejected() {
        let file = ConfigFile {
            classify: Some(ClassifySection {
                conflict_patterns: Some(vec![]),
                fallback_patterns: None,
            }),
            ..Default::default()
        };
        assert!(file.validate().is_err());
    }

    #[test]
    fn blank_fallback_pattern_rejected() {
        let file = ConfigFile {
            classify: Some(ClassifySection {
                conflict_patterns: None,
                fallback_patterns: Some(vec!["  ".to_string()]),
            }),
            ..Default::default()
        };
        assert!(file.validate().is_err());
    }
}
