//! core::paths
//!
//! Centralized path routing for hgland storage locations.
//!
//! # Storage Layout
//!
//! All hgland data for a working copy lives under `<root>/.hg/hgland/`:
//! - `config.toml` - Repository configuration
//! - `lock` - Exclusive session lock file
//! - `tmp/` - Scratch files (commit messages, diffs) for one apply attempt
//!
//! Keeping everything inside `.hg/` means nothing hgland writes can ever
//! show up in `hg status` or be swept up by `hg purge`.
//!
//! The lock is scoped to the working copy, not the store: two shares of one
//! store are separate working copies and may be used concurrently.
//!
//! # Example
//!
//! ```
//! use hgland::core::paths::HgPaths;
//! use std::path::PathBuf;
//!
//! let paths = HgPaths::new(PathBuf::from("/repo"));
//!
//! assert_eq!(paths.lock_path(), PathBuf::from("/repo/.hg/hgland/lock"));
//! ```

use std::path::{Path, PathBuf};

/// Path routing for one working copy.
///
/// No code outside this module should compute `*.join(".hg")` paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HgPaths {
    /// Root of the working copy (the directory containing `.hg/`).
    pub root: PathBuf,
}

impl HgPaths {
    /// Create paths for the working copy rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The `.hg` directory.
    pub fn hg_dir(&self) -> PathBuf {
        self.root.join(".hg")
    }

    /// Whether `root` looks like a Mercurial working copy.
    pub fn is_working_copy(&self) -> bool {
        self.hg_dir().is_dir()
    }

    /// The hgland state directory, `<root>/.hg/hgland`.
    pub fn state_dir(&self) -> PathBuf {
        self.hg_dir().join("hgland")
    }

    /// Repository configuration, `<root>/.hg/hgland/config.toml`.
    pub fn repo_config_path(&self) -> PathBuf {
        self.state_dir().join("config.toml")
    }

    /// Session lock file, `<root>/.hg/hgland/lock`.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join("lock")
    }

    /// Scratch directory for per-attempt temporary files.
    pub fn tmp_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }

    /// Find the working copy containing `start`, searching upward.
    pub fn discover(start: &Path) -> Option<Self> {
        start
            .ancestors()
            .map(|dir| Self::new(dir.to_path_buf()))
            .find(HgPaths::is_working_copy)
    }

    /// Get the root as a Path reference.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the hgland directory structure exists.
    ///
    /// # Errors
    ///
    /// Returns an IO error if directory creation fails.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.state_dir())?;
        std::fs::create_dir_all(self.tmp_dir())?;
        Ok(())
    }
}
