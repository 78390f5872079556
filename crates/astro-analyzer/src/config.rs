//! Analyzer configuration
//!
//! Loaded from TOML; every field has a default so a partial file is fine:
//!
//! ```toml
//! max_passes = 3
//! command_timeout_secs = 600
//!
//! [programs]
//! do_bvri = "/usr/local/astro/bin/do_bvri"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level analyzer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Session directory handed to report builders; defaults to the store's
    pub base_directory: Option<PathBuf>,
    /// Maximum depth of target name propagation below a target set
    pub propagation_depth_limit: usize,
    /// Reconciliation passes one target may take in one resolve
    pub max_passes: usize,
    /// Kill commands running longer than this
    pub command_timeout_secs: Option<u64>,
    /// Extension of the companion file holding an image's matched catalogue
    pub catalogue_suffix: String,
    /// External program names
    pub programs: ProgramTable,
}

impl AnalyzerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the resolver cannot honour
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_passes == 0 {
            return Err(ConfigError::Invalid("max_passes must be at least 1".into()));
        }
        if self.catalogue_suffix.is_empty() {
            return Err(ConfigError::Invalid("catalogue_suffix must not be empty".into()));
        }
        if self.command_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "command_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// With base directory
    #[inline]
    #[must_use]
    pub fn with_base_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_directory = Some(dir.into());
        self
    }

    /// With propagation depth limit
    #[inline]
    #[must_use]
    pub fn with_depth_limit(mut self, limit: usize) -> Self {
        self.propagation_depth_limit = limit;
        self
    }

    /// With max passes
    #[inline]
    #[must_use]
    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes = passes;
        self
    }

    /// With command timeout
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = Some(secs);
        self
    }

    /// With program table
    #[inline]
    #[must_use]
    pub fn with_programs(mut self, programs: ProgramTable) -> Self {
        self.programs = programs;
        self
    }

    /// Per-command timeout, if any
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// Directory passed to report builders
    #[must_use]
    pub fn base_directory(&self) -> &Path {
        self.base_directory
            .as_deref()
            .unwrap_or_else(|| Path::new("."))
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            base_directory: None,
            propagation_depth_limit: 10,
            max_passes: 1,
            command_timeout_secs: None,
            catalogue_suffix: "stars".into(),
            programs: ProgramTable::default(),
        }
    }
}

/// Names (or paths) of the external programs the analyzer stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramTable {
    pub find_stars: String,
    pub star_match: String,
    pub stack: String,
    pub photometry: String,
    pub do_bvri: String,
    pub do_merge: String,
}

impl Default for ProgramTable {
    fn default() -> Self {
        Self {
            find_stars: "find_stars".into(),
            star_match: "star_match".into(),
            stack: "stack".into(),
            photometry: "photometry".into(),
            do_bvri: "do_bvri".into(),
            do_merge: "do_merge".into(),
        }
    }
}
