//! Batch configuration types.

use crate::error::BatchError;
use std::path::PathBuf;

/// Default number of names tried when staging a firmware buffer.
pub const DEFAULT_STAGING_ATTEMPTS: u32 = 16;

/// Configuration for building and running a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Directory where in-memory firmware is staged (default: platform temp dir).
    pub staging_dir: PathBuf,
    /// Unique names tried before staging gives up (default: 16).
    pub staging_attempts: u32,
    /// Fail the run when a task-begin event carries an operation id that
    /// disagrees with the tracked index, instead of only logging it.
    pub verify_operation_ids: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir(),
            staging_attempts: DEFAULT_STAGING_ATTEMPTS,
            verify_operation_ids: false,
        }
    }
}

impl BatchConfig {
    /// Create a new config builder.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `FWBATCH_STAGING_DIR` | platform temp dir |
    /// | `FWBATCH_STAGING_ATTEMPTS` | `16` |
    /// | `FWBATCH_VERIFY_OPERATION_IDS` | `false` |
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            staging_dir: std::env::var("FWBATCH_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),
            staging_attempts: std::env::var("FWBATCH_STAGING_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.staging_attempts),
            verify_operation_ids: std::env::var("FWBATCH_VERIFY_OPERATION_IDS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(default.verify_operation_ids),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.staging_dir.as_os_str().is_empty() {
            return Err(BatchError::InvalidConfig("staging_dir is required".into()));
        }
        if self.staging_attempts == 0 {
            return Err(BatchError::InvalidConfig(
                "staging_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for BatchConfig.
#[derive(Debug, Default)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    /// Set the staging directory.
    pub fn staging_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = path.into();
        self
    }

    /// Set the number of staging name attempts.
    pub fn staging_attempts(mut self, attempts: u32) -> Self {
        self.config.staging_attempts = attempts;
        self
    }

    /// Enable or disable strict operation id checking.
    pub fn verify_operation_ids(mut self, verify: bool) -> Self {
        self.config.verify_operation_ids = verify;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
