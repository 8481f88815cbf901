//! Corpus configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it changes:
//!
//! ```json
//! { "name": "buckeye", "loader": { "batch_size": 5000, "skip_existing": true } }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::BackendConfig;
use crate::{Error, Result};

/// Top-level configuration for one corpus session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Corpus name; also the label every node of the corpus carries.
    pub name: String,
    /// Optional file mirror of the schema snapshot.
    pub schema_path: Option<PathBuf>,
    pub backend: BackendConfig,
    pub staging: StagingConfig,
    pub loader: LoaderConfig,
}

/// Staging buffer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Tracks longer than this get a sparse checkpoint index.
    pub sparse_threshold: usize,
    /// Tokens between checkpoints.
    pub checkpoint_stride: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self { sparse_threshold: 512, checkpoint_stride: 32 }
    }
}

/// Bulk loader tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum rows per bulk statement.
    pub batch_size: usize,
    /// Decimal places times are rounded to before anchors are keyed.
    pub time_precision: u32,
    /// Report an already-loaded discourse as skipped instead of failing.
    pub skip_existing: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { batch_size: 10_000, time_precision: 6, skip_existing: false }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            schema_path: None,
            backend: BackendConfig::default(),
            staging: StagingConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

impl CorpusConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_path = Some(path.into());
        self
    }

    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.loader.skip_existing = skip;
        self
    }

    pub fn batch_size(mut self, rows: usize) -> Self {
        self.loader.batch_size = rows;
        self
    }

    /// Load and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("corpus name must not be empty".into()));
        }
        if self.loader.batch_size == 0 {
            return Err(Error::Config("loader.batch_size must be at least 1".into()));
        }
        if self.loader.time_precision > 9 {
            return Err(Error::Config(format!(
                "loader.time_precision must be at most 9, got {}",
                self.loader.time_precision
            )));
        }
        if self.staging.checkpoint_stride == 0 {
            return Err(Error::Config("staging.checkpoint_stride must be at least 1".into()));
        }
        Ok(())
    }
}
