//! Configuration for the fast filter optimization.
//!
//! Loaded from a flat TOML document such as:
//!
//! ```toml
//! max_rewrite_filters = 3000
//! max_non_zero_ranges = 100
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tunables for the point-tree aggregation fast path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FastFilterConfig {
    /// Budget on distinct ranges/buckets before the optimization is refused.
    /// Zero disables the optimization.
    #[serde(default = "default_max_rewrite_filters")]
    pub max_rewrite_filters: usize,

    /// Stop a traversal once this many ranges received at least one document.
    /// `None` means no cap.
    #[serde(default)]
    pub max_non_zero_ranges: Option<usize>,
}

fn default_max_rewrite_filters() -> usize {
    3000
}

impl Default for FastFilterConfig {
    fn default() -> Self {
        Self {
            max_rewrite_filters: default_max_rewrite_filters(),
            max_non_zero_ranges: None,
        }
    }
}

impl FastFilterConfig {
    /// Configuration with the optimization switched off.
    pub fn disabled() -> Self {
        Self {
            max_rewrite_filters: 0,
            ..Default::default()
        }
    }

    pub fn enabled(&self) -> bool {
        self.max_rewrite_filters > 0
    }

    /// Effective cap handed to the traversal.
    pub fn non_zero_range_cap(&self) -> usize {
        self.max_non_zero_ranges.unwrap_or(usize::MAX)
    }

    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: FastFilterConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_non_zero_ranges == Some(0) {
            return Err(Error::Config(
                "max_non_zero_ranges must be positive, leave it unset for no cap".to_string(),
            ));
        }
        Ok(())
    }

    /// Load config from file path, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }
}
