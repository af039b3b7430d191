//! Engine configuration loading and validation

use crate::engine::CacheConfig;
use crate::error::{AuthzError, Result};
use crate::wildcard::{DEFAULT_SEPARATOR, WILDCARD};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Authorization engine configuration
///
/// ```toml
/// separator = ":"
/// enable_metrics = true
///
/// [cache]
/// enabled = true
/// ttl_secs = 300
/// capacity = 10000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Segment separator used for wildcard derivation
    #[serde(default = "default_separator")]
    pub separator: char,

    /// Collect decision and latency metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Effective permission cache
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_separator() -> char {
    DEFAULT_SEPARATOR
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            enable_metrics: true,
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents).map_err(|e| {
            AuthzError::Config(format!("{}: {}", path.display(), e))
        })?;

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| AuthzError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.separator == WILDCARD {
            return Err(AuthzError::Config(
                "separator cannot be the wildcard character".to_string(),
            ));
        }

        if self.separator.is_whitespace() {
            return Err(AuthzError::Config(
                "separator cannot be whitespace".to_string(),
            ));
        }

        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(AuthzError::Config(
                "cache.capacity must be greater than 0 when the cache is enabled".to_string(),
            ));
        }

        Ok(())
    }
}
