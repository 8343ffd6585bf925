//! Runtime configuration.
//!
//! Configuration is installed per thread with
//! [`Runtime::configure`](crate::reactive::Runtime::configure), since every
//! reactive root lives on a single thread.

use serde::Deserialize;

use crate::error::{ReactiveError, Result};

/// Default bound on nested notifications.
pub const DEFAULT_MAX_UPDATE_DEPTH: usize = 100;

/// Tunables for the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of notifications that may be nested inside one
    /// another before the innermost one is refused.
    pub max_update_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_update_depth: DEFAULT_MAX_UPDATE_DEPTH,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_update_depth(mut self, depth: usize) -> Self {
        self.max_update_depth = depth;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_update_depth == 0 {
            return Err(ReactiveError::Config(
                "max_update_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
