//! Layered configuration for distributed collections.
//!
//! Configuration is loaded with precedence: overrides > Env vars > Config file > Defaults
//!
//! # Example config file (rangedist.toml)
//! ```toml
//! [collections]
//! max_chunk_elements = 1048576
//! parallelism = 8
//!
//! [relocation]
//! ack_poll_millis = 5
//! ```
//!
//! Environment variables use the `RANGEDIST_` prefix and `__` between
//! sections, e.g. `RANGEDIST_COLLECTIONS__PARALLELISM=16`.

mod defaults;

pub use defaults::*;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration shared by every collection of a place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistConfig {
    /// Local storage limits and parallel loop sizing
    pub collections: CollectionsConfig,
    /// Move manager timing
    pub relocation: RelocationConfig,
}

impl DistConfig {
    /// Load configuration with precedence: overrides > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - Explicit overrides to apply on top
    pub fn load(
        config_path: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(DistConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with RANGEDIST_ prefix
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR));

        // Layer 3: explicit overrides
        figment = figment.merge(Serialized::defaults(overrides));

        let config: DistConfig = figment.extract().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no overrides)
    pub fn from_env(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    /// Reject values that no collection could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = self.collections.max_chunk_elements;
        if max == 0 || max > MAX_CHUNK_ELEMENTS {
            return Err(ConfigError {
                message: format!(
                    "collections.max_chunk_elements must be in 1..={MAX_CHUNK_ELEMENTS}, got {max}"
                ),
            });
        }
        if self.collections.parallelism == 0 {
            return Err(ConfigError {
                message: "collections.parallelism must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Chunk storage and local loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionsConfig {
    /// Largest chunk a collection accepts
    pub max_chunk_elements: u64,
    /// Default number of parts for local parallel loops
    pub parallelism: usize,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            max_chunk_elements: DEFAULT_MAX_CHUNK_ELEMENTS,
            parallelism: default_parallelism(),
        }
    }
}

/// Move manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelocationConfig {
    /// Poll interval while a one-sided send waits for its acknowledgement
    pub ack_poll_millis: u64,
    /// Poll interval of the one-sided receive dispatcher
    pub dispatch_poll_millis: u64,
}

impl RelocationConfig {
    pub fn ack_poll(&self) -> Duration {
        Duration::from_millis(self.ack_poll_millis.max(1))
    }

    pub fn dispatch_poll(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_millis.max(1))
    }
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self {
            ack_poll_millis: DEFAULT_ACK_POLL_MILLIS,
            dispatch_poll_millis: DEFAULT_DISPATCH_POLL_MILLIS,
        }
    }
}

/// Overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<CollectionsOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relocation: Option<RelocationOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chunk_elements: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelocationOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_poll_millis: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_poll_millis: Option<u64>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DistConfig::default();
        assert_eq!(config.collections.max_chunk_elements, MAX_CHUNK_ELEMENTS);
        assert!(config.collections.parallelism > 0);
        assert_eq!(config.relocation.ack_poll_millis, DEFAULT_ACK_POLL_MILLIS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_and_overrides_layering() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[collections]\nmax_chunk_elements = 4096\nparallelism = 3\n\n[relocation]\nack_poll_millis = 7"
        )
        .unwrap();

        let overrides = ConfigOverrides {
            collections: Some(CollectionsOverrides {
                parallelism: Some(5),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = DistConfig::load(Some(file.path()), overrides).unwrap();
        assert_eq!(config.collections.max_chunk_elements, 4096);
        assert_eq!(config.collections.parallelism, 5);
        assert_eq!(config.relocation.ack_poll_millis, 7);
        assert_eq!(
            config.relocation.dispatch_poll_millis,
            DEFAULT_DISPATCH_POLL_MILLIS
        );
    }

    #[test]
    fn test_rejects_oversized_chunk_limit() {
        let overrides = ConfigOverrides {
            collections: Some(CollectionsOverrides {
                max_chunk_elements: Some(MAX_CHUNK_ELEMENTS + 1),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = DistConfig::load(None, overrides).unwrap_err();
        assert!(err.message.contains("max_chunk_elements"));
    }

    #[test]
    fn test_overrides_skip_unset_fields() {
        let json = serde_json::to_string(&ConfigOverrides::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
