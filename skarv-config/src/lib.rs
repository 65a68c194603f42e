//! # Skarv Configuration System
//!
//! Hierarchical configuration for the event builder: defaults, a YAML
//! file, then `SKARV_*` environment overrides, validated as a whole
//! before anything starts. A configuration the validator rejects never
//! reaches the engine.

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod engine;
mod error;
mod membership;
mod telemetry;
mod validation;

pub use engine::EngineConfig;
pub use error::ConfigError;
pub use membership::{MembershipConfig, PeerEndpoint};
pub use telemetry::TelemetryConfig;
pub use validation::MAX_ENDPOINT_ID;

/// Top-level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct SkarvConfig {
    /// Buffer pool and delivery sizing.
    #[validate(nested)]
    pub engine: EngineConfig,

    /// Resolved run membership (own id, contributors, peers).
    #[validate(nested)]
    pub membership: MembershipConfig,

    /// Logging and metrics settings.
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl SkarvConfig {
    /// Load configuration from default locations and the environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/skarv.yaml`, if present
    /// 3. `SKARV_*` environment variables (`__` separates nesting)
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(SkarvConfig::default()));

        if Path::new("config/skarv.yaml").exists() {
            figment = figment.merge(Yaml::file("config/skarv.yaml"));
        }

        figment
            .merge(Env::prefixed("SKARV_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }

    /// Load configuration from a specific file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        Figment::from(Serialized::defaults(SkarvConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("SKARV_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_fails_without_membership() {
        // Sizing defaults are fine, but membership must be provided.
        let config = SkarvConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn populated_configuration_validates() {
        let mut config = SkarvConfig::default();
        config.membership.own_id = 0;
        config.membership.contributors = vec![1, 2, 3];
        config.membership.peers = vec![PeerEndpoint {
            addr: "teb0".into(),
            port: 32768,
        }];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_power_of_two_ring_capacity_rejected() {
        let mut config = SkarvConfig::default();
        config.membership.contributors = vec![1];
        config.membership.peers = vec![PeerEndpoint {
            addr: "teb0".into(),
            port: 32768,
        }];
        config.engine.ring_capacity = 3000;
        assert!(config.validate().is_err());
    }
}
