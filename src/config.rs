//! Configuration management for armthrottle.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, ThrottleError};
use crate::ratelimit::{RateOverride, RateTable};

/// Prefix for environment overrides, e.g. `ARMTHROTTLE__REGISTRY__IDLE_TTL_SECS`.
const ENV_PREFIX: &str = "ARMTHROTTLE";

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX).separator("__")
}

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Limiter registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Rate table entries replacing or adding to the built-in table
    #[serde(default)]
    pub rates: Vec<RateOverride>,
}

/// Limiter registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Seconds a limiter may go unused before it is reclaimed
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,

    /// Seconds between background sweeps; 0 disables the sweep task
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_idle_ttl() -> u64 {
    600
}

fn default_sweep_interval() -> u64 {
    60
}

impl RegistryConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    /// Interval of the background sweep, or `None` for lazy expiry only.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

impl ThrottleConfig {
    /// Load configuration from a YAML file, with `ARMTHROTTLE__*` environment
    /// variables layered on top.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_sources(path.as_ref(), environment())
    }

    fn from_sources(path: &Path, env: config::Environment) -> Result<Self> {
        info!(path = %path.display(), "Loading throttle configuration");

        if !path.exists() {
            return Err(ThrottleError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )));
        }

        let config: ThrottleConfig = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ThrottleError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ThrottleConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(format!("Failed to parse throttle config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that would misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.registry.idle_ttl_secs == 0 {
            return Err(ThrottleError::Config(
                "registry.idle_ttl_secs must be at least 1".to_string(),
            ));
        }
        self.rate_table().map(|_| ())
    }

    /// The effective rate table: built-in rates with overrides applied.
    pub fn rate_table(&self) -> Result<RateTable> {
        RateTable::with_overrides(&self.rates)
    }
}
