use std::io;
use std::path::{Path, PathBuf};

use herald_core::{DispatchConfig, PublishMode};
use serde::Deserialize;
use thiserror::Error;

use crate::paths::herald_config_path;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Home(String),

    #[error("read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid {key}={value}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub version: u32,
    pub dispatch: DispatchConfig,
    pub demo: DemoConfig,
}

impl Default for HeraldConfig {
    fn default() -> Self {
        Self {
            version: 1,
            dispatch: DispatchConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

/// Sizes of the scenarios the demo runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub concurrent_pings: usize,
    pub counter_items: u64,
    pub counter_interval_ms: u64,
    /// Items pulled from the second counter stream before it is cancelled.
    pub cancel_after: u64,
    pub customer: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            concurrent_pings: 100,
            counter_items: 5,
            counter_interval_ms: 20,
            cancel_after: 2,
            customer: "ada@example.com".to_string(),
        }
    }
}

impl HeraldConfig {
    /// Load the config file if present, then apply `HERALD_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = herald_config_path()?;
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Unparseable numbers and flags keep their current value; an unknown
    /// publish strategy is an error.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = var("HERALD_PUBLISH_STRATEGY") {
            let mode = value.parse::<PublishMode>().map_err(|reason| ConfigError::InvalidEnv {
                key: "HERALD_PUBLISH_STRATEGY",
                value: value.clone(),
                reason,
            })?;
            self.dispatch.publish_strategy = mode;
        }
        if let Some(value) = var("HERALD_STRICT_HANDLERS") {
            self.dispatch.strict_handlers = parse_bool(&value);
        }
        if let Some(value) = var("HERALD_CONCURRENT_PINGS") {
            self.demo.concurrent_pings = value.parse().unwrap_or(self.demo.concurrent_pings);
        }
        if let Some(value) = var("HERALD_COUNTER_ITEMS") {
            self.demo.counter_items = value.parse().unwrap_or(self.demo.counter_items);
        }
        if let Some(value) = var("HERALD_CUSTOMER") {
            self.demo.customer = value;
        }
        Ok(())
    }
}

pub(crate) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES")
}
