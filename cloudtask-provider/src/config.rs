//! Provider configuration
//!
//! Read from a JSON file, with the API token and endpoint overridable from
//! the environment:
//!
//! ```json
//! {
//!   "endpoint": "https://api.example.cloud",
//!   "project_id": "101",
//!   "region_id": "76",
//!   "poll_interval_secs": 2,
//!   "timeouts": { "instance": { "create": 1800 } }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use cloudtask_core::provider::{TimeoutOverrides, Timeouts};
use cloudtask_core::waiter::DEFAULT_POLL_INTERVAL;

pub const ENV_API_TOKEN: &str = "CLOUDTASK_API_TOKEN";
pub const ENV_ENDPOINT: &str = "CLOUDTASK_ENDPOINT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the cloud API, without trailing path
    pub endpoint: String,
    pub api_token: Option<String>,
    pub project_id: String,
    pub region_id: String,
    pub poll_interval_secs: u64,
    /// Per resource kind overrides of the built-in wait budgets
    pub timeouts: HashMap<String, TimeoutOverrides>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_token: None,
            project_id: String::new(),
            region_id: String::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            timeouts: HashMap::new(),
        }
    }
}

impl ProviderConfig {
    /// Load, apply environment overrides, and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut config = Self::from_json(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Override token and endpoint from the given variable lookup
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(ENV_API_TOKEN).filter(|t| !t.is_empty()) {
            self.api_token = Some(token);
        }
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|e| !e.is_empty()) {
            self.endpoint = endpoint;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint must be set".to_string()));
        }
        if self.project_id.is_empty() || self.region_id.is_empty() {
            return Err(ConfigError::Invalid(
                "project_id and region_id must be set".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }

        let known: Vec<&str> = crate::resources::resource_types()
            .iter()
            .map(|t| t.name())
            .collect();
        for (kind, overrides) in &self.timeouts {
            if !known.contains(&kind.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "timeouts given for unknown resource type '{}'",
                    kind
                )));
            }
            let values = [overrides.create, overrides.update, overrides.delete];
            if values.iter().flatten().any(|secs| *secs == 0) {
                return Err(ConfigError::Invalid(format!(
                    "timeouts for '{}' must be greater than zero",
                    kind
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Built-in budgets for a kind with any configured override applied
    pub fn timeouts_for(&self, kind: &str, defaults: Timeouts) -> Timeouts {
        match self.timeouts.get(kind) {
            Some(overrides) => defaults.merged(overrides),
            None => defaults,
        }
    }
}
