use modhost_sdk::{ModuleConfig, ModuleError, ModuleResult};
use serde::{Deserialize, Serialize};

/// Sink module configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Messages kept in memory; the oldest is evicted first
    #[serde(default = "SinkConfig::default_history")]
    pub history: usize,
    /// Log the payload as text alongside the properties
    #[serde(default = "SinkConfig::default_log_payload")]
    pub log_payload: bool,
    /// Only messages whose `type` property is listed are kept. Empty keeps all.
    #[serde(default)]
    pub accept_types: Vec<String>,
}

impl SinkConfig {
    fn default_history() -> usize {
        1024
    }

    fn default_log_payload() -> bool {
        true
    }

    pub fn from_module_config(config: &dyn ModuleConfig) -> ModuleResult<Self> {
        if let Some(config) = config.downcast_ref::<SinkConfig>() {
            return Ok(config.clone());
        }
        match config.downcast_ref::<serde_json::Value>() {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Err(ModuleError::ConfigurationError(format!(
                "unsupported sink config: {config:?}"
            ))),
        }
    }

    pub fn accepts(&self, kind: Option<&str>) -> bool {
        self.accept_types.is_empty()
            || kind.is_some_and(|kind| self.accept_types.iter().any(|t| t == kind))
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            history: Self::default_history(),
            log_payload: Self::default_log_payload(),
            accept_types: Vec::new(),
        }
    }
}
