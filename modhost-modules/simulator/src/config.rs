use modhost_sdk::{ModuleConfig, ModuleError, ModuleResult};
use serde::{Deserialize, Serialize};

/// Simulator module configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Publish period in milliseconds
    #[serde(default = "SimulatorConfig::default_interval_ms")]
    pub interval_ms: u64,
    /// Value of the `type` property on every reading
    #[serde(default = "SimulatorConfig::default_kind")]
    pub kind: String,
    #[serde(default = "SimulatorConfig::default_unit")]
    pub unit: String,
    /// Center of the generated wave
    #[serde(default = "SimulatorConfig::default_base")]
    pub base: f64,
    #[serde(default = "SimulatorConfig::default_amplitude")]
    pub amplitude: f64,
    /// Ticks per full wave period
    #[serde(default = "SimulatorConfig::default_period")]
    pub period: u32,
}

impl SimulatorConfig {
    fn default_interval_ms() -> u64 {
        1000
    }

    fn default_kind() -> String {
        "temp".into()
    }

    fn default_unit() -> String {
        "C".into()
    }

    fn default_base() -> f64 {
        21.5
    }

    fn default_amplitude() -> f64 {
        2.0
    }

    fn default_period() -> u32 {
        60
    }

    /// Accepts either a `SimulatorConfig` or the raw JSON value from the
    /// host settings.
    pub fn from_module_config(config: &dyn ModuleConfig) -> ModuleResult<Self> {
        let parsed = if let Some(config) = config.downcast_ref::<SimulatorConfig>() {
            config.clone()
        } else if let Some(value) = config.downcast_ref::<serde_json::Value>() {
            serde_json::from_value(value.clone())?
        } else {
            return Err(ModuleError::ConfigurationError(format!(
                "unsupported simulator config: {config:?}"
            )));
        };
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> ModuleResult<()> {
        if self.interval_ms == 0 {
            return Err(ModuleError::ConfigurationError(
                "interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.period == 0 {
            return Err(ModuleError::ConfigurationError(
                "period must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Reading for tick `seq`.
    pub fn value_at(&self, seq: u64) -> f64 {
        let phase = (seq % self.period as u64) as f64 / self.period as f64;
        self.base + self.amplitude * (phase * std::f64::consts::TAU).sin()
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval_ms(),
            kind: Self::default_kind(),
            unit: Self::default_unit(),
            base: Self::default_base(),
            amplitude: Self::default_amplitude(),
            period: Self::default_period(),
        }
    }
}
