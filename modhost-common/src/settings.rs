use config::{Config, Environment, File};
use modhost_core::{BusConfig, ModuleProperties};
use modhost_error::{HostError, HostResult};
use serde::Deserialize;
use std::{ops::Deref, str::FromStr, sync::Arc};
use tracing::Level;

/// Host settings loaded from an optional TOML file, overridden by
/// `MODHOST__<SECTION>__<KEY>` environment variables.
#[derive(Debug, Clone)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(config_path: &str) -> HostResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(
                Environment::with_prefix("MODHOST")
                    .separator("__")
                    .try_parsing(true),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub bus: BusConfig,
    /// Modules added at startup, in order.
    #[serde(default)]
    pub modules: Vec<ModuleSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    #[serde(default = "General::log_level_default")]
    pub log_level: String,
    /// Directory of the rolling log files, relative to `runtime_dir`
    #[serde(default = "General::log_dir_default")]
    pub log_dir: String,
    /// Working directory the host switches to before anything else.
    ///
    /// Relative module paths and `log_dir` resolve from here.
    #[serde(default = "General::runtime_dir_default")]
    pub runtime_dir: String,
}

impl Default for General {
    fn default() -> Self {
        General {
            log_level: General::log_level_default(),
            log_dir: General::log_dir_default(),
            runtime_dir: General::runtime_dir_default(),
        }
    }
}

impl General {
    fn log_level_default() -> String {
        "info".into()
    }

    fn log_dir_default() -> String {
        "logs".into()
    }

    fn runtime_dir_default() -> String {
        ".".into()
    }

    pub fn level(&self) -> HostResult<Level> {
        Level::from_str(self.log_level.trim()).map_err(|_| {
            HostError::InitializationError(format!("Unknown log level '{}'", self.log_level))
        })
    }
}

/// One `[[modules]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleSettings {
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
    /// Handed to the module untouched as a `serde_json::Value`
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

impl ModuleSettings {
    pub fn to_properties(&self) -> ModuleProperties {
        let mut properties = ModuleProperties::new(&self.path);
        if let Some(name) = &self.name {
            properties = properties.with_name(name);
        }
        if let Some(config) = &self.config {
            properties = properties.with_config(config.clone());
        }
        properties
    }
}
