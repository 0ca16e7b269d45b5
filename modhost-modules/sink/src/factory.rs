use super::{config::SinkConfig, module::SinkModule};
use modhost_sdk::{Module, ModuleFactory, ModuleInitContext, ModuleResult};

#[derive(Debug, Clone, Default)]
pub struct SinkFactory;

impl ModuleFactory for SinkFactory {
    fn create_module(&self, ctx: ModuleInitContext) -> ModuleResult<Box<dyn Module>> {
        let config = match ctx.config.as_deref() {
            Some(config) => SinkConfig::from_module_config(config)?,
            None => SinkConfig::default(),
        };
        let name = ctx.module_name.unwrap_or_else(|| "sink".to_string());
        Ok(Box::new(SinkModule::new(name, config)))
    }
}
