use super::{config::SimulatorConfig, module::SimulatorModule};
use modhost_sdk::{Module, ModuleFactory, ModuleInitContext, ModuleResult};

#[derive(Debug, Clone, Default)]
pub struct SimulatorFactory;

impl ModuleFactory for SimulatorFactory {
    fn create_module(&self, ctx: ModuleInitContext) -> ModuleResult<Box<dyn Module>> {
        let config = match ctx.config.as_deref() {
            Some(config) => SimulatorConfig::from_module_config(config)?,
            None => SimulatorConfig::default(),
        };
        let name = ctx
            .module_name
            .clone()
            .unwrap_or_else(|| "simulator".to_string());
        Ok(Box::new(SimulatorModule::new(name, config, ctx.publisher)))
    }
}
