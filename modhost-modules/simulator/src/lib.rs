//! Example module: publishes a synthetic sensor reading on every tick.
pub mod config;
mod factory;
mod module;

pub use config::SimulatorConfig;
pub use factory::SimulatorFactory;
pub use module::SimulatorModule;

use modhost_sdk::modhost_module;

modhost_module!(name = "simulator", factory = SimulatorFactory);
