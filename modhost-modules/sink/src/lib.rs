//! Example module: logs and keeps a bounded history of received messages.
pub mod config;
mod factory;
mod module;

pub use config::SinkConfig;
pub use factory::SinkFactory;
pub use module::{SinkModule, SinkStats};

use modhost_sdk::modhost_module;

modhost_module!(name = "sink", factory = SinkFactory);
