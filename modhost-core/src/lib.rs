//! Module host core: message bus, module registry, gateway lifecycle and
//! lifecycle event dispatching.

pub mod bus;
pub mod event;
pub mod gateway;
pub mod metrics;
pub mod publisher;
mod registry;

pub use bus::{BusConfig, MessageBus};
pub use event::{EventCallback, EventContext, EventStats, GatewayEvent};
pub use gateway::{
    Gateway, GatewayBuilder, GatewayId, GatewayState, ModuleHandle, ModuleInfo, ModuleProperties,
    PrebuiltModule,
};
pub use metrics::{BusMetrics, BusMetricsSnapshot, ModuleMetrics, ModuleMetricsSnapshot};
pub use publisher::BusHandle;
