use crate::{Message, ModuleResult};
use async_trait::async_trait;
use downcast_rs::{impl_downcast, DowncastSync};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, sync::Arc};

/// Bus-level identity of one publisher/subscriber.
///
/// Every module owns exactly one id for its whole life; the bus uses it to
/// skip the publisher during fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(pub u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Opaque per-module configuration.
///
/// The host never looks inside: it clones the `Arc` and hands it to the
/// module's factory. Modules downcast it to their own type.
///
/// ```ignore
/// let cfg = ctx.config.as_ref()
///     .and_then(|c| c.downcast_ref::<serde_json::Value>())
///     .cloned()
///     .unwrap_or_default();
/// ```
pub trait ModuleConfig: DowncastSync + Debug {}

impl<T: Debug + Send + Sync + 'static> ModuleConfig for T {}

/// Capability a module uses to put messages on the bus.
///
/// Implementations must not block: the message is handed off and delivered
/// asynchronously to every other subscribed module.
pub trait BusPublisher: DowncastSync + Send + Sync + Debug {
    /// Hand a message to the bus. Returns `ModuleError::BusClosed` once the
    /// owning gateway has started tearing down.
    fn publish(&self, message: Message) -> ModuleResult<()>;

    /// Identity this publisher publishes under.
    fn publisher_id(&self) -> SubscriberId;
}

/// Everything a factory receives when asked to create a module.
#[derive(Clone)]
pub struct ModuleInitContext {
    /// Registry name, `None` for unnamed modules.
    pub module_name: Option<String>,
    /// User data passed through untouched from the module entry.
    pub config: Option<Arc<dyn ModuleConfig>>,
    /// Bound handle for publishing onto the gateway's bus.
    pub publisher: Arc<dyn BusPublisher>,
}

impl Debug for ModuleInitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInitContext")
            .field("module_name", &self.module_name)
            .field("config", &self.config)
            .field("publisher", &self.publisher.publisher_id())
            .finish()
    }
}

impl ModuleInitContext {
    /// Downcast the opaque config to a concrete type.
    pub fn config_as<T: ModuleConfig>(&self) -> Option<&T> {
        self.config.as_deref().and_then(|c| c.downcast_ref::<T>())
    }
}

/// Factory exported by every module binary.
pub trait ModuleFactory: DowncastSync + Send + Sync {
    /// Create a module instance (synchronous, no I/O).
    ///
    /// Implementations must:
    /// - Validate the config carried in `ctx`
    /// - Capture the publisher for later use
    /// - NOT start background work; that belongs in [`Module::start`]
    fn create_module(&self, ctx: ModuleInitContext) -> ModuleResult<Box<dyn Module>>;
}

/// Uniform capability surface every loaded module exposes to the host.
///
/// The host calls `receive` from a single delivery task per module, so calls
/// never overlap for one instance. `destroy` is called exactly once, after
/// the module has been unsubscribed from the bus.
#[async_trait]
pub trait Module: DowncastSync + Send + Sync {
    /// Called once after the module has been subscribed to the bus.
    async fn start(&self) -> ModuleResult<()> {
        Ok(())
    }

    /// Handle one message published by another module.
    async fn receive(&self, message: Arc<Message>) -> ModuleResult<()>;

    /// Release everything the module holds. No message arrives after this.
    async fn destroy(&self) -> ModuleResult<()>;
}

impl_downcast!(sync BusPublisher);
impl_downcast!(sync ModuleFactory);
impl_downcast!(sync Module);
impl_downcast!(sync ModuleConfig);
