//! Gateway lifecycle manager
//!
//! A gateway owns one message bus and one module registry and moves through
//! `Uninitialized -> Running -> Destroying -> Destroyed`. Structural changes
//! (add/remove/destroy) are serialized on the registry lock, which is held
//! across the whole operation. Message delivery never takes that lock.
//!
//! `remove_module` and `destroy` may be called from inside a module's
//! `receive`. A module removed that way is destroyed once that receive has
//! returned. Lifecycle calls from `start` or `destroy` would wait on the
//! registry lock held by the operation that invoked the callback.

use crate::{
    bus::{panic_message, BusConfig, MessageBus},
    event::{EventCallback, EventContext, EventDispatcher, EventStats, GatewayEvent},
    metrics::ModuleMetricsSnapshot,
    publisher::BusHandle,
    registry::{ModuleEntry, ModuleRegistry, SlotKey},
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use modhost_error::{HostError, HostResult};
use modhost_sdk::{
    BusPublisher, LibraryLoader, Message, Module, ModuleConfig, ModuleDescriptor,
    ModuleInitContext, ModuleLoader, SubscriberId,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    panic::AssertUnwindSafe,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc, Weak,
    },
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn};

static NEXT_GATEWAY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GatewayId(u64);

impl GatewayId {
    fn next() -> Self {
        Self(NEXT_GATEWAY_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gw-{}", self.0)
    }
}

/// Opaque identity of one live module within one gateway.
///
/// Resolves only while the module is live: after removal, or against
/// another gateway, every operation reports `InvalidHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleHandle {
    gateway: GatewayId,
    index: u32,
    generation: u32,
}

impl ModuleHandle {
    fn new(gateway: GatewayId, key: SlotKey) -> Self {
        Self {
            gateway,
            index: key.index,
            generation: key.generation,
        }
    }

    #[inline]
    pub fn gateway(&self) -> GatewayId {
        self.gateway
    }

    #[inline]
    fn key(&self) -> SlotKey {
        SlotKey {
            index: self.index,
            generation: self.generation,
        }
    }
}

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.gateway, self.index, self.generation)
    }
}

/// Module entry passed to create/add.
///
/// The host never mutates or frees `config`; it only clones the `Arc` into
/// the module's creation context.
#[derive(Debug, Clone, Default)]
pub struct ModuleProperties {
    /// Unique among live modules when present and non-empty
    pub name: Option<String>,
    pub binary_path: PathBuf,
    pub config: Option<Arc<dyn ModuleConfig>>,
}

impl ModuleProperties {
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            name: None,
            binary_path: binary_path.into(),
            config: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_config(mut self, config: impl ModuleConfig) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    /// Name with empty strings treated as absent.
    #[inline]
    pub fn effective_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}

/// A module instance created by the embedding application rather than by
/// the dynamic loader.
///
/// `publisher` must have been issued by the bus the gateway is built on
/// (`MessageBus::publisher`) and passed to the module when it was created.
pub struct PrebuiltModule {
    pub name: Option<String>,
    pub publisher: Arc<BusHandle>,
    pub module: Box<dyn Module>,
}

impl fmt::Debug for PrebuiltModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrebuiltModule")
            .field("name", &self.name)
            .field("publisher", &self.publisher.publisher_id())
            .finish()
    }
}

/// Gateway lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GatewayState {
    Uninitialized = 0,
    Running = 1,
    Destroying = 2,
    Destroyed = 3,
}

impl From<u8> for GatewayState {
    fn from(v: u8) -> Self {
        match v {
            0 => GatewayState::Uninitialized,
            1 => GatewayState::Running,
            2 => GatewayState::Destroying,
            _ => GatewayState::Destroyed,
        }
    }
}

/// Listing entry returned by [`Gateway::modules`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    pub handle: ModuleHandle,
    pub name: Option<String>,
    pub binary_path: Option<PathBuf>,
    pub subscriber: SubscriberId,
    pub descriptor: Option<ModuleDescriptor>,
    pub added_at: DateTime<Utc>,
}

/// Builder for [`Gateway`]; `build` is the gateway's Create operation.
pub struct GatewayBuilder {
    loader: Option<Arc<dyn ModuleLoader>>,
    bus_config: BusConfig,
    modules: Vec<ModuleProperties>,
    listeners: Vec<(GatewayEvent, Arc<dyn EventCallback>)>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            loader: None,
            bus_config: BusConfig::default(),
            modules: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Loader used for every path-based module. Defaults to [`LibraryLoader`].
    pub fn loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn bus_config(mut self, config: BusConfig) -> Self {
        self.bus_config = config;
        self
    }

    pub fn module(mut self, properties: ModuleProperties) -> Self {
        self.modules.push(properties);
        self
    }

    pub fn modules(mut self, properties: impl IntoIterator<Item = ModuleProperties>) -> Self {
        self.modules.extend(properties);
        self
    }

    /// Register a listener before creation so it observes `Created`.
    pub fn on_event<F>(self, event: GatewayEvent, callback: F) -> Self
    where
        F: Fn(&Gateway, GatewayEvent, &EventContext) + Send + Sync + 'static,
    {
        self.listener(event, Arc::new(callback))
    }

    pub fn listener(mut self, event: GatewayEvent, listener: Arc<dyn EventCallback>) -> Self {
        self.listeners.push((event, listener));
        self
    }

    /// Create the gateway and add every configured module in order.
    ///
    /// If any module fails, the modules added so far are torn down in
    /// registration order and the error is returned; no events fire.
    pub async fn build(self) -> HostResult<Gateway> {
        let bus = Arc::new(MessageBus::new(self.bus_config.clone()));
        self.build_on(bus, Vec::new()).await
    }

    /// Create the gateway on a caller-supplied bus from pre-built modules.
    ///
    /// The loader step is skipped for `prebuilt`; modules configured with
    /// [`GatewayBuilder::module`] are still loaded afterwards.
    pub async fn build_with_modules(
        self,
        bus: Arc<MessageBus>,
        prebuilt: Vec<PrebuiltModule>,
    ) -> HostResult<Gateway> {
        self.build_on(bus, prebuilt).await
    }

    async fn build_on(
        self,
        bus: Arc<MessageBus>,
        prebuilt: Vec<PrebuiltModule>,
    ) -> HostResult<Gateway> {
        let GatewayBuilder {
            loader,
            modules,
            listeners,
            ..
        } = self;

        if bus.is_closed() {
            return Err(HostError::InitializationError(
                "message bus is already closed".to_string(),
            ));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(HostError::InitializationError(
                "gateway must be created inside a tokio runtime".to_string(),
            ));
        }

        let loader = loader.unwrap_or_else(|| Arc::new(LibraryLoader::new()));
        let gateway = Gateway::assemble(bus, loader);
        for (event, callback) in listeners {
            gateway.inner.events.add_listener(event, callback);
        }
        gateway.inner.set_state(GatewayState::Running);
        info!(gateway_id = %gateway.id(), "Creating gateway");

        let result = async {
            for module in prebuilt {
                gateway.add_prebuilt_module(module).await?;
            }
            for properties in modules {
                gateway.add_module(properties).await?;
            }
            Ok::<_, HostError>(())
        }
        .await;

        if let Err(e) = result {
            error!(gateway_id = %gateway.id(), error = %e, "Gateway creation failed; unwinding");
            gateway.unwind().await;
            return Err(e);
        }

        gateway.inner.events.emit(GatewayEvent::Created);
        info!(
            gateway_id = %gateway.id(),
            modules = gateway.module_count().await,
            "Gateway created"
        );
        Ok(gateway)
    }
}

pub(crate) struct GatewayInner {
    id: GatewayId,
    state: AtomicU8,
    bus: Arc<MessageBus>,
    host_publisher: Arc<BusHandle>,
    loader: Arc<dyn ModuleLoader>,
    registry: Mutex<ModuleRegistry>,
    events: EventDispatcher,
}

impl GatewayInner {
    #[inline]
    fn state(&self) -> GatewayState {
        GatewayState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, state: GatewayState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: GatewayState, to: GatewayState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Drop for GatewayInner {
    fn drop(&mut self) {
        if self.state() == GatewayState::Destroyed {
            return;
        }
        warn!(gateway_id = %self.id, "Gateway dropped without destroy; leaking module binaries");

        // Delivery workers may still hold module code, so no library is closed.
        self.bus.close();
        self.bus.cancel_all();
        for entry in self.registry.get_mut().drain() {
            let ModuleEntry { module, binary, .. } = entry;
            drop(module);
            if let Some(binary) = binary {
                std::mem::forget(binary);
            }
        }
    }
}

/// Handle to one running gateway. Cloning is cheap and every clone refers
/// to the same gateway.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state())
            .finish()
    }
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Create a gateway from module entries loaded through `loader`.
    pub async fn create(
        properties: impl IntoIterator<Item = ModuleProperties>,
        loader: Arc<dyn ModuleLoader>,
    ) -> HostResult<Gateway> {
        GatewayBuilder::new()
            .loader(loader)
            .modules(properties)
            .build()
            .await
    }

    /// Create a gateway on an existing bus from already-created modules.
    pub async fn with_modules(
        bus: Arc<MessageBus>,
        prebuilt: Vec<PrebuiltModule>,
    ) -> HostResult<Gateway> {
        GatewayBuilder::new()
            .build_with_modules(bus, prebuilt)
            .await
    }

    fn assemble(bus: Arc<MessageBus>, loader: Arc<dyn ModuleLoader>) -> Gateway {
        let inner = Arc::new_cyclic(|weak: &Weak<GatewayInner>| GatewayInner {
            id: GatewayId::next(),
            state: AtomicU8::new(GatewayState::Uninitialized as u8),
            host_publisher: bus.publisher(),
            bus,
            loader,
            registry: Mutex::new(ModuleRegistry::new()),
            events: EventDispatcher::start(weak.clone()),
        });
        Gateway { inner }
    }

    pub(crate) fn from_inner(inner: Arc<GatewayInner>) -> Gateway {
        Gateway { inner }
    }

    // === Accessors ===

    #[inline]
    pub fn id(&self) -> GatewayId {
        self.inner.id
    }

    #[inline]
    pub fn state(&self) -> GatewayState {
        self.inner.state()
    }

    #[inline]
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.inner.bus
    }

    #[inline]
    pub fn event_stats(&self) -> &Arc<EventStats> {
        self.inner.events.stats()
    }

    fn ensure_running(&self) -> HostResult<()> {
        match self.state() {
            GatewayState::Running => Ok(()),
            state => Err(HostError::invalid_handle(format!(
                "gateway {} is {:?}",
                self.id(),
                state
            ))),
        }
    }

    fn check_handle(&self, handle: &ModuleHandle) -> HostResult<()> {
        if handle.gateway != self.id() {
            return Err(HostError::invalid_handle(format!(
                "module {handle} belongs to another gateway"
            )));
        }
        Ok(())
    }

    // === Module management ===

    /// Load, create, register, subscribe and start one module.
    ///
    /// Any failure leaves the registry and bus as they were.
    #[instrument(skip_all, fields(gateway_id = %self.id(), path = %properties.binary_path.display()))]
    pub async fn add_module(&self, properties: ModuleProperties) -> HostResult<ModuleHandle> {
        self.ensure_running()?;
        let mut registry = self.inner.registry.lock().await;
        self.ensure_running()?;

        // 1. Validate
        if properties.binary_path.as_os_str().is_empty() {
            return Err(HostError::InvalidArgument(
                "module binary path must not be empty".to_string(),
            ));
        }
        let name = properties.effective_name().map(Arc::<str>::from);
        if let Some(name) = &name {
            if registry.contains_name(name) {
                return Err(HostError::InvalidArgument(format!(
                    "module name '{name}' is already in use"
                )));
            }
        }

        // 2. Load
        let path = properties.binary_path.clone();
        let binary = self
            .inner
            .loader
            .load(&path)
            .await
            .map_err(|e| HostError::ModuleLoadError {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        // 3. Create
        let module_label = name
            .as_deref()
            .map(str::to_string)
            .unwrap_or_else(|| path.display().to_string());
        let publisher = self.inner.bus.publisher();
        let ctx = ModuleInitContext {
            module_name: name.as_deref().map(str::to_string),
            config: properties.config.clone(),
            publisher: Arc::clone(&publisher) as Arc<dyn BusPublisher>,
        };
        let created = std::panic::catch_unwind(AssertUnwindSafe(|| {
            binary.factory().create_module(ctx)
        }));
        let module: Arc<dyn Module> = match created {
            Ok(Ok(module)) => Arc::from(module),
            Ok(Err(e)) => {
                self.inner.loader.unload(binary).await;
                return Err(HostError::ModuleInitError {
                    module: module_label,
                    reason: e.to_string(),
                });
            }
            Err(panic) => {
                self.inner.loader.unload(binary).await;
                return Err(HostError::ModuleInitError {
                    module: module_label,
                    reason: format!("panicked: {}", panic_message(panic.as_ref())),
                });
            }
        };

        // 4-6. Register, subscribe, start
        let entry = ModuleEntry::new(
            name,
            Some(path),
            publisher.publisher_id(),
            module,
            Some(binary),
        );
        self.install(&mut registry, entry).await
    }

    /// Register a module instance created outside the loader.
    #[instrument(skip_all, fields(gateway_id = %self.id()))]
    pub async fn add_prebuilt_module(&self, prebuilt: PrebuiltModule) -> HostResult<ModuleHandle> {
        self.ensure_running()?;
        let mut registry = self.inner.registry.lock().await;
        self.ensure_running()?;

        let PrebuiltModule {
            name,
            publisher,
            module,
        } = prebuilt;

        if !publisher.belongs_to(&self.inner.bus) {
            return Err(HostError::InvalidArgument(
                "pre-built module's publisher was issued by another bus".to_string(),
            ));
        }
        if self.inner.bus.is_subscribed(publisher.publisher_id()) {
            return Err(HostError::InvalidArgument(format!(
                "publisher {} is already subscribed",
                publisher.publisher_id()
            )));
        }
        let name = name
            .as_deref()
            .filter(|n| !n.is_empty())
            .map(Arc::<str>::from);
        if let Some(name) = &name {
            if registry.contains_name(name) {
                return Err(HostError::InvalidArgument(format!(
                    "module name '{name}' is already in use"
                )));
            }
        }

        let entry = ModuleEntry::new(
            name,
            None,
            publisher.publisher_id(),
            Arc::from(module),
            None,
        );
        self.install(&mut registry, entry).await
    }

    async fn install(
        &self,
        registry: &mut ModuleRegistry,
        entry: ModuleEntry,
    ) -> HostResult<ModuleHandle> {
        let label = entry.display_name();
        let subscriber = entry.subscriber;
        let module = Arc::clone(&entry.module);
        let metrics = Arc::clone(&entry.metrics);

        let key = registry.insert(entry);
        if let Err(e) = self
            .inner
            .bus
            .subscribe(subscriber, Arc::clone(&label), Arc::clone(&module), metrics)
        {
            drop(module);
            if let Some(entry) = registry.remove(key) {
                self.dispose(entry).await;
            }
            return Err(e);
        }

        match AssertUnwindSafe(module.start()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(module = %label, error = %e, "Module start failed; keeping it registered");
            }
            Err(panic) => {
                warn!(
                    module = %label,
                    panic = %panic_message(panic.as_ref()),
                    "Module start panicked; keeping it registered"
                );
            }
        }

        let handle = ModuleHandle::new(self.id(), key);
        info!(module = %label, handle = %handle, "Module added");
        Ok(handle)
    }

    /// Unsubscribe, destroy, unload and evict one module.
    #[instrument(skip_all, fields(gateway_id = %self.id(), handle = %handle))]
    pub async fn remove_module(&self, handle: ModuleHandle) -> HostResult<()> {
        self.ensure_running()?;
        self.check_handle(&handle)?;
        let mut registry = self.inner.registry.lock().await;
        self.ensure_running()?;

        let Some(entry) = registry.get(handle.key()) else {
            return Err(HostError::invalid_handle(format!(
                "module {handle} is not live"
            )));
        };
        let subscriber = entry.subscriber;
        let label = entry.display_name();

        let in_flight = match self.inner.bus.unsubscribe(subscriber).await {
            Ok(worker) => worker,
            Err(e) => {
                warn!(module = %label, error = %e, "Module was not subscribed");
                None
            }
        };
        if let Some(entry) = registry.remove(handle.key()) {
            match in_flight {
                Some(worker) => self.dispose_after(worker, entry),
                None => self.dispose(entry).await,
            }
        }
        info!(module = %label, "Module removed");
        Ok(())
    }

    /// Dispose of a module once the receive call that removed it returns.
    fn dispose_after(&self, worker: JoinHandle<()>, entry: ModuleEntry) {
        debug!(module = %entry.display_name(), "Deferring destroy until receive returns");
        let gateway = self.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                warn!(module = %entry.display_name(), error = %e, "Delivery worker ended abnormally");
            }
            gateway.dispose(entry).await;
        });
    }

    /// Destroy an unsubscribed module and release its binary.
    async fn dispose(&self, entry: ModuleEntry) {
        let label = entry.display_name();
        let ModuleEntry { module, binary, .. } = entry;

        match AssertUnwindSafe(module.destroy()).catch_unwind().await {
            Ok(Ok(())) => debug!(module = %label, "Module destroyed"),
            Ok(Err(e)) => warn!(module = %label, error = %e, "Module destroy failed"),
            Err(panic) => error!(
                module = %label,
                panic = %panic_message(panic.as_ref()),
                "Module destroy panicked"
            ),
        }

        // Module code must be gone before its library is closed.
        drop(module);
        if let Some(binary) = binary {
            self.inner.loader.unload(binary).await;
        }
    }

    /// Tear every module down: close the bus, unsubscribe all modules, then
    /// destroy them in registration order.
    async fn teardown_all(&self) {
        self.inner.bus.close();
        let mut registry = self.inner.registry.lock().await;
        let keys = registry.keys_in_order();

        let mut in_flight = None;
        for key in &keys {
            let Some((subscriber, label)) = registry
                .get(*key)
                .map(|e| (e.subscriber, e.display_name()))
            else {
                continue;
            };
            match self.inner.bus.unsubscribe(subscriber).await {
                Ok(Some(worker)) => in_flight = Some((*key, worker)),
                Ok(None) => {}
                Err(e) => debug!(module = %label, error = %e, "Module was not subscribed"),
            }
        }
        for key in keys {
            let Some(entry) = registry.remove(key) else {
                continue;
            };
            match in_flight.take_if(|(caller, _)| *caller == key) {
                Some((_, worker)) => self.dispose_after(worker, entry),
                None => self.dispose(entry).await,
            }
        }
    }

    /// Undo a failed creation without firing events.
    async fn unwind(&self) {
        self.inner.set_state(GatewayState::Destroying);
        self.teardown_all().await;
        self.inner.events.shutdown().await;
        self.inner.set_state(GatewayState::Destroyed);
    }

    /// Destroy the gateway and every live module.
    ///
    /// Valid exactly once; later calls report `InvalidHandle`. `Destroyed`
    /// listeners have all run when this returns. When called from a module's
    /// `receive`, that module is destroyed after the receive returns.
    #[instrument(skip_all, fields(gateway_id = %self.id()))]
    pub async fn destroy(&self) -> HostResult<()> {
        if !self
            .inner
            .transition(GatewayState::Running, GatewayState::Destroying)
        {
            return Err(HostError::invalid_handle(format!(
                "gateway {} is {:?}",
                self.id(),
                self.state()
            )));
        }
        info!("Destroying gateway");

        self.teardown_all().await;
        self.inner.events.emit(GatewayEvent::Destroyed);
        self.inner.events.shutdown().await;
        self.inner.set_state(GatewayState::Destroyed);

        info!("Gateway destroyed");
        Ok(())
    }

    /// Register a lifecycle listener. Listeners added after `Created` fired
    /// do not observe it.
    pub fn add_event_callback<F>(&self, event: GatewayEvent, callback: F) -> HostResult<()>
    where
        F: Fn(&Gateway, GatewayEvent, &EventContext) + Send + Sync + 'static,
    {
        self.add_event_listener(event, Arc::new(callback))
    }

    pub fn add_event_listener(
        &self,
        event: GatewayEvent,
        listener: Arc<dyn EventCallback>,
    ) -> HostResult<()> {
        self.ensure_running()?;
        self.inner.events.add_listener(event, listener);
        Ok(())
    }

    // === Messaging and inspection ===

    /// Publish a host-originated message to every module.
    pub fn publish(&self, message: Message) -> HostResult<usize> {
        self.ensure_running()?;
        self.inner
            .bus
            .publish(self.inner.host_publisher.publisher_id(), message)
    }

    pub async fn module_count(&self) -> usize {
        self.inner.registry.lock().await.len()
    }

    /// Live modules in registration order.
    pub async fn modules(&self) -> Vec<ModuleInfo> {
        let registry = self.inner.registry.lock().await;
        registry
            .keys_in_order()
            .into_iter()
            .filter_map(|key| {
                registry.get(key).map(|e| ModuleInfo {
                    handle: ModuleHandle::new(self.id(), key),
                    name: e.name.as_deref().map(str::to_string),
                    binary_path: e.binary_path.clone(),
                    subscriber: e.subscriber,
                    descriptor: e.binary.as_ref().and_then(|b| b.descriptor().cloned()),
                    added_at: e.added_at,
                })
            })
            .collect()
    }

    /// Look up a live module by name.
    pub async fn find_module(&self, name: &str) -> Option<ModuleHandle> {
        let registry = self.inner.registry.lock().await;
        registry
            .keys_in_order()
            .into_iter()
            .find(|key| {
                registry
                    .get(*key)
                    .and_then(|e| e.name.as_deref())
                    .is_some_and(|n| n == name)
            })
            .map(|key| ModuleHandle::new(self.id(), key))
    }

    pub async fn module_metrics(&self, handle: ModuleHandle) -> HostResult<ModuleMetricsSnapshot> {
        self.check_handle(&handle)?;
        let registry = self.inner.registry.lock().await;
        registry
            .get(handle.key())
            .map(|e| e.metrics.snapshot())
            .ok_or_else(|| HostError::invalid_handle(format!("module {handle} is not live")))
    }
}
