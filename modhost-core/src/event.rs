//! Gateway lifecycle events
//!
//! Listeners are snapshotted when an event is emitted and invoked in
//! insertion order on one blocking-pool thread, so a slow or panicking
//! listener never stalls message delivery.

use crate::gateway::{Gateway, GatewayInner};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock, Weak,
    },
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

/// Gateway lifecycle events
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayEvent {
    /// All initial modules are added and the gateway is running
    Created,
    /// Every module has been torn down; no module can be added anymore
    Destroyed,
}

/// Context passed alongside every event. Currently carries nothing.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct EventContext {}

/// Listener for gateway lifecycle events.
///
/// Any `Fn(&Gateway, GatewayEvent, &EventContext)` closure qualifies.
pub trait EventCallback: Send + Sync + 'static {
    fn on_event(&self, gateway: &Gateway, event: GatewayEvent, context: &EventContext);
}

impl<F> EventCallback for F
where
    F: Fn(&Gateway, GatewayEvent, &EventContext) + Send + Sync + 'static,
{
    #[inline]
    fn on_event(&self, gateway: &Gateway, event: GatewayEvent, context: &EventContext) {
        self(gateway, event, context)
    }
}

/// Counters for event dispatching
#[derive(Debug, Default)]
pub struct EventStats {
    pub events_emitted: AtomicU64,
    pub listener_invocations: AtomicU64,
    pub listener_panics: AtomicU64,
}

type Listeners = Vec<Arc<dyn EventCallback>>;

/// Event queued together with the listeners registered at emission time.
struct Dispatch {
    event: GatewayEvent,
    listeners: Listeners,
}

/// Runs event listeners on a dedicated blocking-pool thread, away from
/// message delivery.
pub(crate) struct EventDispatcher {
    listeners: RwLock<HashMap<GatewayEvent, Listeners>>,
    tx: Mutex<Option<mpsc::UnboundedSender<Dispatch>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<EventStats>,
}

impl EventDispatcher {
    /// Start the dispatch thread. Must be called from within a tokio runtime.
    pub fn start(gateway: Weak<GatewayInner>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();
        let stats = Arc::new(EventStats::default());
        let worker_stats = Arc::clone(&stats);

        let worker = tokio::task::spawn_blocking(move || {
            while let Some(dispatch) = rx.blocking_recv() {
                let Some(inner) = gateway.upgrade() else {
                    debug!(event = ?dispatch.event, "Gateway dropped; skipping event");
                    continue;
                };
                let gateway = Gateway::from_inner(inner);
                let context = EventContext::default();
                for listener in dispatch.listeners {
                    worker_stats
                        .listener_invocations
                        .fetch_add(1, Ordering::Relaxed);
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        listener.on_event(&gateway, dispatch.event, &context)
                    }));
                    if let Err(panic) = result {
                        worker_stats.listener_panics.fetch_add(1, Ordering::Relaxed);
                        error!(
                            gateway_id = %gateway.id(),
                            event = ?dispatch.event,
                            panic = %crate::bus::panic_message(panic.as_ref()),
                            "Event listener panicked"
                        );
                    }
                }
            }
            debug!("Event dispatcher stopped");
        });

        Self {
            listeners: RwLock::new(HashMap::new()),
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            stats,
        }
    }

    #[inline]
    pub fn stats(&self) -> &Arc<EventStats> {
        &self.stats
    }

    /// Append a listener; invocation follows insertion order.
    pub fn add_listener(&self, event: GatewayEvent, listener: Arc<dyn EventCallback>) {
        self.listeners
            .write()
            .unwrap()
            .entry(event)
            .or_default()
            .push(listener);
    }

    /// Queue `event` for the listeners registered right now.
    pub fn emit(&self, event: GatewayEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap()
            .get(&event)
            .cloned()
            .unwrap_or_default();

        let guard = self.tx.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            warn!(event = ?event, "Event dispatcher already stopped; event dropped");
            return;
        };
        self.stats.events_emitted.fetch_add(1, Ordering::Relaxed);
        if tx.send(Dispatch { event, listeners }).is_err() {
            warn!(event = ?event, "Event dispatcher thread is gone; event dropped");
        }
    }

    /// Close the queue and wait until every queued event has been handled.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().unwrap().take());
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Event dispatcher ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_emit_after_shutdown_drops_event() {
        let dispatcher = EventDispatcher::start(Weak::new());
        dispatcher.shutdown().await;

        dispatcher.emit(GatewayEvent::Destroyed);
        assert_eq!(dispatcher.stats().events_emitted.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_event_skipped_once_gateway_is_gone() {
        let dispatcher = EventDispatcher::start(Weak::new());
        dispatcher.add_listener(
            GatewayEvent::Created,
            Arc::new(|_: &Gateway, _: GatewayEvent, _: &EventContext| {}),
        );

        dispatcher.emit(GatewayEvent::Created);
        tokio::time::timeout(Duration::from_secs(2), dispatcher.shutdown())
            .await
            .unwrap();

        let stats = dispatcher.stats();
        assert_eq!(stats.events_emitted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.listener_invocations.load(Ordering::Relaxed), 0);
    }
}
