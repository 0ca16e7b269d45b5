//! In-process publish/subscribe message bus
//!
//! Each subscription owns:
//! - An unbounded FIFO queue fed by `publish`
//! - A delivery worker that awaits `Module::receive` one message at a time
//! - A CancellationToken that stops delivery on unsubscribe
//!
//! `publish` never blocks and never takes a lock: it loads the current
//! subscriber snapshot and hands the shared message to every queue except
//! the publisher's own.

use crate::{
    metrics::{BusMetrics, ModuleMetrics},
    publisher::BusHandle,
};
use arc_swap::ArcSwap;
use futures::FutureExt;
use modhost_error::{HostError, HostResult};
use modhost_sdk::{Message, Module, SubscriberId};
use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Message bus configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Emit a debug record for every published and delivered message
    pub trace_messages: bool,
}

struct Envelope {
    from: SubscriberId,
    message: Arc<Message>,
}

struct Subscription {
    id: SubscriberId,
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Envelope>,
    token: CancellationToken,
    /// Taken exactly once by `unsubscribe`
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Publish/subscribe broker shared by all modules of one gateway.
pub struct MessageBus {
    config: BusConfig,
    subscribers: ArcSwap<Vec<Arc<Subscription>>>,
    /// Serializes structural writers; `publish` never touches it
    structure: Mutex<()>,
    next_id: AtomicU64,
    closed: AtomicBool,
    metrics: Arc<BusMetrics>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("config", &self.config)
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            subscribers: ArcSwap::from_pointee(Vec::new()),
            structure: Mutex::new(()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            metrics: Arc::new(BusMetrics::default()),
        }
    }

    #[inline]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load().len()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.subscribers.load().iter().any(|s| s.id == id)
    }

    /// Allocate a fresh identity and a publishing handle bound to it.
    ///
    /// The handle only holds a weak reference, so a module keeping it
    /// alive does not keep the bus alive.
    pub fn publisher(self: &Arc<Self>) -> Arc<BusHandle> {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Arc::new(BusHandle::new(Arc::downgrade(self), id))
    }

    /// Hand `message` to every subscriber except `from`.
    ///
    /// Returns the number of receivers the message was queued for. Delivery
    /// itself happens asynchronously on each receiver's worker.
    pub fn publish(&self, from: SubscriberId, message: Message) -> HostResult<usize> {
        if self.is_closed() {
            return Err(HostError::BusClosed);
        }

        let message = Arc::new(message);
        let snapshot = self.subscribers.load();
        let mut receivers = 0;
        for sub in snapshot.iter() {
            if sub.id == from || sub.token.is_cancelled() {
                continue;
            }
            let envelope = Envelope {
                from,
                message: Arc::clone(&message),
            };
            // The worker may already be gone if it is being torn down.
            if sub.tx.send(envelope).is_ok() {
                receivers += 1;
            }
        }

        self.metrics.record_published(receivers);
        if self.config.trace_messages {
            debug!(
                publisher = %from,
                receivers,
                properties = message.properties().len(),
                payload_len = message.payload().len(),
                "Message published"
            );
        }
        Ok(receivers)
    }

    /// Start delivering messages to `module` under identity `id`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(
        &self,
        id: SubscriberId,
        name: Arc<str>,
        module: Arc<dyn Module>,
        metrics: Arc<ModuleMetrics>,
    ) -> HostResult<()> {
        if self.is_closed() {
            return Err(HostError::BusClosed);
        }

        let _guard = self.structure.lock().unwrap();
        let current = self.subscribers.load_full();
        if current.iter().any(|s| s.id == id) {
            return Err(HostError::InvalidArgument(format!(
                "Subscriber {id} is already subscribed"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let worker = tokio::spawn(run_delivery(
            Arc::clone(&name),
            module,
            rx,
            token.clone(),
            metrics,
            Arc::clone(&self.metrics),
            self.config.trace_messages,
        ));

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::new(Subscription {
            id,
            name: Arc::clone(&name),
            tx,
            token,
            worker: Mutex::new(Some(worker)),
        }));
        self.subscribers.store(Arc::new(next));
        self.metrics.subscriber_added();

        info!(subscriber = %id, module = %name, "Subscribed to message bus");
        Ok(())
    }

    /// Stop delivery to `id` and wait for its worker to finish.
    ///
    /// A receive call already in progress completes; queued messages are
    /// discarded. Once this returns the module's receive is never invoked
    /// again.
    ///
    /// Called from inside the subscriber's own receive, the worker cannot be
    /// awaited. It is cancelled and handed back instead; it finishes as soon
    /// as that receive returns.
    pub async fn unsubscribe(&self, id: SubscriberId) -> HostResult<Option<JoinHandle<()>>> {
        let removed = {
            let _guard = self.structure.lock().unwrap();
            let current = self.subscribers.load_full();
            let Some(pos) = current.iter().position(|s| s.id == id) else {
                return Err(HostError::invalid_handle(format!(
                    "Subscriber {id} is not subscribed"
                )));
            };
            let mut next: Vec<_> = current.iter().cloned().collect();
            let removed = next.remove(pos);
            self.subscribers.store(Arc::new(next));
            removed
        };

        removed.token.cancel();
        self.metrics.subscriber_removed();
        let worker = removed.worker.lock().unwrap().take();
        let Some(worker) = worker else {
            info!(subscriber = %id, module = %removed.name, "Unsubscribed from message bus");
            return Ok(None);
        };

        if tokio::task::try_id() == Some(worker.id()) {
            info!(
                subscriber = %id,
                module = %removed.name,
                "Unsubscribed from message bus inside its own receive"
            );
            return Ok(Some(worker));
        }

        if let Err(e) = worker.await {
            warn!(subscriber = %id, module = %removed.name, error = %e, "Delivery worker ended abnormally");
        }
        info!(subscriber = %id, module = %removed.name, "Unsubscribed from message bus");
        Ok(None)
    }

    /// Cancel every subscription without waiting for the workers.
    ///
    /// Receive calls in progress still run to completion on their own.
    pub(crate) fn cancel_all(&self) -> usize {
        let _guard = self.structure.lock().unwrap();
        let current = self.subscribers.swap(Arc::new(Vec::new()));
        for sub in current.iter() {
            sub.token.cancel();
            drop(sub.worker.lock().unwrap().take());
            self.metrics.subscriber_removed();
        }
        current.len()
    }

    /// Reject every later `publish`. Existing subscriptions stay until
    /// they are unsubscribed.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Message bus closed");
        }
    }
}

async fn run_delivery(
    name: Arc<str>,
    module: Arc<dyn Module>,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    token: CancellationToken,
    metrics: Arc<ModuleMetrics>,
    bus_metrics: Arc<BusMetrics>,
    trace: bool,
) {
    debug!(module = %name, "Delivery worker started");

    loop {
        let envelope = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            maybe = rx.recv() => match maybe {
                Some(envelope) => envelope,
                None => break,
            },
        };
        if token.is_cancelled() {
            bus_metrics.record_dropped(1);
            break;
        }

        if trace {
            debug!(module = %name, publisher = %envelope.from, "Delivering message");
        }

        let started = Instant::now();
        match AssertUnwindSafe(module.receive(envelope.message))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                metrics.record_received(started.elapsed().as_nanos() as u64);
                bus_metrics.record_delivered(&name);
            }
            Ok(Err(e)) => {
                warn!(module = %name, error = %e, "Module failed to handle message");
                metrics.record_failure(e.to_string());
                bus_metrics.record_receive_error(&name);
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(module = %name, panic = %reason, "Module panicked while handling message");
                metrics.record_failure(format!("panicked: {reason}"));
                bus_metrics.record_receive_error(&name);
            }
        }
    }

    rx.close();
    let mut dropped = 0;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    bus_metrics.record_dropped(dropped);

    debug!(module = %name, dropped, "Delivery worker stopped");
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use modhost_sdk::{BusPublisher, ModuleError, ModuleResult};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;

    struct Forward(UnboundedSender<Arc<Message>>);

    #[async_trait]
    impl Module for Forward {
        async fn receive(&self, message: Arc<Message>) -> ModuleResult<()> {
            let _ = self.0.send(message);
            Ok(())
        }

        async fn destroy(&self) -> ModuleResult<()> {
            Ok(())
        }
    }

    struct Faulty;

    #[async_trait]
    impl Module for Faulty {
        async fn receive(&self, message: Arc<Message>) -> ModuleResult<()> {
            if message.property("panic").is_some() {
                panic!("boom");
            }
            Err(ModuleError::ExecutionError("rejected".into()))
        }

        async fn destroy(&self) -> ModuleResult<()> {
            Ok(())
        }
    }

    type Inbox = mpsc::UnboundedReceiver<Arc<Message>>;

    fn forward(bus: &Arc<MessageBus>, name: &str) -> (SubscriberId, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = bus.publisher().publisher_id();
        bus.subscribe(id, name.into(), Arc::new(Forward(tx)), Arc::default())
            .unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn test_no_self_delivery() {
        let bus = Arc::new(MessageBus::default());
        let (a, mut rx_a) = forward(&bus, "a");
        let (_b, mut rx_b) = forward(&bus, "b");

        let n = bus
            .publish(a, Message::builder().property("k", "v").build())
            .unwrap();
        assert_eq!(n, 1);

        let got = tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.property("k"), Some("v"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_receivers_share_one_allocation() {
        let bus = Arc::new(MessageBus::default());
        let host = bus.publisher().publisher_id();
        let (_a, mut rx_a) = forward(&bus, "a");
        let (_b, mut rx_b) = forward(&bus, "b");

        assert_eq!(bus.publish(host, Message::default()).unwrap(), 2);
        let m1 = rx_a.recv().await.unwrap();
        let m2 = rx_b.recv().await.unwrap();
        assert!(Arc::ptr_eq(&m1, &m2));
    }

    #[tokio::test]
    async fn test_closed_bus_rejects_publish() {
        let bus = Arc::new(MessageBus::default());
        let id = bus.publisher().publisher_id();
        bus.close();
        assert!(matches!(
            bus.publish(id, Message::default()),
            Err(HostError::BusClosed)
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_invalid_handle() {
        let bus = Arc::new(MessageBus::default());
        let err = bus.unsubscribe(SubscriberId(99)).await.unwrap_err();
        assert!(matches!(err, HostError::InvalidHandle(_)));
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_rejected() {
        let bus = Arc::new(MessageBus::default());
        let (a, _rx) = forward(&bus, "a");
        let (tx, _rx2) = mpsc::unbounded_channel();
        let err = bus
            .subscribe(a, "again".into(), Arc::new(Forward(tx)), Arc::default())
            .unwrap_err();
        assert!(matches!(err, HostError::InvalidArgument(_)));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_receive_failures_are_counted() {
        let bus = Arc::new(MessageBus::default());
        let host = bus.publisher().publisher_id();
        let faulty_id = bus.publisher().publisher_id();
        let faulty_metrics = Arc::new(ModuleMetrics::default());
        bus.subscribe(
            faulty_id,
            "faulty".into(),
            Arc::new(Faulty),
            Arc::clone(&faulty_metrics),
        )
        .unwrap();
        let (_ok, mut rx_ok) = forward(&bus, "ok");

        bus.publish(host, Message::default()).unwrap();
        bus.publish(host, Message::builder().property("panic", "1").build())
            .unwrap();

        rx_ok.recv().await.unwrap();
        rx_ok.recv().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while faulty_metrics.failed.load(Ordering::Relaxed) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        bus.unsubscribe(faulty_id).await.unwrap();
        let snap = faulty_metrics.snapshot();
        assert_eq!(snap.failed, 2);
        assert!(snap.last_error.unwrap().contains("boom"));
        assert_eq!(bus.metrics().snapshot().receive_errors, 2);
    }

    struct SelfUnsubscribe {
        bus: std::sync::Weak<MessageBus>,
        id: SubscriberId,
        done: UnboundedSender<bool>,
    }

    #[async_trait]
    impl Module for SelfUnsubscribe {
        async fn receive(&self, _message: Arc<Message>) -> ModuleResult<()> {
            let Some(bus) = self.bus.upgrade() else {
                return Err(ModuleError::BusClosed);
            };
            let worker = bus
                .unsubscribe(self.id)
                .await
                .map_err(|e| ModuleError::ExecutionError(e.to_string()))?;
            let _ = self.done.send(worker.is_some());
            Ok(())
        }

        async fn destroy(&self) -> ModuleResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_from_own_receive_hands_back_worker() {
        let bus = Arc::new(MessageBus::default());
        let host = bus.publisher().publisher_id();
        let id = bus.publisher().publisher_id();
        let (done, mut rx_done) = mpsc::unbounded_channel();
        let module = SelfUnsubscribe {
            bus: Arc::downgrade(&bus),
            id,
            done,
        };
        bus.subscribe(id, "quitter".into(), Arc::new(module), Arc::default())
            .unwrap();

        bus.publish(host, Message::default()).unwrap();
        let handed_back = tokio::time::timeout(Duration::from_secs(2), rx_done.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(handed_back);
        assert!(!bus.is_subscribed(id));
        assert_eq!(bus.publish(host, Message::default()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_stops_delivery() {
        let bus = Arc::new(MessageBus::default());
        let host = bus.publisher().publisher_id();
        let (_a, mut rx_a) = forward(&bus, "a");
        let (_b, _rx_b) = forward(&bus, "b");

        assert_eq!(bus.cancel_all(), 2);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(host, Message::default()).unwrap(), 0);
        // The worker drops its module, and with it the sender, once it stops.
        let closed = tokio::time::timeout(Duration::from_secs(2), rx_a.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[test]
    fn test_panic_message() {
        let p: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(p.as_ref()), "static");
        let p: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn Any + Send> = Box::new(5_u8);
        assert_eq!(panic_message(p.as_ref()), "unknown panic");
    }
}
