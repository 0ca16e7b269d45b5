use super::config::SimulatorConfig;
use async_trait::async_trait;
use modhost_sdk::{BusPublisher, Message, Module, ModuleError, ModuleResult};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Publishes one reading per `interval_ms` from `start` until `destroy`.
pub struct SimulatorModule {
    name: String,
    config: Arc<SimulatorConfig>,
    publisher: Arc<dyn BusPublisher>,
    shutdown_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatorModule {
    pub fn new(name: String, config: SimulatorConfig, publisher: Arc<dyn BusPublisher>) -> Self {
        Self {
            name,
            config: Arc::new(config),
            publisher,
            shutdown_token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn reading(config: &SimulatorConfig, source: &str, seq: u64) -> Message {
        Message::builder()
            .property("type", config.kind.as_str())
            .property("unit", config.unit.as_str())
            .property("source", source)
            .property("seq", seq.to_string())
            .payload(format!("{:.2}", config.value_at(seq)))
            .build()
    }
}

async fn run_ticker(
    name: String,
    config: Arc<SimulatorConfig>,
    publisher: Arc<dyn BusPublisher>,
    token: CancellationToken,
) {
    let mut ticker = interval(Duration::from_millis(config.interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut seq = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match publisher.publish(SimulatorModule::reading(&config, &name, seq)) {
            Ok(()) => seq += 1,
            Err(ModuleError::BusClosed) => {
                debug!(module = %name, "Bus closed; simulator stops publishing");
                break;
            }
            Err(e) => warn!(module = %name, error = %e, "Failed to publish reading"),
        }
    }

    debug!(module = %name, published = seq, "Simulator ticker stopped");
}

#[async_trait]
impl Module for SimulatorModule {
    async fn start(&self) -> ModuleResult<()> {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return Err(ModuleError::InvalidStateError(
                "simulator already started".to_string(),
            ));
        }
        *task = Some(tokio::spawn(run_ticker(
            self.name.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.publisher),
            self.shutdown_token.clone(),
        )));
        info!(
            module = %self.name,
            interval_ms = self.config.interval_ms,
            kind = %self.config.kind,
            "Simulator started"
        );
        Ok(())
    }

    async fn receive(&self, message: Arc<Message>) -> ModuleResult<()> {
        debug!(
            module = %self.name,
            properties = ?message.properties(),
            "Simulator ignores inbound message"
        );
        Ok(())
    }

    async fn destroy(&self) -> ModuleResult<()> {
        self.shutdown_token.cancel();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            task.await
                .map_err(|e| ModuleError::RuntimeError(format!("simulator task failed: {e}")))?;
        }
        info!(module = %self.name, "Simulator destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatorFactory;
    use modhost_sdk::{ModuleFactory, ModuleInitContext, SubscriberId};
    use serde_json::json;

    #[derive(Debug, Default)]
    struct CapturingPublisher {
        sent: Mutex<Vec<Message>>,
    }

    impl CapturingPublisher {
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl BusPublisher for CapturingPublisher {
        fn publish(&self, message: Message) -> ModuleResult<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        fn publisher_id(&self) -> SubscriberId {
            SubscriberId(7)
        }
    }

    #[derive(Debug)]
    struct ClosedPublisher;

    impl BusPublisher for ClosedPublisher {
        fn publish(&self, _message: Message) -> ModuleResult<()> {
            Err(ModuleError::BusClosed)
        }

        fn publisher_id(&self) -> SubscriberId {
            SubscriberId(8)
        }
    }

    fn create(publisher: Arc<dyn BusPublisher>, interval_ms: u64) -> Box<dyn Module> {
        SimulatorFactory
            .create_module(ModuleInitContext {
                module_name: Some("src".to_string()),
                config: Some(Arc::new(json!({ "interval_ms": interval_ms }))),
                publisher,
            })
            .unwrap()
    }

    #[test]
    fn test_reading_shape() {
        let config = SimulatorConfig::default();
        let message = SimulatorModule::reading(&config, "src", 0);
        assert_eq!(message.property("type"), Some("temp"));
        assert_eq!(message.property("source"), Some("src"));
        assert_eq!(message.property("seq"), Some("0"));
        assert_eq!(message.payload().as_ref(), b"21.50");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_publishes_until_destroyed() {
        let publisher = Arc::new(CapturingPublisher::default());
        let module = create(publisher.clone(), 5);
        // Nothing is published before start.
        assert_eq!(publisher.count(), 0);

        module.start().await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while publisher.count() < 3 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(publisher.count() >= 3);

        module.destroy().await.unwrap();
        let after = publisher.count();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(publisher.count(), after);

        let sent = publisher.sent.lock().unwrap();
        let seqs: Vec<_> = sent.iter().map(|m| m.property("seq").unwrap()).collect();
        assert_eq!(seqs[..3], ["0", "1", "2"]);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let module = create(Arc::new(CapturingPublisher::default()), 1000);
        module.start().await.unwrap();
        assert!(matches!(
            module.start().await,
            Err(ModuleError::InvalidStateError(_))
        ));
        module.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_bus_stops_ticker() {
        let module = create(Arc::new(ClosedPublisher), 1);
        module.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // The ticker already exited on its own; destroy still succeeds.
        module.destroy().await.unwrap();
    }

    #[test]
    fn test_factory_rejects_bad_config() {
        let result = SimulatorFactory.create_module(ModuleInitContext {
            module_name: None,
            config: Some(Arc::new(json!({ "period": 0 }))),
            publisher: Arc::new(ClosedPublisher),
        });
        assert!(matches!(result, Err(ModuleError::ConfigurationError(_))));
    }
}
