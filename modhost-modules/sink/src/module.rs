use super::config::SinkConfig;
use async_trait::async_trait;
use modhost_sdk::{Message, Module, ModuleResult};
use serde::Serialize;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub accepted: u64,
    pub ignored: u64,
}

/// Terminal module: never publishes.
pub struct SinkModule {
    name: String,
    config: SinkConfig,
    history: Mutex<VecDeque<Arc<Message>>>,
    accepted: AtomicU64,
    ignored: AtomicU64,
}

impl SinkModule {
    pub fn new(name: String, config: SinkConfig) -> Self {
        Self {
            name,
            history: Mutex::new(VecDeque::with_capacity(config.history.min(1024))),
            config,
            accepted: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
        }
    }

    /// Kept messages, oldest first.
    pub fn history(&self) -> Vec<Arc<Message>> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }

    fn remember(&self, message: Arc<Message>) {
        if self.config.history == 0 {
            return;
        }
        let mut history = self.history.lock().unwrap();
        while history.len() >= self.config.history {
            history.pop_front();
        }
        history.push_back(message);
    }
}

#[async_trait]
impl Module for SinkModule {
    async fn receive(&self, message: Arc<Message>) -> ModuleResult<()> {
        if !self.config.accepts(message.property("type")) {
            self.ignored.fetch_add(1, Ordering::Relaxed);
            debug!(module = %self.name, kind = ?message.property("type"), "Message filtered out");
            return Ok(());
        }

        self.accepted.fetch_add(1, Ordering::Relaxed);
        if self.config.log_payload {
            info!(
                module = %self.name,
                properties = ?message.properties(),
                payload = %String::from_utf8_lossy(message.payload()),
                "Message received"
            );
        } else {
            info!(
                module = %self.name,
                properties = ?message.properties(),
                payload_len = message.payload().len(),
                "Message received"
            );
        }
        self.remember(message);
        Ok(())
    }

    async fn destroy(&self) -> ModuleResult<()> {
        let stats = self.stats();
        info!(
            module = %self.name,
            accepted = stats.accepted,
            ignored = stats.ignored,
            "Sink destroyed"
        );
        self.history.lock().unwrap().clear();
        Ok(())
    }
}
