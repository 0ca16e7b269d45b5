#![allow(dead_code)]

use async_trait::async_trait;
use modhost_sdk::{
    BusPublisher, Message, Module, ModuleError, ModuleFactory, ModuleInitContext, ModuleResult,
    StaticLoader,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Once},
    time::Duration,
};
use tracing::Level;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// One adapter call observed by the journal.
#[derive(Debug, Clone)]
pub enum Call {
    Create(String),
    Start(String),
    Receive(String, Arc<Message>),
    Destroy(String),
}

impl Call {
    pub fn module(&self) -> &str {
        match self {
            Call::Create(m) | Call::Start(m) | Call::Receive(m, _) | Call::Destroy(m) => m,
        }
    }
}

/// Shared record of every adapter call across all mock modules.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<Call>>>,
    publishers: Arc<Mutex<HashMap<String, Arc<dyn BusPublisher>>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn received(&self, module: &str) -> Vec<Arc<Message>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Receive(m, msg) if m == module => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn count_creates(&self, module: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(m) if m == module))
            .count()
    }

    pub fn count_destroys(&self, module: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Destroy(m) if m == module))
            .count()
    }

    /// Modules in the order their destroy was invoked.
    pub fn destroy_order(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Destroy(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn publisher(&self, module: &str) -> Arc<dyn BusPublisher> {
        self.publishers
            .lock()
            .unwrap()
            .get(module)
            .cloned()
            .unwrap_or_else(|| panic!("no publisher recorded for {module}"))
    }

    fn record_publisher(&self, module: &str, publisher: Arc<dyn BusPublisher>) {
        self.publishers
            .lock()
            .unwrap()
            .insert(module.to_string(), publisher);
    }
}

/// How a mock module reacts to calls.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub fail_create: bool,
    pub fail_start: bool,
    pub fail_receive: bool,
    pub panic_receive: bool,
    pub fail_destroy: bool,
    /// Publish a copy tagged with `hop` for every received message whose
    /// `hop` property is absent.
    pub echo: bool,
    pub receive_delay: Option<Duration>,
}

pub struct RecordingModule {
    name: String,
    journal: Journal,
    publisher: Arc<dyn BusPublisher>,
    behavior: Behavior,
}

#[async_trait]
impl Module for RecordingModule {
    async fn start(&self) -> ModuleResult<()> {
        self.journal.push(Call::Start(self.name.clone()));
        if self.behavior.fail_start {
            return Err(ModuleError::InitializationError("start refused".into()));
        }
        Ok(())
    }

    async fn receive(&self, message: Arc<Message>) -> ModuleResult<()> {
        if let Some(delay) = self.behavior.receive_delay {
            tokio::time::sleep(delay).await;
        }
        self.journal
            .push(Call::Receive(self.name.clone(), Arc::clone(&message)));

        if self.behavior.panic_receive {
            panic!("{} exploded", self.name);
        }
        if self.behavior.fail_receive {
            return Err(ModuleError::ExecutionError("cannot handle".into()));
        }
        if self.behavior.echo && message.property("hop").is_none() {
            let reply = Message::builder()
                .properties(message.properties().clone())
                .property("hop", self.name.clone())
                .payload(message.payload().clone())
                .build();
            self.publisher.publish(reply)?;
        }
        Ok(())
    }

    async fn destroy(&self) -> ModuleResult<()> {
        self.journal.push(Call::Destroy(self.name.clone()));
        if self.behavior.fail_destroy {
            return Err(ModuleError::ExecutionError("destroy failed".into()));
        }
        Ok(())
    }
}

pub struct RecordingFactory {
    label: String,
    journal: Journal,
    behavior: Behavior,
}

impl RecordingFactory {
    pub fn new(label: &str, journal: &Journal, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            journal: journal.clone(),
            behavior,
        })
    }
}

impl ModuleFactory for RecordingFactory {
    fn create_module(&self, ctx: ModuleInitContext) -> ModuleResult<Box<dyn Module>> {
        let name = ctx.module_name.clone().unwrap_or_else(|| self.label.clone());
        self.journal.push(Call::Create(name.clone()));
        if self.behavior.fail_create {
            return Err(ModuleError::ConfigurationError("bad config".into()));
        }
        self.journal
            .record_publisher(&name, Arc::clone(&ctx.publisher));
        Ok(Box::new(RecordingModule {
            name,
            journal: self.journal.clone(),
            publisher: ctx.publisher,
            behavior: self.behavior.clone(),
        }))
    }
}

/// Static loader with one recording factory per `(path, behavior)` pair.
pub fn loader(journal: &Journal, modules: &[(&str, Behavior)]) -> Arc<StaticLoader> {
    let loader = StaticLoader::new();
    for (path, behavior) in modules {
        let label = path.trim_end_matches(".mod");
        loader
            .register_factory(*path, RecordingFactory::new(label, journal, behavior.clone()))
            .unwrap();
    }
    Arc::new(loader)
}

pub fn reading(kind: &str, value: &'static [u8]) -> Message {
    Message::builder()
        .property("type", kind)
        .payload(value)
        .build()
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
