use modhost_error::{HostError, HostResult};
use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::{subscriber::set_global_default, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    filter::DynFilterFn,
    fmt::{self},
    layer::SubscriberExt,
    Layer, Registry,
};

const LOG_FILE_PREFIX: &str = "modhost.log";

/// Process-wide logger: console output plus a daily rolling file, both
/// filtered by a level that can be changed at runtime.
pub struct Logger {
    level: Arc<Mutex<Level>>,
    log_dir: PathBuf,
    _file_guard: Option<WorkerGuard>,
}

impl Logger {
    pub fn new(level: Option<Level>, log_dir: impl Into<PathBuf>) -> Self {
        Logger {
            level: Arc::new(Mutex::new(level.unwrap_or(Level::INFO))),
            log_dir: log_dir.into(),
            _file_guard: None,
        }
    }

    /// Sets the new logging level. Takes effect for both layers immediately.
    #[inline]
    pub fn set_level(&self, new_level: Level) {
        let mut level = self.level.lock().unwrap();
        *level = new_level;
    }

    #[inline]
    pub fn level(&self) -> Level {
        *self.level.lock().unwrap()
    }

    /// Installs the console and file layers as the global subscriber.
    ///
    /// Fails if a global subscriber is already set.
    pub fn initialize(&mut self) -> HostResult<()> {
        let file_appender = rolling::daily(&self.log_dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        self._file_guard = Some(guard);

        let console_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| metadata.level() <= &*level.lock().unwrap())
        };
        let file_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| metadata.level() <= &*level.lock().unwrap())
        };

        let console_layer = {
            #[cfg(debug_assertions)]
            let layer = fmt::layer()
                .pretty()
                .with_writer(std::io::stdout)
                .with_file(true)
                .with_line_number(true);

            #[cfg(not(debug_assertions))]
            let layer = fmt::layer()
                .with_writer(std::io::stdout)
                .with_file(false)
                .with_line_number(false);

            layer.with_filter(console_filter)
        };

        let file_layer = {
            #[cfg(debug_assertions)]
            let layer = fmt::layer()
                .pretty()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true);

            #[cfg(not(debug_assertions))]
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(false)
                .with_line_number(false);

            layer.with_filter(file_filter)
        };

        let subscriber = Registry::default().with(console_layer).with(file_layer);
        set_global_default(subscriber)
            .map_err(|e| HostError::InitializationError(format!("Failed to set logger: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_defaults_and_updates() {
        let logger = Logger::new(None, "logs");
        assert_eq!(logger.level(), Level::INFO);

        logger.set_level(Level::TRACE);
        assert_eq!(logger.level(), Level::TRACE);
    }
}
