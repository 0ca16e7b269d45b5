use thiserror::Error;

/// Errors raised by module code and by the module loaders.
#[derive(Error, Debug, Default)]
pub enum ModuleError {
    #[error("Service unavailable")]
    #[default]
    ServiceUnavailable,
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Initialization error: {0}")]
    InitializationError(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Invalid state error: {0}")]
    InvalidStateError(String),
    #[error("Load error: {0}")]
    LoadError(String),
    /// The bus this publisher was bound to has been closed or dropped.
    #[error("Message bus is closed")]
    BusClosed,
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

impl From<serde_json::Error> for ModuleError {
    #[inline]
    fn from(e: serde_json::Error) -> Self {
        ModuleError::ConfigurationError(e.to_string())
    }
}

impl From<String> for ModuleError {
    #[inline]
    fn from(e: String) -> Self {
        ModuleError::ExecutionError(e)
    }
}

impl From<&str> for ModuleError {
    #[inline]
    fn from(e: &str) -> Self {
        ModuleError::ExecutionError(e.to_string())
    }
}
