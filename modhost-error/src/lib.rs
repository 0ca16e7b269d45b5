use anyhow::Error as AnyhowError;
use config::ConfigError;
use serde_json::Error as SerdeJsonError;
use std::{error::Error as StdError, io::Error as IoError};
use thiserror::Error;
use tokio::task::JoinError;

pub type HostResult<T, E = HostError> = anyhow::Result<T, E>;

/// Errors surfaced by the module host.
///
/// The first five variants are the host's contract with callers; the rest wrap
/// ambient failures (settings, I/O, task joins) raised around it.
#[derive(Error, Debug)]
pub enum HostError {
    /// Malformed or duplicate module entry. No side effects were applied.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Bus/registry allocation failed, or a gateway could not be brought up.
    #[error("Initialization error: {0}")]
    InitializationError(String),
    /// The dynamic loader could not produce a module adapter.
    #[error("Failed to load module from '{path}': {reason}")]
    ModuleLoadError { path: String, reason: String },
    /// The module's own create call failed.
    #[error("Failed to create module '{module}': {reason}")]
    ModuleInitError { module: String, reason: String },
    /// Unknown, stale or foreign gateway/module handle.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Message bus is closed")]
    BusClosed,
    #[error("{0}")]
    IoError(#[from] IoError),
    #[error("{0}")]
    ConfigError(#[from] ConfigError),
    #[error("{0}")]
    Json(#[from] SerdeJsonError),
    #[error("{0}")]
    JoinError(#[from] JoinError),
    #[error("{0}")]
    Anyhow(#[from] AnyhowError),
    #[error("{0}")]
    Msg(String),
}

impl HostError {
    #[inline]
    pub fn invalid_handle(what: impl Into<String>) -> Self {
        HostError::InvalidHandle(what.into())
    }

    /// True for the error kinds that describe caller misuse rather than
    /// a runtime failure.
    #[inline]
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            HostError::InvalidArgument(_) | HostError::InvalidHandle(_)
        )
    }
}

impl From<String> for HostError {
    #[inline]
    fn from(e: String) -> Self {
        HostError::Msg(e)
    }
}

impl From<&str> for HostError {
    #[inline]
    fn from(e: &str) -> Self {
        HostError::Msg(e.to_string())
    }
}

impl From<Box<dyn StdError + Send + Sync>> for HostError {
    #[inline]
    fn from(e: Box<dyn StdError + Send + Sync>) -> Self {
        HostError::Msg(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let e = HostError::ModuleLoadError {
            path: "sink.mod".into(),
            reason: "file not found".into(),
        };
        assert_eq!(
            e.to_string(),
            "Failed to load module from 'sink.mod': file not found"
        );

        let e = HostError::ModuleInitError {
            module: "src".into(),
            reason: "bad config".into(),
        };
        assert_eq!(e.to_string(), "Failed to create module 'src': bad config");
    }

    #[test]
    fn test_programming_error_classification() {
        assert!(HostError::invalid_handle("module 3:1").is_programming_error());
        assert!(HostError::InvalidArgument("empty path".into()).is_programming_error());
        assert!(!HostError::BusClosed.is_programming_error());
        assert!(!HostError::from("boom").is_programming_error());
    }
}
