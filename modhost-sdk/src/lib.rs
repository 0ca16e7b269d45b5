mod error;
mod loader;
mod macros;
mod message;
mod module;

/// Internal re-exports for use in generated symbols/macros to avoid version drift
pub mod export {
    pub use async_trait;
    pub use once_cell;
    pub use serde_json;
    pub use tokio;
    pub use tracing;
    pub use tracing_subscriber;
}

pub type ModuleResult<T> = Result<T, ModuleError>;

pub use error::ModuleError;
pub use loader::{LibraryLoader, ModuleBinary, ModuleDescriptor, ModuleLoader, StaticLoader};
pub use message::{Message, MessageBuilder};
pub use module::{
    BusPublisher, Module, ModuleConfig, ModuleFactory, ModuleInitContext, SubscriberId,
};

/// Public SDK constants for the loader and the export macro.
///
/// These constants are embedded via build.rs and gate dynamic loading.
pub mod sdk {
    /// Raw API version as string (from build.rs). Use `sdk_api_version()` to parse.
    pub const SDK_API_VERSION_STR: &str = env!("MODHOST_SDK_API_VERSION");
    /// SDK SemVer string (e.g., 0.1.0)
    pub const SDK_VERSION: &str = env!("MODHOST_SDK_VERSION");

    /// Parse the API version into u32 with safe fallback.
    pub fn sdk_api_version() -> u32 {
        SDK_API_VERSION_STR.parse::<u32>().unwrap_or(1)
    }
}
