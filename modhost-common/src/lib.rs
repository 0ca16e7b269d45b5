//! Host-side plumbing shared by the `modhost` executable: settings loading,
//! logger setup and runtime directory handling.
mod logger;
mod settings;

pub use logger::Logger;
pub use settings::{General, Inner, ModuleSettings, Settings};

use modhost_error::{HostError, HostResult};

/// Switch the process working directory to `runtime_dir`, creating it if
/// needed. `""` and `"."` leave the working directory unchanged.
pub fn apply_runtime_dir(runtime_dir: &str) -> HostResult<()> {
    let dir = runtime_dir.trim();
    if dir.is_empty() || dir == "." {
        return Ok(());
    }

    std::fs::create_dir_all(dir).map_err(|e| {
        HostError::InitializationError(format!("Failed to create runtime_dir {dir}: {e}"))
    })?;
    std::env::set_current_dir(dir).map_err(|e| {
        HostError::InitializationError(format!(
            "Failed to set current_dir to runtime_dir {dir}: {e}"
        ))
    })?;
    Ok(())
}
