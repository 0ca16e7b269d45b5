use crate::{
    sdk::{sdk_api_version, SDK_VERSION},
    ModuleError, ModuleFactory, ModuleResult,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Arc,
};

#[cfg(any(target_os = "linux", target_os = "macos"))]
use libloading::{Library, Symbol};

/// Static facts a module binary reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub api_version: u32,
    pub sdk_version: String,
}

/// A loaded module image and the factory it exported.
///
/// Field order matters: the factory is dropped before the library that
/// contains its code.
pub struct ModuleBinary {
    factory: Arc<dyn ModuleFactory>,
    path: PathBuf,
    descriptor: Option<ModuleDescriptor>,
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    library: Option<Library>,
}

impl Debug for ModuleBinary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleBinary")
            .field("path", &self.path)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl ModuleBinary {
    /// Wrap an in-process factory. Nothing is unloaded when this is dropped.
    pub fn from_factory(path: impl Into<PathBuf>, factory: Arc<dyn ModuleFactory>) -> Self {
        Self {
            factory,
            path: path.into(),
            descriptor: None,
            #[cfg(any(target_os = "linux", target_os = "macos"))]
            library: None,
        }
    }

    #[inline]
    pub fn factory(&self) -> &Arc<dyn ModuleFactory> {
        &self.factory
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn descriptor(&self) -> Option<&ModuleDescriptor> {
        self.descriptor.as_ref()
    }
}

/// Maps a module path to a loaded [`ModuleBinary`] and releases it again.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Load the module image at `path` and resolve its factory.
    async fn load(&self, path: &Path) -> ModuleResult<ModuleBinary>;

    /// Release a binary returned by `load`. Every module created from it
    /// must already be destroyed and dropped.
    async fn unload(&self, binary: ModuleBinary) {
        drop(binary);
    }
}

/// Loader for modules built as shared libraries with `modhost_module!`.
#[derive(Debug, Clone, Default)]
pub struct LibraryLoader;

impl LibraryLoader {
    pub fn new() -> Self {
        Self
    }

    /// Read the descriptor symbols of a library without creating a factory.
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    pub async fn probe(&self, path: &Path) -> ModuleResult<ModuleDescriptor> {
        let path_buf = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let library = open_library(&path_buf)?;
            extract_descriptor(&library, &path_buf)
        })
        .await
        .map_err(|e| ModuleError::LoadError(format!("Join error: {e}")))?
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    pub async fn probe(&self, _path: &Path) -> ModuleResult<ModuleDescriptor> {
        Err(unsupported_platform())
    }
}

#[async_trait]
impl ModuleLoader for LibraryLoader {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    async fn load(&self, path: &Path) -> ModuleResult<ModuleBinary> {
        tracing::info!("Loading module library: {}", path.display());

        let path_buf = path.to_path_buf();
        let binary = tokio::task::spawn_blocking(move || {
            let library = open_library(&path_buf)?;
            let descriptor = extract_descriptor(&library, &path_buf)?;

            let create_factory_fn: Symbol<unsafe extern "C" fn() -> *mut dyn ModuleFactory> =
                unsafe { library.get(b"modhost_create_module_factory") }.map_err(|e| {
                    ModuleError::LoadError(format!(
                        "Failed to find 'modhost_create_module_factory' symbol in {}: {e}",
                        path_buf.display()
                    ))
                })?;

            let factory_ptr = unsafe { create_factory_fn() };
            if factory_ptr.is_null() {
                return Err(ModuleError::LoadError(format!(
                    "Factory pointer was null from {}",
                    path_buf.display()
                )));
            }
            let factory_box: Box<dyn ModuleFactory> = unsafe { Box::from_raw(factory_ptr) };

            let init_tracing_fn: Symbol<unsafe extern "C" fn(bool)> =
                unsafe { library.get(b"modhost_module_init_tracing") }.map_err(|e| {
                    ModuleError::LoadError(format!(
                        "Failed to find 'modhost_module_init_tracing' symbol in {}: {e}",
                        path_buf.display()
                    ))
                })?;
            unsafe { init_tracing_fn(cfg!(debug_assertions)) }

            Ok(ModuleBinary {
                factory: Arc::from(factory_box),
                path: path_buf,
                descriptor: Some(descriptor),
                library: Some(library),
            })
        })
        .await
        .map_err(|e| ModuleError::LoadError(format!("Join error: {e}")))??;

        if let Some(d) = binary.descriptor() {
            tracing::info!(
                "Successfully loaded module library: name={} version={}",
                d.name,
                d.version
            );
        }
        Ok(binary)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    async fn load(&self, _path: &Path) -> ModuleResult<ModuleBinary> {
        Err(unsupported_platform())
    }

    async fn unload(&self, binary: ModuleBinary) {
        let path = binary.path.clone();
        // Closing a library may run its destructors; keep that off the runtime.
        if let Err(e) = tokio::task::spawn_blocking(move || drop(binary)).await {
            tracing::warn!(error=%e, "Failed to unload module library {}", path.display());
            return;
        }
        tracing::debug!("Unloaded module library: {}", path.display());
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn unsupported_platform() -> ModuleError {
    ModuleError::LoadError("Dynamic module loading not supported on this platform".to_string())
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn open_library(path: &Path) -> ModuleResult<Library> {
    if !path.exists() {
        return Err(ModuleError::LoadError(format!(
            "Module file not found: {}",
            path.display()
        )));
    }
    unsafe { Library::new(path) }.map_err(|e| {
        ModuleError::LoadError(format!("Failed to load library {}: {e}", path.display()))
    })
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
#[inline]
fn read_cstr(
    ptr: *const std::os::raw::c_char,
    label: &str,
    path: &Path,
) -> ModuleResult<String> {
    if ptr.is_null() {
        return Err(ModuleError::LoadError(format!(
            "Module symbol '{}' returned NULL in {}",
            label,
            path.display()
        )));
    }
    Ok(unsafe { std::ffi::CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned())
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn extract_descriptor(library: &Library, path: &Path) -> ModuleResult<ModuleDescriptor> {
    use std::os::raw::c_char;

    let api_version_fn: Symbol<unsafe extern "C" fn() -> u32> =
        unsafe { library.get(b"modhost_module_api_version") }.map_err(|e| {
            ModuleError::LoadError(format!(
                "Missing 'modhost_module_api_version' in {}: {e}",
                path.display()
            ))
        })?;
    let sdk_version_fn: Symbol<unsafe extern "C" fn() -> *const c_char> =
        unsafe { library.get(b"modhost_module_sdk_version") }.map_err(|e| {
            ModuleError::LoadError(format!(
                "Missing 'modhost_module_sdk_version' in {}: {e}",
                path.display()
            ))
        })?;
    let name_fn: Symbol<unsafe extern "C" fn() -> *const c_char> =
        unsafe { library.get(b"modhost_module_name") }.map_err(|e| {
            ModuleError::LoadError(format!(
                "Missing 'modhost_module_name' in {}: {e}",
                path.display()
            ))
        })?;
    let version_fn: Symbol<unsafe extern "C" fn() -> *const c_char> =
        unsafe { library.get(b"modhost_module_version") }.map_err(|e| {
            ModuleError::LoadError(format!(
                "Missing 'modhost_module_version' in {}: {e}",
                path.display()
            ))
        })?;

    let api_version = unsafe { api_version_fn() };
    if api_version != sdk_api_version() {
        return Err(ModuleError::LoadError(format!(
            "Module API version mismatch in {}: module={} host={}",
            path.display(),
            api_version,
            sdk_api_version()
        )));
    }

    let sdk_version = read_cstr(unsafe { sdk_version_fn() }, "modhost_module_sdk_version", path)?;
    if sdk_version != SDK_VERSION {
        tracing::warn!(
            "Module SDK version differs in {}: module={} host={}",
            path.display(),
            sdk_version,
            SDK_VERSION
        );
    }

    Ok(ModuleDescriptor {
        name: read_cstr(unsafe { name_fn() }, "modhost_module_name", path)?,
        version: read_cstr(unsafe { version_fn() }, "modhost_module_version", path)?,
        api_version,
        sdk_version,
    })
}

/// In-process loader resolving paths against registered factories.
///
/// Used for built-in modules and for hosts that link their modules
/// statically. Unload is a no-op beyond dropping the binary.
#[derive(Clone, Default)]
pub struct StaticLoader {
    registry: Arc<DashMap<PathBuf, Arc<dyn ModuleFactory>>>,
}

impl Debug for StaticLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let paths: Vec<PathBuf> = self.registry.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("StaticLoader").field("paths", &paths).finish()
    }
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a path. Fails if the path is taken.
    pub fn register_factory(
        &self,
        path: impl Into<PathBuf>,
        factory: Arc<dyn ModuleFactory>,
    ) -> ModuleResult<()> {
        use dashmap::mapref::entry::Entry;

        let path = path.into();
        match self.registry.entry(path) {
            Entry::Occupied(e) => Err(ModuleError::LoadError(format!(
                "Module path '{}' already registered",
                e.key().display()
            ))),
            Entry::Vacant(e) => {
                tracing::info!("Registered module factory: {}", e.key().display());
                e.insert(factory);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, path: &Path) -> bool {
        let removed = self.registry.remove(path).is_some();
        if removed {
            tracing::info!("Unregistered module factory: {}", path.display());
        }
        removed
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.registry.contains_key(path)
    }
}

#[async_trait]
impl ModuleLoader for StaticLoader {
    async fn load(&self, path: &Path) -> ModuleResult<ModuleBinary> {
        let factory = self
            .registry
            .get(path)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| {
                ModuleError::LoadError(format!("No module registered at '{}'", path.display()))
            })?;
        Ok(ModuleBinary::from_factory(path, factory))
    }
}
