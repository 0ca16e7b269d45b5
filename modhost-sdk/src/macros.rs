/// Define and export a module factory for dynamic loading.
///
/// This macro generates the C ABI symbols the host's `LibraryLoader` resolves
/// (API version gate, descriptor strings, factory constructor and tracing
/// initialisation). All module code runs on a runtime owned by the library
/// itself, so a module never depends on the host's tokio instance.
///
/// Usage in a module crate built as `cdylib`:
///
/// ```ignore
/// use modhost_sdk::{modhost_module, Module, ModuleFactory};
///
/// #[derive(Default)]
/// pub struct SinkFactory;
/// impl ModuleFactory for SinkFactory { /* ... */ }
///
/// modhost_module!(name = "sink", factory = SinkFactory);
///
/// // Or with an explicit constructor
/// modhost_module!(name = "sink", factory = SinkFactory, factory_ctor = SinkFactory::new);
/// ```
#[macro_export]
macro_rules! modhost_module {
    (@core name = $name:expr, factory = $factory:ty, factory_ctor = $ctor:expr) => {
        #[no_mangle]
        pub extern "C" fn modhost_module_api_version() -> u32 {
            $crate::sdk::sdk_api_version()
        }

        #[no_mangle]
        pub extern "C" fn modhost_module_sdk_version() -> *const ::std::os::raw::c_char {
            static SDK_VER: $crate::export::once_cell::sync::Lazy<::std::ffi::CString> = {
                use $crate::export::once_cell::sync::Lazy;
                Lazy::new(|| ::std::ffi::CString::new($crate::sdk::SDK_VERSION).unwrap_or_default())
            };
            SDK_VER.as_ptr()
        }

        #[no_mangle]
        pub extern "C" fn modhost_module_version() -> *const ::std::os::raw::c_char {
            static VER: $crate::export::once_cell::sync::Lazy<::std::ffi::CString> = {
                use $crate::export::once_cell::sync::Lazy;
                Lazy::new(|| ::std::ffi::CString::new(env!("CARGO_PKG_VERSION")).unwrap_or_default())
            };
            VER.as_ptr()
        }

        #[no_mangle]
        pub extern "C" fn modhost_module_name() -> *const ::std::os::raw::c_char {
            static NAME_STR: $crate::export::once_cell::sync::Lazy<::std::ffi::CString> = {
                use $crate::export::once_cell::sync::Lazy;
                Lazy::new(|| ::std::ffi::CString::new($name).unwrap_or_default())
            };
            NAME_STR.as_ptr()
        }

        // Runs every call of the inner module on this library's runtime and
        // reports panics back to the host as errors.
        struct RuntimeAwareModule {
            inner: ::std::sync::Arc<Box<dyn $crate::Module>>,
        }

        impl RuntimeAwareModule {
            async fn run_on_runtime<F, Fut>(&self, op: &'static str, f: F) -> $crate::ModuleResult<()>
            where
                F: FnOnce(::std::sync::Arc<Box<dyn $crate::Module>>) -> Fut,
                Fut: ::std::future::Future<Output = $crate::ModuleResult<()>> + Send + 'static,
            {
                let fut = f(self.inner.clone());
                let (tx, rx) = $crate::export::tokio::sync::oneshot::channel();
                MODHOST_RUNTIME.handle().spawn(async move {
                    let _ = tx.send(fut.await);
                });
                match rx.await {
                    Ok(res) => res,
                    Err(_) => Err($crate::ModuleError::RuntimeError(format!(
                        "Module {} task aborted",
                        op
                    ))),
                }
            }
        }

        #[$crate::export::async_trait::async_trait]
        impl $crate::Module for RuntimeAwareModule {
            async fn start(&self) -> $crate::ModuleResult<()> {
                self.run_on_runtime("start", |m| async move { m.start().await })
                    .await
            }

            async fn receive(
                &self,
                message: ::std::sync::Arc<$crate::Message>,
            ) -> $crate::ModuleResult<()> {
                self.run_on_runtime("receive", move |m| async move { m.receive(message).await })
                    .await
            }

            async fn destroy(&self) -> $crate::ModuleResult<()> {
                self.run_on_runtime("destroy", |m| async move { m.destroy().await })
                    .await
            }
        }

        struct RuntimeAwareFactory {
            inner: Box<dyn $crate::ModuleFactory>,
        }

        impl $crate::ModuleFactory for RuntimeAwareFactory {
            fn create_module(
                &self,
                ctx: $crate::ModuleInitContext,
            ) -> $crate::ModuleResult<Box<dyn $crate::Module>> {
                let _guard = MODHOST_RUNTIME.enter();
                let inner = self.inner.create_module(ctx)?;
                Ok(Box::new(RuntimeAwareModule {
                    inner: ::std::sync::Arc::new(inner),
                }))
            }
        }

        #[no_mangle]
        pub extern "C" fn modhost_create_module_factory() -> *mut dyn $crate::ModuleFactory {
            let inner: Box<dyn $crate::ModuleFactory> = Box::new(($ctor)());
            let wrapper: Box<dyn $crate::ModuleFactory> = Box::new(RuntimeAwareFactory { inner });
            Box::into_raw(wrapper)
        }

        #[doc(hidden)]
        pub static MODHOST_RUNTIME: $crate::export::once_cell::sync::Lazy<$crate::export::tokio::runtime::Runtime> = {
            use $crate::export::once_cell::sync::Lazy;
            Lazy::new(|| {
                $crate::export::tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .thread_name(concat!($name, "-module"))
                    .build()
                    .expect("build module runtime")
            })
        };

        /// Initialize tracing for this module library.
        #[no_mangle]
        pub extern "C" fn modhost_module_init_tracing(debug: bool) {
            use $crate::export::tracing::Level;
            use $crate::export::tracing_subscriber::fmt;

            if debug {
                let _ = fmt()
                    .pretty()
                    .with_line_number(true)
                    .with_file(true)
                    .with_max_level(Level::DEBUG)
                    .try_init();
            } else {
                let _ = fmt()
                    .with_line_number(false)
                    .with_file(false)
                    .with_max_level(Level::INFO)
                    .try_init();
            };
        }
    };

    // Public API: explicit constructor
    (name = $name:expr, factory = $factory:ty, factory_ctor = $ctor:expr $(,)?) => {
        $crate::modhost_module!(@core name = $name, factory = $factory, factory_ctor = $ctor);
    };

    // Public API: default constructor
    (name = $name:expr, factory = $factory:ty $(,)?) => {
        $crate::modhost_module!(
            @core name = $name,
            factory = $factory,
            factory_ctor = || <$factory as ::core::default::Default>::default()
        );
    };
}
