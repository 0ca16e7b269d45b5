use clap::Parser;
use modhost_common::{apply_runtime_dir, Logger, ModuleSettings, Settings};
use modhost_core::{Gateway, GatewayEvent};
use modhost_error::HostResult;
use modhost_sdk::LibraryLoader;
use std::{env::current_dir, path::PathBuf, sync::Arc};
#[cfg(windows)]
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

const DEFAULT_CONFIG_FILE_NAME: &str = "modhost.toml";

/// modhost - embeddable module host
///
/// Loads the modules listed in the configuration file, wires them together
/// on one message bus and runs until a shutdown signal arrives.
#[derive(Parser)]
#[command(name = "modhost")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Module host", long_about = None)]
struct Cli {
    /// Sets a custom config file with full path
    ///
    /// If not specified, the host looks for 'modhost.toml' in the current
    /// working directory.
    #[arg(short, long, env = "MODHOST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> HostResult<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(p) => p,
        None => current_dir()?.join(DEFAULT_CONFIG_FILE_NAME),
    };

    // Settings first so runtime_dir applies before the log directory is created.
    let settings = Settings::new(&config_path.to_string_lossy())?;
    apply_runtime_dir(&settings.general.runtime_dir)?;

    let mut logger = Logger::new(Some(settings.general.level()?), &settings.general.log_dir);
    logger.initialize()?;
    info!(config = %config_path.display(), modules = settings.modules.len(), "Starting modhost");

    let gateway = Gateway::builder()
        .loader(Arc::new(LibraryLoader::new()))
        .bus_config(settings.bus.clone())
        .modules(settings.modules.iter().map(ModuleSettings::to_properties))
        .on_event(GatewayEvent::Created, |gw, _, _| {
            info!(gateway_id = %gw.id(), "Gateway is running");
        })
        .on_event(GatewayEvent::Destroyed, |gw, _, _| {
            info!(gateway_id = %gw.id(), "Gateway is gone");
        })
        .build()
        .await
        .inspect_err(|e| error!(error = %e, "Failed to create gateway"))?;

    for module in gateway.modules().await {
        info!(
            handle = %module.handle,
            name = module.name.as_deref().unwrap_or("-"),
            path = ?module.binary_path,
            version = module.descriptor.as_ref().map(|d| d.version.as_str()).unwrap_or("-"),
            "Module loaded"
        );
    }

    listen_for_shutdown().await?;

    gateway.destroy().await?;
    let metrics = gateway.bus().metrics().snapshot();
    info!(
        published = metrics.published,
        delivered = metrics.delivered,
        receive_errors = metrics.receive_errors,
        dropped = metrics.dropped,
        "Shutdown complete"
    );
    Ok(())
}

async fn listen_for_shutdown() -> HostResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigquit = signal(SignalKind::quit())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM signal"),
            _ = sigint.recv() => info!("Received SIGINT signal"),
            _ = sighup.recv() => info!("Received SIGHUP signal"),
            _ = sigquit.recv() => info!("Received SIGQUIT signal"),
        }
    }

    #[cfg(windows)]
    {
        ctrl_c().await?;
        info!("Received ctrl-c signal");
    }

    Ok(())
}
