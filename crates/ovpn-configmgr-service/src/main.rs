//! OpenVPN 3 Configuration Manager Service
//!
//! Main entry point. Initializes the global allocator, loads the settings,
//! sets up logging, rehydrates persistent profiles and serves the
//! configuration manager on a Unix socket.

mod protocol;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ovpn_configmgr::{CallerRegistry, ConfigService, ServiceSettings};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::server::Server;

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Environment variable naming the settings file
const CONFIG_ENV: &str = "OVPN_CONFIGMGR_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    let settings = load_settings()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .init();

    info!("Configuration manager starting...");
    match &settings.state_dir {
        Some(dir) => info!("Persistent profiles in {}", dir.display()),
        None => info!("No state directory configured, persistence disabled"),
    }

    if settings.backend_uid == 0 {
        warn!("backend_uid is not configured, treating root as the VPN backend user");
    }

    // Only the backend user may own backend client names
    let registry = Arc::new(
        CallerRegistry::new()
            .reserve_prefix(settings.backend_name_prefix.clone(), settings.backend_uid),
    );
    let service = ConfigService::new(&settings, registry.clone())
        .context("initializing configuration store")?;
    info!("{} configuration profile(s) available", service.store().len());

    Server::new(service, registry).run(&settings.socket_path).await?;

    info!("Configuration manager shutting down");
    Ok(())
}

/// Settings from the file named on the command line or in the environment
fn load_settings() -> Result<ServiceSettings> {
    let path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os(CONFIG_ENV))
        .map(PathBuf::from);

    match path {
        Some(path) => ServiceSettings::from_file(&path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => Ok(ServiceSettings::default()),
    }
}
