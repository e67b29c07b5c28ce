//! lcdlink: entry point.
//!
//! ```text
//! lcdlink                       Drive every configured panel (foreground)
//! lcdlink --config <path>       Load a custom config TOML
//! lcdlink --gen-config          Write default config to stdout
//! lcdlink --list-devices        Show attached USB devices and known panels
//! lcdlink --list-profiles       Show the built-in panel registry
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lcdlink_core::{DeviceProfile, ProfileRegistry, RusbBackend, UsbBackend, UsbDeviceInfo};
use lcdlink_service::config::ServiceConfig;
use lcdlink_service::service::LcdService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "lcdlink", about = "Drive USB LCD panels from images, video and windows")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "lcdlink.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// List attached USB devices and the panel profile each one matches.
    #[arg(long)]
    list_devices: bool,

    /// List the built-in panel profiles.
    #[arg(long)]
    list_profiles: bool,

    /// Print listings as JSON.
    #[arg(long)]
    json: bool,
}

/// One row of `--list-devices`.
#[derive(Serialize)]
struct DeviceListing<'a> {
    #[serde(flatten)]
    info: UsbDeviceInfo,
    profile: Option<&'a DeviceProfile>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", ServiceConfig::default().to_toml()?);
        return Ok(());
    }

    let registry = Arc::new(ProfileRegistry::builtin());

    if cli.list_profiles {
        list_profiles(&registry, cli.json)?;
        return Ok(());
    }

    if cli.list_devices {
        let backend = RusbBackend::new()?;
        list_devices(&backend, &registry, cli.json)?;
        return Ok(());
    }

    // Load config.
    let config = ServiceConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("lcdlink v{}", env!("CARGO_PKG_VERSION"));
    info!("config: {}", cli.config.display());
    info!("known panels: {}", registry.len());

    let backend: Arc<dyn UsbBackend> = Arc::new(RusbBackend::new()?);
    let mut service = LcdService::new(config, Some(cli.config), registry, backend);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received; shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}

// ── Listings ─────────────────────────────────────────────────────

fn list_profiles(registry: &ProfileRegistry, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let profiles: Vec<&DeviceProfile> = registry.iter().collect();
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }
    for p in registry.iter() {
        let resolutions: Vec<String> = p.resolutions.iter().map(|r| r.to_string()).collect();
        println!(
            "{}  {:<28} {:<14} {}",
            p.id,
            p.name,
            p.variant.tag(),
            resolutions.join(", ")
        );
    }
    Ok(())
}

fn list_devices(
    backend: &dyn UsbBackend,
    registry: &ProfileRegistry,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let devices = backend.enumerate()?;
    let rows: Vec<DeviceListing<'_>> = devices
        .into_iter()
        .map(|info| DeviceListing {
            info,
            profile: registry.lookup(info.id),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for row in &rows {
        let profile = row.profile.map_or("-", |p| p.name.as_str());
        println!(
            "bus {:03} addr {:03}  {}  {}",
            row.info.bus, row.info.address, row.info.id, profile
        );
    }
    let supported = rows.iter().filter(|r| r.profile.is_some()).count();
    println!("{supported} supported panel(s) attached");
    Ok(())
}
