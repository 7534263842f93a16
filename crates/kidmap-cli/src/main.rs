//! KidMap CLI - drives the safety core from a terminal.
//!
//! Refreshes transit data for regions, replays recorded geofence events into
//! the parental store, and inspects or manages the persisted parental state.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use chrono::{Local, Utc};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kidmap_core::cache::DiskBackend;
use kidmap_core::models::{GeofenceEvent, TransitDataset};
use kidmap_core::parental::{KeyringSecretStore, ParentAuth};
use kidmap_core::{
    Config, GeofenceEventBus, ParentalSafetyStore, RegionDataCache, TransitApiClient,
    TransitDataUpdater,
};

/// KidMap - child-safety core driver
#[derive(Parser, Debug)]
#[command(name = "kidmap", version, about)]
struct Cli {
    /// Also write logs at info and above to this file, rotated daily
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh transit data (default: all configured regions)
    Update {
        /// Region ids to refresh
        regions: Vec<String>,
    },
    /// Feed recorded geofence events into the parental store
    Replay {
        /// JSON array of geofence events
        events: PathBuf,
    },
    /// Show safe zones, check-in requests and device pings
    Status,
    /// Acknowledge a pending check-in request
    Ack {
        request_id: String,
    },
    /// Expire overdue check-in requests now
    Expire,
    /// Set the parent-mode PIN
    SetPin,
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, filtered by `RUST_LOG` (default `warn`). With a log
/// file, everything at `info` and above is also written to a daily file.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .context("--log-file needs a file name")?;
            let appender = tracing_appender::rolling::daily(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new("info"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_filter(filter))
        .with(file_layer)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;

    let config = Config::load()?;
    info!(command = ?cli.command, "kidmap starting");

    match cli.command {
        Command::Update { regions } => update(&config, &regions).await,
        Command::Replay { events } => replay(&config, &events),
        Command::Status => status(&config),
        Command::Ack { request_id } => acknowledge(&config, &request_id),
        Command::Expire => expire(&config),
        Command::SetPin => set_pin(),
    }
}

async fn update(config: &Config, regions: &[String]) -> Result<()> {
    let base_url = config
        .transit_base_url
        .as_deref()
        .context("No transit adapter configured. Set KIDMAP_TRANSIT_URL or transit_base_url")?;

    let mut client = TransitApiClient::new(base_url)?;
    if let Some(header) = config.transit_api_key_header.as_deref() {
        client = client.with_api_key_header(header);
    }
    if let Some(key) = config.transit_api_key() {
        client = client.with_api_key(key);
    }
    let client = client.with_regions(config.regions.iter().cloned());

    let backend = DiskBackend::<TransitDataset>::new(config.regions_cache_dir()?)?;
    let cache = RegionDataCache::<TransitDataset>::new(config.cache_capacity.max(1))
        .with_backend(Arc::new(backend));
    let cache = Arc::new(cache);
    let warmed = cache.warm_start()?;
    info!(entries = warmed, "Region cache warmed");

    let region_ids: Vec<String> = if regions.is_empty() {
        config.regions.iter().map(|r| r.id.clone()).collect()
    } else {
        regions.to_vec()
    };
    if region_ids.is_empty() {
        bail!("No regions given and none configured");
    }

    let updater = TransitDataUpdater::new(Arc::new(client), cache, config.updater_config());
    let results = updater.update_all_regions(region_ids.as_slice()).await;

    let mut failures = 0;
    for (region, result) in results {
        let name = config.region(&region).map(|r| r.name.as_str()).unwrap_or(&region);
        match result {
            Ok(dataset) => {
                let age = updater
                    .cache()
                    .age_display(&region)
                    .unwrap_or_else(|| "unknown".to_string());
                println!(
                    "✓ {}: version {}, {} routes, {} alerts (cached {})",
                    name,
                    dataset.version,
                    dataset.route_count(),
                    dataset.alerts.len(),
                    age
                );
            }
            Err(e) => {
                failures += 1;
                match updater.cached(&region) {
                    Some(stale) => println!("✗ {}: {} (keeping version {})", name, e, stale.version),
                    None => println!("✗ {}: {}", name, e),
                }
            }
        }
    }

    if failures > 0 {
        bail!("{} region(s) failed to update", failures);
    }
    Ok(())
}

fn load_store(config: &Config) -> Result<(ParentalSafetyStore, PathBuf)> {
    let path = config.parental_state_path()?;
    let store = ParentalSafetyStore::load_or_default(&path)?;
    Ok((store, path))
}

fn replay(config: &Config, events_path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(events_path)
        .with_context(|| format!("Failed to read {}", events_path.display()))?;
    let events: Vec<GeofenceEvent> =
        serde_json::from_str(&contents).context("Failed to parse geofence events")?;

    let (store, state_path) = load_store(config)?;
    let store = Arc::new(store);
    let bus = GeofenceEventBus::new();
    let subscription = store.attach(&bus);

    for event in &events {
        bus.publish(event);
    }
    subscription.unsubscribe();

    store.save_to(&state_path)?;
    println!(
        "Replayed {} event(s): {} pending check-in(s), {} active zone(s)",
        events.len(),
        store.pending_request_count(),
        store.active_zone_count()
    );
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let (store, _) = load_store(config)?;
    let snapshot = store.snapshot();

    println!(
        "Monitoring: {}",
        if snapshot.monitoring_armed { "armed" } else { "paused" }
    );
    println!("Safe zones ({} active):", snapshot.active_zone_count());
    for zone in &snapshot.safe_zones {
        let marker = if zone.is_active { "●" } else { "○" };
        println!("  {} {} [{}]", marker, zone.name, zone.id);
    }

    println!("Check-in requests ({} pending):", snapshot.pending_request_count());
    for request in snapshot.check_in_requests.iter().rev() {
        println!(
            "  {:<12} {} {}{} [{}]",
            request.status.to_string(),
            request.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            request.region_id,
            if request.is_urgent { " (urgent)" } else { "" },
            request.id
        );
    }

    if !snapshot.device_pings.is_empty() {
        println!("Device pings ({} pending):", snapshot.pending_ping_count());
        for ping in snapshot.device_pings.iter().rev() {
            println!(
                "  {:<12} {} {:?} [{}]",
                ping.status.to_string(),
                ping.requested_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                ping.kind,
                ping.id
            );
        }
    }

    if let Some(last) = &snapshot.last_known_location {
        println!(
            "Last seen: {:.5}, {:.5}{} at {}",
            last.location.latitude,
            last.location.longitude,
            last.place_name.as_deref().map(|p| format!(" ({})", p)).unwrap_or_default(),
            last.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
    }

    if let Some(contact) = snapshot.settings.primary_contact() {
        println!("Primary contact: {} ({})", contact.name, contact.relationship);
    }
    Ok(())
}

fn acknowledge(config: &Config, request_id: &str) -> Result<()> {
    let (store, path) = load_store(config)?;
    let request = store.acknowledge(request_id)?;
    store.save_to(&path)?;
    println!("Acknowledged check-in for {}", request.region_id);
    Ok(())
}

fn expire(config: &Config) -> Result<()> {
    let (store, path) = load_store(config)?;
    store.update_settings(|s| s.check_in_timeout_secs = config.check_in_timeout_secs);
    let expired = store.expire_overdue(Utc::now());
    store.save_to(&path)?;
    println!("Expired {} check-in request(s)", expired.len());
    Ok(())
}

fn set_pin() -> Result<()> {
    let pin = rpassword::prompt_password("New PIN (4-6 digits): ")?;
    let confirm = rpassword::prompt_password("Confirm PIN: ")?;
    if pin != confirm {
        bail!("PINs do not match");
    }

    let auth = ParentAuth::new(Arc::new(KeyringSecretStore::default()));
    auth.set_pin(pin.trim())?;
    println!("Parent PIN updated");
    Ok(())
}
