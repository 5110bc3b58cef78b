mod cache;
mod config;
mod event;
mod host;
mod metadata;
mod paths;
mod persist;
mod playtime;
mod poll;
mod process_monitor;
mod reconcile;
mod registry;
mod scanner;
mod status;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::event::DaemonEvent;
use crate::host::HostRequest;
use crate::metadata::{GiantBombClient, MetadataResolver};

#[tokio::main]
async fn main() {
    // stdout carries the host stream; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = match paths::app_data_dir() {
        Ok(dir) => dir,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    };
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        error!(dir = %app_dir.display(), "Failed to create app data directory: {e}");
        std::process::exit(1);
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path(&app_dir);
    let config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        warn!("Config error, using defaults: {e:#}");
        config::Config::default()
    });
    let tick_interval = config.poll.effective_tick_interval();

    // ── Components ────────────────────────────────────────────────────────────
    let metadata_cache = cache::MetadataCache::open(paths::metadata_cache_file_path(&app_dir));
    if metadata_cache.is_empty() {
        info!("Metadata cache is empty; every ROM will be looked up");
    } else {
        info!(entries = metadata_cache.len(), "Metadata cache loaded");
    }
    let resolver = MetadataResolver::new(GiantBombClient::new(&config.metadata), metadata_cache);
    let playtime = playtime::PlaytimeStore::new(paths::game_times_file_path(&app_dir));
    let status = status::StatusFile::create(paths::status_file_path(&app_dir));

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);
    let (host_tx, host_rx) = mpsc::unbounded_channel();

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx.clone()));
    tokio::spawn(poll::run_ticker(tick_interval, event_tx.clone()));
    let writer = tokio::spawn(host::write_events(host_rx, tokio::io::stdout()));

    {
        let tx = event_tx.clone();
        let spawned = std::thread::Builder::new()
            .name("host-input".to_string())
            .spawn(move || host::read_requests(std::io::stdin().lock(), tx));
        if let Err(e) = spawned {
            error!("Failed to start host input thread: {e}");
            std::process::exit(1);
        }
    }

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }
    drop(event_tx);

    let mut poll = poll::PollLoop::new(config, resolver, playtime, status, host_tx);
    poll.refresh_library();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %app_dir.display(),
        tick_ms = tick_interval.as_millis() as u64,
        "romtrack daemon started"
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            DaemonEvent::Tick => poll.tick(),

            DaemonEvent::Host(HostRequest::Shutdown) | DaemonEvent::Shutdown => {
                info!("Shutting down");
                break;
            }

            DaemonEvent::Host(request) => poll.handle_request(request),

            DaemonEvent::ConfigReloaded(new_config) => {
                info!("Config reloaded");
                let lookup = GiantBombClient::new(&new_config.metadata);
                poll.reconfigure(new_config, lookup);
            }
        }
    }

    // Dropping the poll loop closes the last host sender, which ends the writer.
    poll.shutdown().await;
    if let Err(e) = writer.await {
        error!("Host writer failed: {e}");
    }
}
