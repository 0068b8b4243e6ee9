//! vayu-link monitor daemon
//!
//! Subscribes to the datarefs listed in the config file and logs every
//! change batch. Useful for watching panel datarefs live and for verifying
//! discovery and resubscription against a real simulator.

use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vayu_link::{AppConfig, ChangeSet, DatarefClient, Error, Result};

/// Parse config path from command line arguments.
///
/// Supports:
/// - `vayu-link <path>` (positional)
/// - `vayu-link --config <path>` (flag-based)
/// - `vayu-link -c <path>` (short flag)
///
/// Defaults to `/etc/vayulink.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/vayulink.toml".to_string()
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let have_config = Path::new(&config_path).exists();
    let config = if have_config {
        AppConfig::from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.clone()),
    )
    .init();

    log::info!("vayu-link v{} starting", vayu_link::VERSION);
    if have_config {
        log::info!("using config: {}", config_path);
    } else {
        log::warn!("config {} not found, using defaults", config_path);
    }

    let subscriptions = config.subscriptions()?;
    if subscriptions.is_empty() {
        log::warn!("no datarefs configured, monitoring connection only");
    }

    let mut client = DatarefClient::connect(subscriptions, config.client_options()?)?;

    client.add_observer(Box::new(|changes: &ChangeSet| {
        let mut parts: Vec<String> = changes
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        parts.sort();
        log::info!("changed: {}", parts.join("  "));
    }));

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("error setting Ctrl-C handler: {}", e)))?;

    log::info!("monitoring, press Ctrl-C to stop");

    let mut last_stats = Instant::now();
    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));

        if last_stats.elapsed().as_secs() >= 10 {
            match client.endpoint() {
                Some(endpoint) => log::info!(
                    "simulator {}: {}/{} datarefs known",
                    endpoint,
                    client.known_values(),
                    client.subscribed()
                ),
                None => log::info!("searching for simulator..."),
            }
            last_stats = Instant::now();
        }
    }

    client.shutdown();
    log::info!("vayu-link stopped");
    Ok(())
}
