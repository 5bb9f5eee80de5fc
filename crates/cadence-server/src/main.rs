mod gateway;
mod notifier;

use std::path::Path;
use std::sync::Arc;

use cadence_core::{CadenceConfig, Collaborators, IngestScheduler, RocksDbStorage};
use tracing::info;

use gateway::HttpFetcher;
use notifier::RevokingNotifier;

fn load_config() -> CadenceConfig {
    let paths = ["cadence.toml", "/etc/cadence/cadence.toml"];

    for path in &paths {
        if Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("error parsing {path}: {e}");
                        std::process::exit(1);
                    }
                },
                Err(e) => {
                    eprintln!("error reading {path}: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    CadenceConfig::default()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tracing depends on the telemetry section, so config is loaded first.
    let config = load_config();
    cadence_core::telemetry::init_tracing(&config.telemetry);

    let data_dir = std::env::var("CADENCE_DATA_DIR")
        .unwrap_or_else(|_| config.storage.data_dir.clone());
    let storage = Arc::new(RocksDbStorage::open(&data_dir)?);
    info!(%data_dir, "storage opened");

    let fetcher = Arc::new(HttpFetcher::new(config.upstream.base_url.clone())?);
    let notifier = Arc::new(RevokingNotifier::new(Arc::clone(&storage)));

    let scheduler = IngestScheduler::new(
        &config,
        Collaborators {
            fetcher,
            store: storage,
            notifier,
        },
    );

    let report = scheduler.recover()?;
    info!(
        polling = report.polling,
        streaming = report.streaming,
        upstream = %config.upstream.base_url,
        "starting ingestion"
    );
    scheduler.start()?;

    shutdown_signal().await;

    scheduler.shutdown().await?;
    info!("scheduler stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                eprintln!("failed to install SIGTERM handler: {e}");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    info!("received shutdown signal");
}
