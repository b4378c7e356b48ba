//! Process entry point for the content synchronizer.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod health;

const HEALTH_PORT: u16 = 8080;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Scheduled multi-source content synchronizer for Open WebUI knowledge
/// bases.
#[derive(Parser)]
#[command(
    name = "openwebui-sync",
    about = "Sync documents from GitHub, Confluence, Jira, Slack, and local folders into Open WebUI knowledge bases",
    version
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load(&cli.config).context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone())),
        )
        .init();

    info!(config = %cli.config.display(), "Starting content synchronizer");

    let adapter_set = adapters::build_enabled(&cfg, &cfg.storage.path)
        .context("failed to construct adapters")?;
    if adapter_set.is_empty() {
        warn!("No adapters enabled; cycles will only reconcile orphans");
    } else {
        for adapter in &adapter_set {
            info!(adapter = adapter.name(), "Adapter enabled");
        }
    }

    let client = openwebui::create_http_client(&cfg.openwebui, &cfg.retry)
        .context("failed to construct downstream client")?;
    let fallback = (!cfg.openwebui.knowledge_id.is_empty())
        .then(|| cfg.openwebui.knowledge_id.clone());
    let mut manager = sync::SyncManager::new(client, &cfg.storage.path, fallback)
        .context("failed to initialize sync manager")?;

    let cancel = CancellationToken::new();
    let health_task = tokio::spawn(health::serve(HEALTH_PORT, cancel.clone()));

    // Rebind index keys to existing downstream artifacts before the first
    // cycle; a failure here is survivable, the local index still applies.
    let knowledge_ids = cfg.referenced_knowledge_ids();
    match manager.initialize_index(&knowledge_ids, &cancel).await {
        Ok(count) => info!(entries = count, "Index re-import complete"),
        Err(e) => error!(error = %e, "Index re-import failed, continuing with local index"),
    }

    let scheduler = sync::Scheduler::new(
        cfg.schedule.interval(),
        cfg.schedule.cycle_timeout(),
        adapter_set,
    );
    let scheduler_cancel = cancel.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(&mut manager, &scheduler_cancel).await;
    });

    shutdown_signal().await;
    info!("Shutdown signal received, finishing in-flight work (send again to force)");
    cancel.cancel();

    tokio::select! {
        _ = scheduler_task => {
            info!("Graceful shutdown completed");
        }
        _ = shutdown_signal() => {
            warn!("Forced shutdown");
            std::process::exit(1);
        }
        _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
            warn!("Timed out waiting for the current cycle, exiting");
        }
    }

    health_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
