//! scheduler-worker: admits submitted jobs onto the site fleet.
//!
//! Polls the artifact store for submitted jobs, negotiates resources with the
//! sites listed in `config/eisenbahn.toml`, and frees admission slots on
//! `eisenbahn.job.terminated` events.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{info, warn};

use fleet_core::config::load_dotenv;
use fleet_core::Config;
use fleet_eisenbahn::{EisenbahnConfig, ZmqSiteRequester, ZmqSubscriber};
use fleet_scheduler::{spawn_event_listener, Scheduler, SchedulingDriver};
use fleet_storage::FilesystemStorage;

// ── CLI ─────────────────────────────────────────────────────────────

/// Fleet scheduler worker: distributed job admission.
#[derive(Parser, Debug)]
#[command(name = "scheduler-worker", version, about)]
struct Cli {
    /// Path to eisenbahn.toml config file.
    #[arg(long, env = "EISENBAHN_CONFIG", default_value = "config/eisenbahn.toml")]
    config: String,

    /// Shutdown timeout in seconds.
    #[arg(long, env = "SCHEDULER_SHUTDOWN_TIMEOUT", default_value_t = 10)]
    shutdown_timeout: u64,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::from_env();
    config.validate()?;
    config.log_summary();

    let bus = match EisenbahnConfig::from_file(&cli.config) {
        Ok(cfg) => {
            info!(path = %cli.config, sites = cfg.sites.len(), "loaded eisenbahn config");
            cfg
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %cli.config,
                "failed to load config, using local defaults"
            );
            EisenbahnConfig::local()
        }
    };

    let requester = Arc::new(ZmqSiteRequester::from_config(&bus)?);
    let scheduler = Arc::new(
        Scheduler::builder(config.scheduler.clone())
            .requester(requester)
            .build()?,
    );
    let storage = Arc::new(FilesystemStorage::from_config(&config.storage)?);
    let driver = Arc::new(SchedulingDriver::from_config(
        Arc::clone(&scheduler),
        storage,
        &config,
    ));

    let shutdown = Arc::new(Notify::new());

    let subscriber = ZmqSubscriber::connect(&bus.events_transport()?).await?;
    let listener = spawn_event_listener(subscriber, Arc::clone(&driver), Arc::clone(&shutdown)).await?;

    let driver_task = {
        let driver = Arc::clone(&driver);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { driver.run(shutdown).await })
    };

    info!("scheduler-worker started");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown.notify_waiters();

    let drained = tokio::time::timeout(Duration::from_secs(cli.shutdown_timeout), async {
        if let Err(e) = driver_task.await {
            warn!(error = %e, "driver task panicked");
        }
        match listener.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "event listener ended with error"),
            Err(e) => warn!(error = %e, "event listener panicked"),
        }
    })
    .await;
    if drained.is_err() {
        warn!(timeout_secs = cli.shutdown_timeout, "tasks did not stop in time");
    }

    let metrics = serde_json::to_string(&scheduler.metrics())?;
    info!(metrics = %metrics, "scheduler-worker exited cleanly");
    Ok(())
}
