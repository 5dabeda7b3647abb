//! site-agent: answers resource check/cancel requests for one site.
//!
//! Binds a ROUTER socket on the site's endpoint from `config/eisenbahn.toml`
//! (or `--endpoint`) and reserves resources out of a fixed capacity.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Notify;
use tracing::{info, warn};

use fleet_core::config::load_dotenv;
use fleet_core::Config;
use fleet_eisenbahn::transport::Transport;
use fleet_eisenbahn::{EisenbahnConfig, ZmqRequestServer};
use fleet_scheduler::SiteResourceManager;

// ── CLI ─────────────────────────────────────────────────────────────

/// Fleet site agent: local resource reservations.
#[derive(Parser, Debug)]
#[command(name = "site-agent", version, about)]
struct Cli {
    /// Name of the site this agent serves.
    #[arg(long, env = "FLEET_SITE_NAME")]
    site: String,

    /// Path to eisenbahn.toml config file.
    #[arg(long, env = "EISENBAHN_CONFIG", default_value = "config/eisenbahn.toml")]
    config: String,

    /// Endpoint to bind, overriding the config entry for this site.
    #[arg(long, env = "FLEET_SITE_ENDPOINT")]
    endpoint: Option<String>,

    /// Resource capacity, e.g. `gpu=4,cpu=32`.
    #[arg(long, env = "FLEET_SITE_CAPACITY", value_parser = parse_capacity)]
    capacity: HashMap<String, f64>,
}

fn parse_capacity(raw: &str) -> Result<HashMap<String, f64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, amount) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected name=amount, got '{pair}'"))?;
            let amount: f64 = amount
                .trim()
                .parse()
                .map_err(|e| format!("invalid amount for '{name}': {e}"))?;
            if !amount.is_finite() || amount < 0.0 {
                return Err(format!("amount for '{name}' must be non-negative"));
            }
            Ok((name.trim().to_string(), amount))
        })
        .collect()
}

fn resolve_endpoint(cli: &Cli) -> anyhow::Result<Transport> {
    if let Some(endpoint) = &cli.endpoint {
        return Ok(Transport::parse(endpoint)?);
    }
    let bus = match EisenbahnConfig::from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, path = %cli.config, "failed to load config, using local defaults");
            EisenbahnConfig::local()
        }
    };
    bus.site_transport(&cli.site)
        .with_context(|| format!("no endpoint for site '{}'; pass --endpoint", cli.site))
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
    let scheduler_config = Config::from_env().scheduler;
    scheduler_config.validate()?;

    let transport = resolve_endpoint(&cli)?;
    let server = ZmqRequestServer::bind(&transport).await?;
    let manager = SiteResourceManager::new(cli.site.clone(), cli.capacity.clone()).with_topics(
        scheduler_config.check_resource_topic,
        scheduler_config.cancel_resource_topic,
    );
    info!(site = %cli.site, endpoint = %transport, capacity = ?manager.capacity(), "site-agent starting");

    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        signal.notify_one();
    });

    manager.serve(&server, shutdown).await?;
    info!(
        site = %cli.site,
        outstanding = manager.reservation_count(),
        "site-agent exited cleanly"
    );
    Ok(())
}
