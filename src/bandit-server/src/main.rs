//! Bandit server: online experiments (MAB, contextual MAB, A/B, Bayesian A/B)
//! over HTTP.
//!
//! Main entry point that wires the store, lifecycle service, auto-fail sweep
//! and REST server together.

use bandit_api::ApiServer;
use bandit_core::config::AppConfig;
use bandit_lifecycle::{AutoFailSweeper, ExperimentService, InMemoryStore};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "bandit-server")]
#[command(about = "Online experiments engine: bandits, A/B and Bayesian A/B tests")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "BANDIT__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "BANDIT__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Seed for the arm-sampling RNG (overrides config)
    #[arg(long, env = "BANDIT__ENGINE__RNG_SEED")]
    seed: Option<u64>,

    /// Disable the periodic auto-fail sweep
    #[arg(long, default_value_t = false)]
    no_auto_fail: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bandit_server=info,bandit_lifecycle=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Bandit server starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(seed) = cli.seed {
        config.engine.rng_seed = Some(seed);
    }
    if cli.no_auto_fail {
        config.auto_fail.enabled = false;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        auto_fail = config.auto_fail.enabled,
        bayes_ab_intercept = config.engine.bayes_ab_intercept,
        "Configuration loaded"
    );

    let store = Arc::new(InMemoryStore::new());
    let service = Arc::new(ExperimentService::new(store, config.engine.clone()));
    let sweeper = Arc::new(AutoFailSweeper::new(service.clone(), &config.auto_fail));

    let api_server = ApiServer::new(config.clone(), service);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    // Spawn auto-fail task
    if config.auto_fail.enabled {
        let interval_secs = config.auto_fail.interval_secs.max(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let sweeper = sweeper.clone();
                let result =
                    tokio::task::spawn_blocking(move || sweeper.sweep(chrono::Utc::now())).await;
                if let Err(e) = result {
                    error!(error = %e, "Auto-fail sweep panicked");
                }
            }
        });
        info!(interval_secs, "Auto-fail sweep scheduled");
    } else {
        info!("Auto-fail sweep disabled");
    }

    info!("Bandit server is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
