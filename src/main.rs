/// Main entry point for the subgraph feed service
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use subgraph_feed::{
    api::{self, ApiState},
    collector::{CollectorRegistry, IngestionOrchestrator},
    config::{display_zone, load_config},
    data::{ChartAggregator, SampleStore},
    subgraph::SubgraphClient,
    utils::RateLimiter,
    Config,
};

/// Application state
pub struct FeedApp {
    config: Arc<Config>,
    store: SampleStore,
    registry: Arc<CollectorRegistry>,
    orchestrator: IngestionOrchestrator,
    aggregator: ChartAggregator,
}

impl FeedApp {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let store = SampleStore::open(&config.database_path)
            .with_context(|| format!("Failed to open database {}", config.database_path))?;

        let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_sec));
        let client = SubgraphClient::new(
            config.subgraph_url.clone(),
            config.retry.clone(),
            Duration::from_secs(config.request_timeout_secs),
            limiter,
        )
        .context("Failed to build subgraph client")?;

        let registry = Arc::new(CollectorRegistry::new());
        let orchestrator = IngestionOrchestrator::from_config(
            &config,
            Arc::new(client),
            store.clone(),
            Arc::clone(&registry),
        );
        let aggregator = ChartAggregator::new(store.clone(), display_zone(&config)?);

        Ok(FeedApp {
            config,
            store,
            registry,
            orchestrator,
            aggregator,
        })
    }

    /// Backfill every token, then serve the read API while collectors poll
    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            "Tracking {} tokens from {}",
            self.config.tokens.len(),
            self.config.subgraph_url
        );

        self.orchestrator
            .start()
            .await
            .context("Startup backfill did not complete")?;
        info!("🚀 Backfill complete - starting API service and continuing to poll");

        let state = ApiState {
            aggregator: self.aggregator,
            registry: self.registry,
            store: self.store,
        };
        api::serve(&self.config.bind_address, state)
            .await
            .context("API server failed")?;

        Ok(())
    }
}

fn init_logging(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CONFIG_PATH").ok())
        .unwrap_or_else(|| "config.toml".to_string());

    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    init_logging(&config);
    info!("Configuration loaded from {}", config_path);

    let app = FeedApp::new(config)?;
    app.run().await
}
