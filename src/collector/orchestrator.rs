/// Ingestion orchestrator
///
/// Spawns one collector task per tracked token and holds the extra barrier
/// ticket standing for the read endpoint. `start` returns only after every
/// collector has finished its backfill.
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::barrier::{BarrierWaiter, StartupBarrier};
use super::registry::{CollectorRegistry, CollectorStatus};
use super::token_collector::{CollectorSettings, TokenCollector};
use crate::data::SampleStore;
use crate::error::{FeedError, Result};
use crate::subgraph::HourDataSource;
use crate::types::{Config, TrackedToken};

#[derive(Debug, Clone)]
pub struct BarrierSettings {
    /// Interval between "still waiting" reports
    pub warn_every: Duration,
    /// Give up waiting after this long; `None` waits forever
    pub deadline: Option<Duration>,
}

impl BarrierSettings {
    pub fn from_config(config: &Config) -> Self {
        BarrierSettings {
            warn_every: Duration::from_secs(config.barrier_warn_secs),
            deadline: config.barrier_deadline_secs.map(Duration::from_secs),
        }
    }
}

pub struct IngestionOrchestrator {
    tokens: Vec<TrackedToken>,
    source: Arc<dyn HourDataSource>,
    store: SampleStore,
    registry: Arc<CollectorRegistry>,
    collector_settings: CollectorSettings,
    barrier_settings: BarrierSettings,
}

impl IngestionOrchestrator {
    pub fn new(
        tokens: Vec<TrackedToken>,
        source: Arc<dyn HourDataSource>,
        store: SampleStore,
        registry: Arc<CollectorRegistry>,
        collector_settings: CollectorSettings,
        barrier_settings: BarrierSettings,
    ) -> Self {
        IngestionOrchestrator {
            tokens,
            source,
            store,
            registry,
            collector_settings,
            barrier_settings,
        }
    }

    pub fn from_config(
        config: &Config,
        source: Arc<dyn HourDataSource>,
        store: SampleStore,
        registry: Arc<CollectorRegistry>,
    ) -> Self {
        Self::new(
            config.tokens.clone(),
            source,
            store,
            registry,
            CollectorSettings::from_config(config),
            BarrierSettings::from_config(config),
        )
    }

    /// Spawn every collector and wait until all of them reach the barrier
    pub async fn start(&self) -> Result<()> {
        let mut tickets = StartupBarrier::with_parties(self.tokens.len() + 1);
        let endpoint_ticket = tickets
            .pop()
            .ok_or_else(|| FeedError::InternalError("Barrier issued no tickets".to_string()))?;

        for token in &self.tokens {
            self.registry.register(token).await;
        }

        let mut tasks = FuturesUnordered::new();
        for (token, ticket) in self.tokens.iter().zip(tickets) {
            let collector = TokenCollector::new(
                token.clone(),
                Arc::clone(&self.source),
                self.store.clone(),
                Arc::clone(&self.registry),
                self.collector_settings.clone(),
            );
            let name = token.name.clone();
            let handle = tokio::spawn(collector.run(ticket));
            tasks.push(async move { (name, handle.await) });
        }
        info!("🚀 Spawned {} collectors, backfilling", self.tokens.len());

        tokio::spawn(async move {
            while let Some((name, outcome)) = tasks.next().await {
                report_exit(&name, outcome);
            }
        });

        let mut waiter = endpoint_ticket.arrive();
        self.wait_for_collectors(&mut waiter).await
    }

    async fn wait_for_collectors(&self, waiter: &mut BarrierWaiter) -> Result<()> {
        let started = Instant::now();

        loop {
            let step = match self.barrier_settings.deadline {
                Some(deadline) => self
                    .barrier_settings
                    .warn_every
                    .min(deadline.saturating_sub(started.elapsed())),
                None => self.barrier_settings.warn_every,
            };

            if timeout(step, waiter.wait()).await.is_ok() {
                info!(
                    "✅ All {} collectors backfilled in {}s",
                    self.tokens.len(),
                    started.elapsed().as_secs()
                );
                return Ok(());
            }

            let pending = self.registry.pending_arrivals().await;
            let summary = describe_pending(&pending);
            error!(
                "⏳ Barrier missing {} arrival(s) after {}s: {}",
                waiter.pending(),
                started.elapsed().as_secs(),
                summary
            );

            if let Some(deadline) = self.barrier_settings.deadline {
                if started.elapsed() >= deadline {
                    return Err(FeedError::BarrierTimeout(format!(
                        "{} collector(s) missing after {}s: {}",
                        pending.len(),
                        deadline.as_secs(),
                        summary
                    )));
                }
            }
        }
    }
}

fn describe_pending(pending: &[CollectorStatus]) -> String {
    pending
        .iter()
        .map(|s| match &s.last_error {
            Some(e) => format!("{} [{:?}: {}]", s.name, s.state, e),
            None => format!("{} [{:?}]", s.name, s.state),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn report_exit(name: &str, outcome: std::result::Result<Result<()>, JoinError>) {
    match outcome {
        Ok(Ok(())) => warn!("Collector {} exited", name),
        Ok(Err(e)) => error!("❌ Collector {} stopped: {} ({})", name, e, e.error_code()),
        Err(e) if e.is_panic() => error!("💥 Collector {} panicked", name),
        Err(e) => warn!("Collector {} cancelled: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::registry::CollectorState;
    use crate::subgraph::testing::{hour_floor, sample, ScriptedSource};
    use crate::utils::now_unix;

    fn token(name: &str) -> TrackedToken {
        TrackedToken {
            name: name.to_string(),
            address: format!("0x{}", name.to_lowercase()),
        }
    }

    fn orchestrator(
        tokens: Vec<TrackedToken>,
        source: ScriptedSource,
        store: &SampleStore,
        registry: &Arc<CollectorRegistry>,
        deadline: Option<Duration>,
    ) -> IngestionOrchestrator {
        IngestionOrchestrator::new(
            tokens,
            Arc::new(source),
            store.clone(),
            Arc::clone(registry),
            CollectorSettings {
                backfill_window: Duration::from_secs(7 * 24 * 3600),
                poll_interval: Duration::from_secs(3600),
            },
            BarrierSettings {
                warn_every: Duration::from_millis(50),
                deadline,
            },
        )
    }

    #[tokio::test]
    async fn test_start_returns_after_every_backfill() {
        let base = hour_floor(now_unix()) - 5 * 3600;
        let source = ScriptedSource::new(2)
            .with_token(
                "0xwbtc",
                "WBTC",
                vec![sample(base, 1.0), sample(base + 3600, 2.0), sample(base + 7200, 3.0)],
            )
            .with_token("0xgno", "GNO", Vec::new());
        let store = SampleStore::open_in_memory().unwrap();
        let registry = Arc::new(CollectorRegistry::new());

        let orchestrator = orchestrator(
            vec![token("WBTC"), token("GNO")],
            source,
            &store,
            &registry,
            Some(Duration::from_secs(5)),
        );
        orchestrator.start().await.unwrap();

        assert!(registry.pending_arrivals().await.is_empty());
        assert_eq!(store.count_hourly_samples("WBTC").unwrap(), 3);
        assert!(store.get_token_metadata("GNO").unwrap().is_some());
        assert_eq!(store.count_hourly_samples("GNO").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_collector_trips_deadline() {
        let source = ScriptedSource::new(100).with_token("0xwbtc", "WBTC", Vec::new());
        let store = SampleStore::open_in_memory().unwrap();
        let registry = Arc::new(CollectorRegistry::new());

        let orchestrator = orchestrator(
            vec![token("WBTC"), token("SHIB")],
            source,
            &store,
            &registry,
            Some(Duration::from_millis(200)),
        );
        let result = orchestrator.start().await;

        match result {
            Err(FeedError::BarrierTimeout(msg)) => assert!(msg.contains("SHIB")),
            other => panic!("expected barrier timeout, got {:?}", other),
        }
        assert_eq!(registry.get("SHIB").await.unwrap().state, CollectorState::Failed);
        assert!(registry.get("WBTC").await.unwrap().state.has_arrived());
    }

    #[test]
    fn test_describe_pending() {
        let status = CollectorStatus {
            name: "SHIB".to_string(),
            address: "0xshib".to_string(),
            symbol: None,
            state: CollectorState::Failed,
            cursor: None,
            samples_fetched: 0,
            last_success: None,
            last_error: Some("Not found".to_string()),
        };

        assert_eq!(describe_pending(&[status]), "SHIB [Failed: Not found]");
    }
}
