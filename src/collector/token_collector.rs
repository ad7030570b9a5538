/// Per-token collector: resolve metadata, backfill, wait for peers, poll
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::barrier::BarrierTicket;
use super::registry::{CollectorRegistry, CollectorState};
use crate::data::SampleStore;
use crate::error::{FeedError, Result};
use crate::subgraph::{HourDataSource, Paginator};
use crate::types::{Config, TrackedToken};
use crate::utils::now_unix;

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub backfill_window: Duration,
    pub poll_interval: Duration,
}

impl CollectorSettings {
    pub fn from_config(config: &Config) -> Self {
        CollectorSettings {
            backfill_window: Duration::from_secs(config.backfill_window_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }
}

pub struct TokenCollector {
    token: TrackedToken,
    source: Arc<dyn HourDataSource>,
    paginator: Paginator,
    store: SampleStore,
    registry: Arc<CollectorRegistry>,
    settings: CollectorSettings,
    symbol: Option<String>,
    /// Next period start to query from; not persisted
    cursor: i64,
    state: CollectorState,
}

impl TokenCollector {
    pub fn new(
        token: TrackedToken,
        source: Arc<dyn HourDataSource>,
        store: SampleStore,
        registry: Arc<CollectorRegistry>,
        settings: CollectorSettings,
    ) -> Self {
        TokenCollector {
            token,
            paginator: Paginator::new(Arc::clone(&source)),
            source,
            store,
            registry,
            settings,
            symbol: None,
            cursor: 0,
            state: CollectorState::Initializing,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    async fn transition(&mut self, state: CollectorState) {
        self.state = state;
        self.registry.set_state(&self.token.name, state).await;
    }

    /// Drive the collector for the process lifetime.
    ///
    /// Returns only if start-up fails; in that case the ticket is dropped
    /// without arriving and the barrier stays closed.
    pub async fn run(mut self, ticket: BarrierTicket) -> Result<()> {
        if let Err(e) = self.start_up().await {
            error!(
                "❌ Collector {} failed while {:?}: {} ({})",
                self.token.name,
                self.state,
                e,
                e.error_code()
            );
            self.registry.record_error(&self.token.name, &e.to_string()).await;
            self.transition(CollectorState::Failed).await;
            return Err(e);
        }

        self.transition(CollectorState::BarrierWait).await;
        ticket.arrive_and_wait().await;

        self.transition(CollectorState::Polling).await;
        self.poll_forever().await
    }

    async fn start_up(&mut self) -> Result<()> {
        self.initialize().await?;
        self.backfill().await?;
        Ok(())
    }

    /// Resolve and store token metadata, returning the symbol
    pub async fn initialize(&mut self) -> Result<String> {
        self.transition(CollectorState::Initializing).await;

        let metadata = self.source.fetch_token(&self.token.address).await?;
        let metadata = self
            .store
            .blocking(move |store| {
                store.upsert_token_metadata(&metadata)?;
                Ok(metadata)
            })
            .await?;
        self.registry.set_symbol(&self.token.name, &metadata.symbol).await;

        info!(
            "🪙 {} resolved to {} ({})",
            self.token.name, metadata.symbol, metadata.name
        );

        self.symbol = Some(metadata.symbol.clone());
        Ok(metadata.symbol)
    }

    /// Fetch the trailing backfill window; succeeds even when it is empty
    pub async fn backfill(&mut self) -> Result<usize> {
        self.transition(CollectorState::Backfilling).await;

        let now = now_unix();
        let origin = now - self.settings.backfill_window.as_secs() as i64;
        self.cursor = origin;

        let fetched = self.fetch_and_store(origin, now).await?;
        info!(
            "✅ Done backfilling {}: {} samples, cursor at {}",
            self.token.name, fetched, self.cursor
        );
        Ok(fetched)
    }

    /// One polling cycle from the current cursor up to now.
    ///
    /// The cursor sits on the latest stored hour, so that hour is fetched
    /// again and refreshed while it is still open.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let now = now_unix();
        let cursor = self.cursor;
        if cursor >= now {
            return Ok(0);
        }
        self.fetch_and_store(cursor, now).await
    }

    async fn poll_forever(&mut self) -> Result<()> {
        loop {
            match self.poll_once().await {
                Ok(fetched) => {
                    debug!(
                        "Polled {} samples for {}, cursor at {}",
                        fetched, self.token.name, self.cursor
                    );
                }
                Err(e) if e.is_fatal() => {
                    error!(
                        "❌ Fatal error polling {}: {} ({}) - stopping collector",
                        self.token.name,
                        e,
                        e.error_code()
                    );
                    self.registry.record_error(&self.token.name, &e.to_string()).await;
                    self.transition(CollectorState::Failed).await;
                    return Err(e);
                }
                Err(e) => {
                    if e.is_recoverable() {
                        warn!(
                            "⚠️  Poll for {} failed: {} ({}) - retrying next tick from {}",
                            self.token.name,
                            e,
                            e.error_code(),
                            self.cursor
                        );
                    } else {
                        error!(
                            "❌ Poll for {} rejected: {} ({}) - cursor held at {}",
                            self.token.name,
                            e,
                            e.error_code(),
                            self.cursor
                        );
                    }
                    self.registry.record_error(&self.token.name, &e.to_string()).await;
                }
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn fetch_and_store(&mut self, start: i64, end: i64) -> Result<usize> {
        let symbol = self.symbol.clone().ok_or_else(|| {
            FeedError::InternalError(format!("{} not initialized", self.token.name))
        })?;

        let samples = self
            .paginator
            .fetch_range(&self.token.address, start, end)
            .await?;
        let samples = self
            .store
            .blocking(move |store| {
                store.upsert_hourly_samples(&symbol, &samples)?;
                Ok(samples)
            })
            .await?;

        // Only advance once the batch is stored
        if let Some(last) = samples.last() {
            self.cursor = last.period_start_unix;
        }
        self.registry
            .record_cycle(&self.token.name, self.cursor, samples.len())
            .await;

        Ok(samples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::barrier::StartupBarrier;
    use crate::subgraph::testing::{hour_floor, sample, ScriptedSource};
    use std::sync::atomic::Ordering;
    use tokio::time::timeout;

    const ADDR: &str = "0xwbtc";

    fn token() -> TrackedToken {
        TrackedToken {
            name: "WBTC".to_string(),
            address: ADDR.to_string(),
        }
    }

    fn settings() -> CollectorSettings {
        CollectorSettings {
            backfill_window: Duration::from_secs(7 * 24 * 3600),
            poll_interval: Duration::from_secs(3600),
        }
    }

    fn build(
        source: Arc<ScriptedSource>,
        store: &SampleStore,
    ) -> (TokenCollector, Arc<CollectorRegistry>) {
        let registry = Arc::new(CollectorRegistry::new());
        let collector = TokenCollector::new(
            token(),
            source,
            store.clone(),
            Arc::clone(&registry),
            settings(),
        );
        (collector, registry)
    }

    fn base_hour() -> i64 {
        hour_floor(now_unix()) - 10 * 3600
    }

    #[tokio::test]
    async fn test_backfill_stores_window_and_sets_cursor() {
        let base = base_hour();
        let stale = base - 8 * 24 * 3600;
        let source = Arc::new(ScriptedSource::new(2).with_token(
            ADDR,
            "WBTC",
            vec![
                sample(stale, 1.0),
                sample(base, 2.0),
                sample(base + 7200, 3.0),
                sample(base + 14400, 4.0),
            ],
        ));
        let store = SampleStore::open_in_memory().unwrap();
        let (mut collector, registry) = build(source, &store);

        assert_eq!(collector.initialize().await.unwrap(), "WBTC");
        assert_eq!(collector.backfill().await.unwrap(), 3);

        assert_eq!(collector.cursor(), base + 14400);
        assert_eq!(collector.state(), CollectorState::Backfilling);
        assert_eq!(store.count_hourly_samples("WBTC").unwrap(), 3);
        assert!(store.get_token_metadata("WBTC").unwrap().is_some());
        // Never registered, so updates are dropped
        assert!(registry.get("WBTC").await.is_none());
    }

    #[tokio::test]
    async fn test_empty_backfill_keeps_origin_cursor() {
        let source = Arc::new(ScriptedSource::new(100).with_token(ADDR, "WBTC", Vec::new()));
        let store = SampleStore::open_in_memory().unwrap();
        let (mut collector, _) = build(source, &store);

        collector.initialize().await.unwrap();
        let before = now_unix();
        assert_eq!(collector.backfill().await.unwrap(), 0);

        let origin = collector.cursor();
        let window = 7 * 24 * 3600;
        assert!(origin >= before - window && origin <= now_unix() - window);
    }

    #[tokio::test]
    async fn test_empty_backfill_still_reaches_barrier() {
        let source = Arc::new(ScriptedSource::new(100).with_token(ADDR, "WBTC", Vec::new()));
        let store = SampleStore::open_in_memory().unwrap();
        let registry = Arc::new(CollectorRegistry::new());
        registry.register(&token()).await;
        let collector =
            TokenCollector::new(token(), source, store, Arc::clone(&registry), settings());

        let mut tickets = StartupBarrier::with_parties(2);
        let orchestrator = tickets.pop().unwrap();
        let handle = tokio::spawn(collector.run(tickets.pop().unwrap()));

        let mut waiter = orchestrator.arrive();
        timeout(Duration::from_secs(2), waiter.wait()).await.unwrap();
        assert!(registry.get("WBTC").await.unwrap().state.has_arrived());

        handle.abort();
    }

    #[tokio::test]
    async fn test_failed_initialization_never_arrives() {
        let source = Arc::new(ScriptedSource::new(100));
        let store = SampleStore::open_in_memory().unwrap();
        let registry = Arc::new(CollectorRegistry::new());
        registry.register(&token()).await;
        let collector =
            TokenCollector::new(token(), source, store, Arc::clone(&registry), settings());

        let mut tickets = StartupBarrier::with_parties(2);
        let orchestrator = tickets.pop().unwrap();
        let result = collector.run(tickets.pop().unwrap()).await;

        assert!(matches!(result, Err(FeedError::NotFound(_))));
        let status = registry.get("WBTC").await.unwrap();
        assert_eq!(status.state, CollectorState::Failed);
        assert!(status.last_error.is_some());

        let mut waiter = orchestrator.arrive();
        assert!(timeout(Duration::from_millis(50), waiter.wait()).await.is_err());
    }

    #[tokio::test]
    async fn test_poll_advances_cursor_to_latest_hour() {
        let base = base_hour();
        let source = Arc::new(ScriptedSource::new(100).with_token(
            ADDR,
            "WBTC",
            vec![sample(base, 1.0), sample(base + 7200, 2.0)],
        ));
        let store = SampleStore::open_in_memory().unwrap();
        let (mut collector, _) = build(Arc::clone(&source), &store);
        collector.initialize().await.unwrap();
        collector.backfill().await.unwrap();

        // Nothing new: the latest hour is refreshed, cursor stays
        assert_eq!(collector.poll_once().await.unwrap(), 1);
        assert_eq!(collector.cursor(), base + 7200);

        source.push_sample(ADDR, sample(base + 3 * 3600, 3.0));
        source.push_sample(ADDR, sample(base + 6 * 3600, 4.0));

        assert_eq!(collector.poll_once().await.unwrap(), 3);
        assert_eq!(collector.cursor(), base + 6 * 3600);
        assert_eq!(store.count_hourly_samples("WBTC").unwrap(), 4);
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_cursor() {
        let base = base_hour();
        let source =
            Arc::new(ScriptedSource::new(100).with_token(ADDR, "WBTC", vec![sample(base, 1.0)]));
        let store = SampleStore::open_in_memory().unwrap();
        let (mut collector, _) = build(Arc::clone(&source), &store);
        collector.initialize().await.unwrap();
        collector.backfill().await.unwrap();

        source.push_sample(ADDR, sample(base + 3600, 2.0));
        source.fail_pages.store(true, Ordering::SeqCst);

        assert!(collector.poll_once().await.is_err());
        assert_eq!(collector.cursor(), base);
        assert_eq!(store.count_hourly_samples("WBTC").unwrap(), 1);

        // Next tick resumes from the same cursor
        source.fail_pages.store(false, Ordering::SeqCst);
        assert_eq!(collector.poll_once().await.unwrap(), 2);
        assert_eq!(collector.cursor(), base + 3600);
    }

    #[tokio::test]
    async fn test_poll_before_initialize_is_an_error() {
        let source = Arc::new(ScriptedSource::new(100).with_token(ADDR, "WBTC", Vec::new()));
        let store = SampleStore::open_in_memory().unwrap();
        let (mut collector, _) = build(source, &store);
        collector.cursor = now_unix() - 3600;

        assert!(matches!(
            collector.poll_once().await,
            Err(FeedError::InternalError(_))
        ));
    }

    async fn wait_until<F>(registry: &CollectorRegistry, check: F)
    where
        F: Fn(&crate::collector::CollectorStatus) -> bool,
    {
        timeout(Duration::from_secs(2), async {
            loop {
                if registry.get("WBTC").await.map_or(false, |s| check(&s)) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_polling_loop_survives_failed_cycles() {
        let base = base_hour();
        let source =
            Arc::new(ScriptedSource::new(100).with_token(ADDR, "WBTC", vec![sample(base, 1.0)]));
        let store = SampleStore::open_in_memory().unwrap();
        let registry = Arc::new(CollectorRegistry::new());
        registry.register(&token()).await;
        let fast = CollectorSettings {
            poll_interval: Duration::from_millis(20),
            ..settings()
        };
        let collector = TokenCollector::new(
            token(),
            Arc::clone(&source) as Arc<dyn HourDataSource>,
            store.clone(),
            Arc::clone(&registry),
            fast,
        );

        let mut tickets = StartupBarrier::with_parties(1);
        let handle = tokio::spawn(collector.run(tickets.pop().unwrap()));
        wait_until(&registry, |s| s.state == CollectorState::Polling).await;

        source.fail_pages.store(true, Ordering::SeqCst);
        wait_until(&registry, |s| s.last_error.is_some()).await;
        assert!(!handle.is_finished());
        assert_eq!(registry.get("WBTC").await.unwrap().cursor, Some(base));

        source.push_sample(ADDR, sample(base + 3600, 2.0));
        source.fail_pages.store(false, Ordering::SeqCst);
        wait_until(&registry, |s| s.cursor == Some(base + 3600) && s.last_error.is_none()).await;
        assert_eq!(store.count_hourly_samples("WBTC").unwrap(), 2);

        handle.abort();
    }
}
