/// Shared view of every collector's lifecycle, read by the health endpoint
/// and the startup watchdog
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::types::TrackedToken;

/// Collector lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectorState {
    Initializing,
    Backfilling,
    BarrierWait,
    Polling,
    Failed,
}

impl CollectorState {
    /// Whether the collector has reached the startup barrier
    pub fn has_arrived(&self) -> bool {
        matches!(self, CollectorState::BarrierWait | CollectorState::Polling)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatus {
    pub name: String,
    pub address: String,
    pub symbol: Option<String>,
    pub state: CollectorState,
    pub cursor: Option<i64>,
    pub samples_fetched: usize,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Default)]
pub struct CollectorRegistry {
    statuses: RwLock<BTreeMap<String, CollectorStatus>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, token: &TrackedToken) {
        let mut statuses = self.statuses.write().await;
        statuses.insert(
            token.name.clone(),
            CollectorStatus {
                name: token.name.clone(),
                address: token.address.clone(),
                symbol: None,
                state: CollectorState::Initializing,
                cursor: None,
                samples_fetched: 0,
                last_success: None,
                last_error: None,
            },
        );
    }

    async fn update<F: FnOnce(&mut CollectorStatus)>(&self, name: &str, f: F) {
        let mut statuses = self.statuses.write().await;
        if let Some(status) = statuses.get_mut(name) {
            f(status);
        }
    }

    pub async fn set_state(&self, name: &str, state: CollectorState) {
        self.update(name, |s| s.state = state).await;
    }

    pub async fn set_symbol(&self, name: &str, symbol: &str) {
        self.update(name, |s| s.symbol = Some(symbol.to_string())).await;
    }

    /// Record a successful fetch cycle
    pub async fn record_cycle(&self, name: &str, cursor: i64, fetched: usize) {
        self.update(name, |s| {
            s.cursor = Some(cursor);
            s.samples_fetched += fetched;
            s.last_success = Some(Utc::now());
            s.last_error = None;
        })
        .await;
    }

    pub async fn record_error(&self, name: &str, error: &str) {
        self.update(name, |s| s.last_error = Some(error.to_string())).await;
    }

    pub async fn get(&self, name: &str) -> Option<CollectorStatus> {
        self.statuses.read().await.get(name).cloned()
    }

    /// All statuses, ordered by token name
    pub async fn snapshot(&self) -> Vec<CollectorStatus> {
        self.statuses.read().await.values().cloned().collect()
    }

    /// Collectors that have not reached the startup barrier yet
    pub async fn pending_arrivals(&self) -> Vec<CollectorStatus> {
        self.statuses
            .read()
            .await
            .values()
            .filter(|s| !s.state.has_arrived())
            .cloned()
            .collect()
    }
}
