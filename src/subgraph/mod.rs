pub mod client;
pub mod paginator;

pub use client::SubgraphClient;
pub use paginator::{validate_range, Paginator};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{HourlySample, TokenMetadata};

/// Upstream page size for `tokenHourDatas` queries
pub const PAGE_SIZE: usize = 100;

/// Source of token metadata and hourly samples
#[async_trait]
pub trait HourDataSource: Send + Sync {
    /// Resolve token metadata by on-chain address
    async fn fetch_token(&self, address: &str) -> Result<TokenMetadata>;

    /// Fetch at most one page of samples in `[from_inclusive, to_exclusive)`,
    /// ascending by period start
    async fn fetch_hour_page(
        &self,
        address: &str,
        from_inclusive: i64,
        to_exclusive: i64,
    ) -> Result<Vec<HourlySample>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::FeedError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub fn sample(period_start_unix: i64, price: f64) -> HourlySample {
        HourlySample {
            period_start_unix,
            open: price,
            close: price + 1.0,
            high: price + 2.0,
            low: price - 1.0,
            price_usd: price,
        }
    }

    /// Start of the hour containing `unix`
    pub fn hour_floor(unix: i64) -> i64 {
        unix.div_euclid(crate::types::HOUR_SECONDS) * crate::types::HOUR_SECONDS
    }

    pub fn metadata(symbol: &str) -> TokenMetadata {
        TokenMetadata {
            name: format!("{} Token", symbol),
            symbol: symbol.to_string(),
            total_supply: 21_000_000,
            volume_usd: 1_500_000.5,
            decimals: 8.0,
        }
    }

    /// In-memory upstream honouring the `gte`/`lt` filters and a page cap
    pub struct ScriptedSource {
        tokens: HashMap<String, TokenMetadata>,
        samples: Mutex<HashMap<String, Vec<HourlySample>>>,
        page_size: usize,
        pub fail_pages: AtomicBool,
        pub page_calls: AtomicUsize,
    }

    impl ScriptedSource {
        pub fn new(page_size: usize) -> Self {
            ScriptedSource {
                tokens: HashMap::new(),
                samples: Mutex::new(HashMap::new()),
                page_size,
                fail_pages: AtomicBool::new(false),
                page_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_token(
            mut self,
            address: &str,
            symbol: &str,
            samples: Vec<HourlySample>,
        ) -> Self {
            self.tokens.insert(address.to_string(), metadata(symbol));
            self.samples.lock().unwrap().insert(address.to_string(), samples);
            self
        }

        pub fn push_sample(&self, address: &str, sample: HourlySample) {
            let mut samples = self.samples.lock().unwrap();
            let list = samples.entry(address.to_string()).or_default();
            list.push(sample);
            list.sort_by_key(|s| s.period_start_unix);
        }

        pub fn calls(&self) -> usize {
            self.page_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HourDataSource for ScriptedSource {
        async fn fetch_token(&self, address: &str) -> Result<TokenMetadata> {
            self.tokens
                .get(address)
                .cloned()
                .ok_or_else(|| FeedError::NotFound(format!("Token {} not found", address)))
        }

        async fn fetch_hour_page(
            &self,
            address: &str,
            from_inclusive: i64,
            to_exclusive: i64,
        ) -> Result<Vec<HourlySample>> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);

            if self.fail_pages.load(Ordering::SeqCst) {
                return Err(FeedError::TransientFetch("scripted outage".to_string()));
            }

            let samples = self.samples.lock().unwrap();
            Ok(samples
                .get(address)
                .map(|list| {
                    list.iter()
                        .filter(|s| {
                            s.period_start_unix >= from_inclusive
                                && s.period_start_unix < to_exclusive
                                && s.price_usd > 0.0
                        })
                        .take(self.page_size)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }
    }
}
