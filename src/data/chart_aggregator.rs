/// Chart aggregation: regroups stored hourly samples into fixed-width buckets
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::data::SampleStore;
use crate::error::{FeedError, Result};
use crate::types::{HourlySample, TokenMetadata, HOUR_SECONDS};
use crate::utils::format_bucket_time;

/// Sample attribute averaged per bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceAttribute {
    Open,
    Close,
    High,
    Low,
    PriceUsd,
}

impl PriceAttribute {
    /// Output order of the series groups
    pub const ALL: [PriceAttribute; 5] = [
        PriceAttribute::Open,
        PriceAttribute::Close,
        PriceAttribute::High,
        PriceAttribute::Low,
        PriceAttribute::PriceUsd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceAttribute::Open => "open",
            PriceAttribute::Close => "close",
            PriceAttribute::High => "high",
            PriceAttribute::Low => "low",
            PriceAttribute::PriceUsd => "priceUSD",
        }
    }

    pub fn value(&self, sample: &HourlySample) -> f64 {
        match self {
            PriceAttribute::Open => sample.open,
            PriceAttribute::Close => sample.close,
            PriceAttribute::High => sample.high,
            PriceAttribute::Low => sample.low,
            PriceAttribute::PriceUsd => sample.price_usd,
        }
    }
}

/// `[bucket_start, attribute, average]`; `None` marks a bucket without trades
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint(pub String, pub &'static str, pub Option<f64>);

/// Response body of the chart endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ChartData {
    pub token_metadata: TokenMetadata,
    #[serde(rename = "3d_array_of_time")]
    pub series: Vec<Vec<ChartPoint>>,
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Group `samples` into `unit_hours`-wide buckets and average each attribute.
///
/// Every bucket between the first and the last sample is emitted, empty
/// ones with `None`, so gaps stay visible to the client.
pub fn bucket_series(
    samples: &[HourlySample],
    unit_hours: u32,
    zone: Option<&Tz>,
) -> Vec<Vec<ChartPoint>> {
    let (first, last) = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return PriceAttribute::ALL.iter().map(|_| Vec::new()).collect(),
    };

    let bucket_secs = HOUR_SECONDS * i64::from(unit_hours.max(1));
    let first_key = first.period_start_unix.div_euclid(bucket_secs);
    let last_key = last.period_start_unix.div_euclid(bucket_secs);

    // Seeded keys guarantee coverage; the last sample's bucket is added by
    // insertion below.
    let mut buckets: BTreeMap<i64, Vec<&HourlySample>> =
        (first_key..last_key).map(|key| (key, Vec::new())).collect();

    for sample in samples {
        buckets
            .entry(sample.period_start_unix.div_euclid(bucket_secs))
            .or_default()
            .push(sample);
    }

    PriceAttribute::ALL
        .iter()
        .map(|attribute| {
            buckets
                .iter()
                .map(|(key, members)| {
                    ChartPoint(
                        format_bucket_time(key * bucket_secs, zone),
                        attribute.as_str(),
                        average(members.iter().map(|s| attribute.value(s))),
                    )
                })
                .collect()
        })
        .collect()
}

/// Read-side engine behind `/getChartData`
#[derive(Clone)]
pub struct ChartAggregator {
    store: SampleStore,
    zone: Option<Tz>,
}

impl ChartAggregator {
    pub fn new(store: SampleStore, zone: Option<Tz>) -> Self {
        ChartAggregator { store, zone }
    }

    pub fn aggregate(&self, symbol: &str, unit_hours: u32) -> Result<ChartData> {
        if unit_hours == 0 {
            return Err(FeedError::InvalidParameter(
                "time_unit_hours must be a positive integer".to_string(),
            ));
        }

        let symbol = symbol.to_uppercase();
        let samples = self.store.get_hourly_samples(&symbol)?;
        if samples.is_empty() {
            return Err(FeedError::NoData(format!("No hourly data stored for {}", symbol)));
        }

        let token_metadata = self
            .store
            .get_token_metadata(&symbol)?
            .ok_or_else(|| FeedError::NotFound(format!("No metadata stored for {}", symbol)))?;

        let series = bucket_series(&samples, unit_hours, self.zone.as_ref());
        debug!(
            "Aggregated {} samples for {} into {} buckets of {}h",
            samples.len(),
            symbol,
            series.first().map(Vec::len).unwrap_or(0),
            unit_hours
        );

        Ok(ChartData {
            token_metadata,
            series,
        })
    }
}
