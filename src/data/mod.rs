pub mod sample_store;
pub mod chart_aggregator;

pub use sample_store::SampleStore;
pub use chart_aggregator::{bucket_series, ChartAggregator, ChartData, ChartPoint, PriceAttribute};
