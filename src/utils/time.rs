/// Time utilities for hourly periods and chart timestamps
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;

/// Format used for chart bucket timestamps
pub const CHART_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Current wall-clock time in unix seconds
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Render a bucket start for the chart endpoint.
///
/// Without an explicit zone the process local clock is used, while the
/// trailing `Z` stays literal. Clients have always received this shape.
pub fn format_bucket_time(unix: i64, zone: Option<&Tz>) -> String {
    let utc = DateTime::<Utc>::from_timestamp(unix, 0).unwrap_or_default();

    match zone {
        Some(tz) => utc.with_timezone(tz).format(CHART_TIME_FORMAT).to_string(),
        None => utc.with_timezone(&Local).format(CHART_TIME_FORMAT).to_string(),
    }
}
