/// Gap-safe pagination over the hourly sample source
use std::sync::Arc;
use tracing::{debug, warn};

use super::HourDataSource;
use crate::error::{FeedError, Result};
use crate::types::HourlySample;
use crate::utils::now_unix;

/// Reject empty/backwards windows and windows reaching past `now`
pub fn validate_range(start_inclusive: i64, end_exclusive: i64, now: i64) -> Result<()> {
    if start_inclusive >= end_exclusive {
        return Err(FeedError::Range(format!(
            "Must be a positive time interval: [{}, {})",
            start_inclusive, end_exclusive
        )));
    }
    if end_exclusive > now {
        return Err(FeedError::Range(format!(
            "Time bound {} after current time {}",
            end_exclusive, now
        )));
    }
    Ok(())
}

/// Assembles a complete, ascending, duplicate-free sample set for a range
/// out of capped upstream pages.
pub struct Paginator {
    source: Arc<dyn HourDataSource>,
}

impl Paginator {
    pub fn new(source: Arc<dyn HourDataSource>) -> Self {
        Paginator { source }
    }

    /// Fetch every sample in `[start_inclusive, end_exclusive)`.
    ///
    /// The cursor moves to one second past the last sample of each page, so
    /// no sample is requested twice and no period is skipped, however many
    /// pages the range needs. An empty page ends the walk.
    pub async fn fetch_range(
        &self,
        address: &str,
        start_inclusive: i64,
        end_exclusive: i64,
    ) -> Result<Vec<HourlySample>> {
        validate_range(start_inclusive, end_exclusive, now_unix())?;

        let mut fetched: Vec<HourlySample> = Vec::new();
        let mut cursor = start_inclusive;
        let mut pages = 0usize;

        loop {
            let page = self
                .source
                .fetch_hour_page(address, cursor, end_exclusive)
                .await?;

            let last_start = match page.last() {
                Some(last) => last.period_start_unix,
                None => break,
            };

            // A page ending before the cursor breaks the gte filter and
            // would repeat forever under the advance rule.
            if last_start < cursor {
                warn!(
                    "Upstream returned page ending at {} for cursor {} ({})",
                    last_start, cursor, address
                );
                return Err(FeedError::PaginationStalled(format!(
                    "{}: page ends at {} before cursor {}",
                    address, last_start, cursor
                )));
            }

            pages += 1;
            fetched.extend(page);
            cursor = last_start + 1;
        }

        debug!(
            "Paginated {} samples over {} pages for {} in [{}, {})",
            fetched.len(),
            pages,
            address,
            start_inclusive,
            end_exclusive
        );

        Ok(fetched)
    }
}
