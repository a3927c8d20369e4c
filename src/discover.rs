//! Partition discovery.
//!
//! Enumerates the distinct values of the discriminator column inside the
//! backup window with a single `GROUP BY` query, following continuation
//! tokens until the service reports none. Any page failure aborts discovery:
//! a partial partition list would silently skip data.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio_util::sync::CancellationToken;

use crate::models::{BackupTarget, Datum, PartitionValue, TimeRange, QUERY_TIME_FORMAT};
use crate::pages::{FetchError, PageStream};
use crate::traits::QueryService;

/// Rows per discovery page.
pub const DISCOVERY_PAGE_SIZE: u32 = 100;

/// Build the partition enumeration query.
pub fn discovery_query(target: &BackupTarget, range: &TimeRange) -> String {
    format!(
        "SELECT {} FROM \"{}\".\"{}\" WHERE time >= '{}' and time <= '{}' GROUP BY {}",
        target.column,
        target.database,
        target.table,
        range.from().format(QUERY_TIME_FORMAT),
        range.to().format(QUERY_TIME_FORMAT),
        target.column,
    )
}

/// Discover partition values in arrival order.
///
/// Rows whose first value is null (or not a scalar) are skipped. Values are
/// not deduplicated here; the `GROUP BY` already does that.
pub async fn discover_partitions(
    service: Arc<dyn QueryService>,
    target: &BackupTarget,
    range: &TimeRange,
    cancel: CancellationToken,
) -> Result<Vec<PartitionValue>> {
    let mut pages = PageStream::new(
        service,
        discovery_query(target, range),
        DISCOVERY_PAGE_SIZE,
        cancel,
    );

    let mut partitions = Vec::new();
    while let Some(page) = pages.next_page().await {
        let page = match page {
            Ok(page) => page,
            Err(FetchError::Cancelled) => {
                return Err(anyhow!("retrieve partition values: cancelled"))
            }
            Err(FetchError::Query(e)) => {
                return Err(e).with_context(|| {
                    format!("retrieve partition values (sql: {})", pages.query())
                })
            }
        };

        for row in page.rows {
            if let Some(Datum::Scalar(value)) = row.data.into_iter().next() {
                partitions.push(value);
            }
        }
    }

    Ok(partitions)
}
