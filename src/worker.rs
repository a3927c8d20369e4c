//! Partition worker.
//!
//! One worker per partition value. It pages through
//! `SELECT * ... ORDER BY time DESC` for its partition, one page in flight at
//! a time, and turns each non-empty page into one archive:
//!
//! ```text
//! fetch page ─▶ flatten rows ─▶ gzip NDJSON ─▶ checksum + key ─▶ upload ─┐
//!     ▲                                                (skipped in dry-run)│
//!     └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Failures are fail-slow: a bad row or a failed upload is recorded and the
//! worker moves on; a failed fetch ends this partition only. Nothing is
//! retried. The worker owns its counters and returns them in a
//! [`PartitionReport`]; the coordinator merges reports after the join.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveChunk, ObjectKey};
use crate::flatten::{flatten_row, FlattenedRow};
use crate::models::{
    BackupTarget, FailureKind, PartitionFailure, QueryPage, TimeRange, QUERY_TIME_FORMAT,
};
use crate::pages::{until_cancelled, FetchError, PageStream};
use crate::progress::{BackupEvent, BackupReporter};
use crate::timespec::parse_row_time;
use crate::traits::{ObjectStore, QueryService};

/// Column holding each row's timestamp.
pub const TIME_COLUMN: &str = "time";

/// Everything a worker needs, shared read-only by all workers of a run.
pub struct RunContext {
    pub query: Arc<dyn QueryService>,
    pub store: Arc<dyn ObjectStore>,
    pub reporter: Arc<dyn BackupReporter>,
    pub target: BackupTarget,
    pub range: TimeRange,
    /// Already clamped to the service ceiling.
    pub rows_per_page: u32,
    pub dry_run: bool,
    pub cancel: CancellationToken,
}

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionOutcome {
    /// Pagination was exhausted.
    Done,
    /// A fetch failed or the run was cancelled.
    Aborted,
}

/// What one worker did.
#[derive(Debug, Clone)]
pub struct PartitionReport {
    pub partition: String,
    /// Rows flattened and written into archives.
    pub rows: u64,
    /// Non-empty pages archived.
    pub pages: u64,
    pub uploads: u64,
    pub failures: Vec<PartitionFailure>,
    pub outcome: PartitionOutcome,
    pub elapsed: Duration,
}

/// Build the per-partition export query.
///
/// Single quotes in the partition value are doubled.
pub fn partition_query(target: &BackupTarget, range: &TimeRange, partition: &str) -> String {
    format!(
        "SELECT * FROM \"{}\".\"{}\" WHERE time >= '{}' and time <= '{}' AND {} = '{}' ORDER BY time DESC",
        target.database,
        target.table,
        range.from().format(QUERY_TIME_FORMAT),
        range.to().format(QUERY_TIME_FORMAT),
        target.column,
        partition.replace('\'', "''"),
    )
}

enum PageOutcome {
    Continue,
    Cancelled(String),
}

/// Back up one partition.
pub async fn run_partition(ctx: &RunContext, partition: &str) -> PartitionReport {
    let started = Instant::now();
    let mut report = PartitionReport {
        partition: partition.to_string(),
        rows: 0,
        pages: 0,
        uploads: 0,
        failures: Vec::new(),
        outcome: PartitionOutcome::Done,
        elapsed: Duration::ZERO,
    };

    ctx.reporter.report(BackupEvent::PartitionStarted {
        partition: partition.to_string(),
    });

    let mut pages = PageStream::new(
        ctx.query.clone(),
        partition_query(&ctx.target, &ctx.range, partition),
        ctx.rows_per_page,
        ctx.cancel.clone(),
    );

    while let Some(page) = pages.next_page().await {
        let page = match page {
            Ok(page) => page,
            Err(FetchError::Cancelled) => {
                abort_cancelled(ctx, &mut report, "query cancelled".to_string());
                break;
            }
            Err(FetchError::Query(e)) => {
                let error = format!("query with partition value: {:#}", e);
                ctx.reporter.report(BackupEvent::PartitionAborted {
                    partition: partition.to_string(),
                    error: error.clone(),
                });
                report.record(FailureKind::Fetch, error);
                report.outcome = PartitionOutcome::Aborted;
                break;
            }
        };

        if page.rows.is_empty() {
            continue;
        }

        if let PageOutcome::Cancelled(error) = archive_page(ctx, partition, &page, &mut report).await {
            abort_cancelled(ctx, &mut report, error);
            break;
        }
    }

    report.elapsed = started.elapsed();
    if report.outcome == PartitionOutcome::Done {
        ctx.reporter.report(BackupEvent::PartitionFinished {
            partition: partition.to_string(),
            rows: report.rows,
            elapsed: report.elapsed,
        });
    }
    report
}

/// Flatten, compress, key and (unless dry-run) upload one non-empty page.
async fn archive_page(
    ctx: &RunContext,
    partition: &str,
    page: &QueryPage,
    report: &mut PartitionReport,
) -> PageOutcome {
    let mut chunk = ArchiveChunk::new();
    let last = page.rows.len() - 1;
    let mut newest = None;
    let mut oldest = None;

    for (i, row) in page.rows.iter().enumerate() {
        let flattened = flatten_row(&row.data, &page.columns);

        // Pages are time-descending: first row is the newest, last the oldest.
        if i == 0 {
            newest = row_time(ctx, partition, &flattened, "to");
        }
        if i == last {
            oldest = row_time(ctx, partition, &flattened, "from");
        }

        if let Err(e) = chunk.push_row(&flattened) {
            let error = format!("{:#}", e);
            ctx.reporter.report(BackupEvent::PageFailed {
                partition: partition.to_string(),
                key: None,
                error: error.clone(),
            });
            report.record(FailureKind::Serialize, error);
        }
    }

    let from = oldest.unwrap_or_else(|| ctx.range.from());
    let to = newest.unwrap_or_else(|| ctx.range.to());

    let sealed = match chunk.seal() {
        Ok(sealed) => sealed,
        Err(e) => {
            let error = format!("{:#}", e);
            ctx.reporter.report(BackupEvent::PageFailed {
                partition: partition.to_string(),
                key: None,
                error: error.clone(),
            });
            report.record(FailureKind::Serialize, error);
            return PageOutcome::Continue;
        }
    };

    report.rows += sealed.rows;
    if sealed.rows == 0 {
        return PageOutcome::Continue;
    }
    report.pages += 1;

    let key = ObjectKey::new(
        &ctx.target.database,
        &ctx.target.table,
        partition,
        from,
        to,
        sealed.checksum,
    );
    let rows = sealed.rows;

    if ctx.dry_run {
        ctx.reporter.report(BackupEvent::PageArchived {
            partition: partition.to_string(),
            key: key.to_string(),
            rows,
            location: None,
        });
        return PageOutcome::Continue;
    }

    let upload = ctx.store.put(&ctx.target.bucket, &key, sealed.bytes);
    match until_cancelled(&ctx.cancel, upload).await {
        None => PageOutcome::Cancelled(format!("upload of {} cancelled", key)),
        Some(Ok(location)) => {
            report.uploads += 1;
            ctx.reporter.report(BackupEvent::PageArchived {
                partition: partition.to_string(),
                key: key.to_string(),
                rows,
                location: Some(location),
            });
            PageOutcome::Continue
        }
        Some(Err(e)) => {
            let error = format!("upload data: {:#}", e);
            ctx.reporter.report(BackupEvent::PageFailed {
                partition: partition.to_string(),
                key: Some(key.to_string()),
                error: error.clone(),
            });
            report.record(FailureKind::Upload, error);
            PageOutcome::Continue
        }
    }
}

fn abort_cancelled(ctx: &RunContext, report: &mut PartitionReport, error: String) {
    ctx.reporter.report(BackupEvent::PartitionAborted {
        partition: report.partition.clone(),
        error: error.clone(),
    });
    report.record(FailureKind::Cancelled, error);
    report.outcome = PartitionOutcome::Aborted;
}

/// Parse a row's `time` value, warning (and returning `None`) when absent or
/// unparsable.
fn row_time(
    ctx: &RunContext,
    partition: &str,
    row: &FlattenedRow,
    bound: &str,
) -> Option<DateTime<Utc>> {
    let parsed = match row.get(TIME_COLUMN) {
        Some(Value::String(raw)) => parse_row_time(raw),
        _ => None,
    };
    if parsed.is_none() {
        ctx.reporter.report(BackupEvent::Warning {
            partition: partition.to_string(),
            message: format!(
                "row has no usable '{}' value for the archive's '{}' bound; using the run's bound",
                TIME_COLUMN, bound
            ),
        });
    }
    parsed
}

impl PartitionReport {
    fn record(&mut self, kind: FailureKind, message: impl Into<String>) {
        self.failures
            .push(PartitionFailure::new(&self.partition, kind, message));
    }
}
