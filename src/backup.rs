//! Backup orchestration.
//!
//! Runs the whole export for one time window:
//!
//! 1. Validate the window (`from < to`) and clamp the page size. Nothing is
//!    queried if the window is invalid.
//! 2. Discover partition values. A discovery failure ends the run.
//! 3. Spawn one worker per partition, all at once, no pool cap.
//! 4. Wait for every worker, then merge their reports into a
//!    [`BackupResult`]. The run has failed if any worker recorded a failure,
//!    even though other partitions uploaded their data.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::discover::discover_partitions;
use crate::models::{
    BackupResult, BackupTarget, FailureKind, PartitionFailure, TimeRange, QUERY_TIME_FORMAT,
};
use crate::progress::{format_number, BackupEvent, BackupReporter};
use crate::traits::{ObjectStore, QueryService};
use crate::worker::{run_partition, PartitionOutcome, PartitionReport, RunContext};

/// Service ceiling for rows per page.
pub const MAX_ROWS_PER_PAGE: u32 = 1000;

/// Inputs of one run, as resolved by the caller.
#[derive(Debug, Clone)]
pub struct BackupParams {
    pub target: BackupTarget,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Requested rows per page; clamped to `1..=1000`.
    pub rows_per_page: u64,
    /// Build archives but do not upload them.
    pub dry_run: bool,
}

/// Clamp a requested page size into `1..=MAX_ROWS_PER_PAGE`.
pub fn clamp_rows_per_page(requested: u64) -> u32 {
    requested.clamp(1, MAX_ROWS_PER_PAGE as u64) as u32
}

/// The collaborators a run talks to.
#[derive(Clone)]
pub struct Services {
    pub query: Arc<dyn QueryService>,
    pub store: Arc<dyn ObjectStore>,
    pub reporter: Arc<dyn BackupReporter>,
}

/// Run a backup.
///
/// Returns `Err` only for fatal problems (invalid window, discovery failure).
/// Per-partition failures are collected in the returned [`BackupResult`].
pub async fn run_backup(
    params: &BackupParams,
    services: Services,
    cancel: CancellationToken,
) -> Result<BackupResult> {
    let range = TimeRange::new(params.from, params.to)?;
    let rows_per_page = clamp_rows_per_page(params.rows_per_page);
    let reporter = services.reporter.clone();

    if params.dry_run {
        reporter.report(BackupEvent::DryRun);
    }
    if params.rows_per_page > MAX_ROWS_PER_PAGE as u64 {
        reporter.report(BackupEvent::PageSizeClamped {
            requested: params.rows_per_page,
            applied: rows_per_page,
        });
    }

    let started = Instant::now();

    reporter.report(BackupEvent::Discovering {
        column: params.target.column.clone(),
        from: range.from().format(QUERY_TIME_FORMAT).to_string(),
        to: range.to().format(QUERY_TIME_FORMAT).to_string(),
    });
    let partitions = discover_partitions(
        services.query.clone(),
        &params.target,
        &range,
        cancel.clone(),
    )
    .await?;
    reporter.report(BackupEvent::Discovered {
        partitions: partitions.clone(),
    });

    let ctx = Arc::new(RunContext {
        query: services.query,
        store: services.store,
        reporter: services.reporter,
        target: params.target.clone(),
        range,
        rows_per_page,
        dry_run: params.dry_run,
        cancel,
    });

    let handles: Vec<_> = partitions
        .iter()
        .map(|partition| {
            let ctx = ctx.clone();
            let partition = partition.clone();
            tokio::spawn(async move { run_partition(&ctx, &partition).await })
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for (partition, handle) in partitions.iter().zip(handles) {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => reports.push(panicked_report(partition, &e.to_string())),
        }
    }

    let result = aggregate(&partitions, reports, started.elapsed());
    reporter.report(BackupEvent::Finished {
        total_rows: result.total_rows(),
        failures: result.failures.len(),
        elapsed: result.elapsed,
    });
    Ok(result)
}

fn panicked_report(partition: &str, error: &str) -> PartitionReport {
    PartitionReport {
        partition: partition.to_string(),
        rows: 0,
        pages: 0,
        uploads: 0,
        failures: vec![PartitionFailure::new(partition, FailureKind::Panicked, error)],
        outcome: PartitionOutcome::Aborted,
        elapsed: Duration::ZERO,
    }
}

/// Merge worker reports. Every discovered partition gets a row count, even
/// if its worker contributed nothing.
pub fn aggregate(
    partitions: &[String],
    reports: Vec<PartitionReport>,
    elapsed: Duration,
) -> BackupResult {
    let mut rows_per_partition: BTreeMap<String, u64> =
        partitions.iter().map(|p| (p.clone(), 0)).collect();
    let mut uploads = 0;
    let mut failures = Vec::new();

    for report in reports {
        *rows_per_partition.entry(report.partition).or_insert(0) += report.rows;
        uploads += report.uploads;
        failures.extend(report.failures);
    }

    BackupResult {
        rows_per_partition,
        uploads,
        failures,
        elapsed,
    }
}

/// Render the end-of-run summary printed on stdout.
pub fn render_summary(params: &BackupParams, result: &BackupResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "backup {}.{} by {}{}",
        params.target.database,
        params.target.table,
        params.target.column,
        if params.dry_run { " (dry-run)" } else { "" }
    );
    let _ = writeln!(
        out,
        "  window: {} .. {}",
        params.from.format(QUERY_TIME_FORMAT),
        params.to.format(QUERY_TIME_FORMAT)
    );
    let _ = writeln!(out, "  partitions: {}", result.rows_per_partition.len());
    for (partition, rows) in &result.rows_per_partition {
        let _ = writeln!(out, "    {:<24} {:>12} rows", partition, format_number(*rows));
    }
    let _ = writeln!(out, "  total rows: {}", format_number(result.total_rows()));
    let _ = writeln!(out, "  archives uploaded: {}", format_number(result.uploads));
    let _ = writeln!(out, "  time taken: {:.2?}", result.elapsed);
    if result.has_errors() {
        let _ = writeln!(out, "  errors: {}", result.failures.len());
        for failure in &result.failures {
            let _ = writeln!(out, "    {}", failure);
        }
        out.push_str("failed\n");
    } else {
        out.push_str("ok\n");
    }
    out
}
