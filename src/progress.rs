//! Backup progress reporting.
//!
//! The pipeline does not log. It emits [`BackupEvent`]s through an injected
//! [`BackupReporter`], and the binary chooses how they are rendered: human
//! lines or JSON lines on **stderr** (stdout stays reserved for the summary),
//! structured `tracing` events, or nothing at all.

use std::io::Write;
use std::time::Duration;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum BackupEvent {
    /// Dry-run is active: archives are built but not uploaded.
    DryRun,
    /// Partition discovery started.
    Discovering {
        column: String,
        from: String,
        to: String,
    },
    /// Discovery finished; one worker per value follows.
    Discovered { partitions: Vec<String> },
    /// The requested page size exceeded the service ceiling.
    PageSizeClamped { requested: u64, applied: u32 },
    PartitionStarted { partition: String },
    /// A page was archived; `location` is `None` in dry-run.
    PageArchived {
        partition: String,
        key: String,
        rows: u64,
        location: Option<String>,
    },
    /// A row or upload failed; the partition continues.
    PageFailed {
        partition: String,
        key: Option<String>,
        error: String,
    },
    /// Something odd but harmless, e.g. an unparsable row timestamp.
    Warning { partition: String, message: String },
    PartitionFinished {
        partition: String,
        rows: u64,
        elapsed: Duration,
    },
    /// A page fetch failed; the partition stopped.
    PartitionAborted { partition: String, error: String },
    Finished {
        total_rows: u64,
        failures: usize,
        elapsed: Duration,
    },
}

/// Receives progress events. Called concurrently from every partition worker.
pub trait BackupReporter: Send + Sync {
    fn report(&self, event: BackupEvent);
}

/// Human-friendly progress on stderr: "backup cpu  archived  1,000 rows → TestDB/IoT/...".
pub struct StderrProgress;

impl StderrProgress {
    fn render(event: &BackupEvent) -> String {
        match event {
            BackupEvent::DryRun => "***** RUNNING IN DRY-RUN MODE *****\n".to_string(),
            BackupEvent::Discovering { column, from, to } => {
                format!("backup  discovering {} values  {} .. {}\n", column, from, to)
            }
            BackupEvent::Discovered { partitions } => {
                format!(
                    "backup  found {} partitions: {}\n",
                    partitions.len(),
                    partitions.join(", ")
                )
            }
            BackupEvent::PageSizeClamped { requested, applied } => {
                format!(
                    "backup  rows per page cannot exceed {} (requested {})\n",
                    applied,
                    format_number(*requested)
                )
            }
            BackupEvent::PartitionStarted { partition } => {
                format!("backup {}  started\n", partition)
            }
            BackupEvent::PageArchived {
                partition,
                key,
                rows,
                location,
            } => match location {
                Some(_) => format!(
                    "backup {}  uploaded  {} rows → {}\n",
                    partition,
                    format_number(*rows),
                    key
                ),
                None => format!(
                    "backup {}  not uploading (dry run)  {} rows  {}\n",
                    partition,
                    format_number(*rows),
                    key
                ),
            },
            BackupEvent::PageFailed {
                partition,
                key,
                error,
            } => match key {
                Some(key) => format!("backup {}  FAILED {}: {}\n", partition, key, error),
                None => format!("backup {}  FAILED: {}\n", partition, error),
            },
            BackupEvent::Warning { partition, message } => {
                format!("backup {}  warning: {}\n", partition, message)
            }
            BackupEvent::PartitionFinished {
                partition,
                rows,
                elapsed,
            } => format!(
                "backup {}  finished  {} rows in {:.1?}\n",
                partition,
                format_number(*rows),
                elapsed
            ),
            BackupEvent::PartitionAborted { partition, error } => {
                format!("backup {}  ABORTED: {}\n", partition, error)
            }
            BackupEvent::Finished {
                total_rows,
                failures,
                elapsed,
            } => format!(
                "backup  done  {} rows, {} errors in {:.1?}\n",
                format_number(*total_rows),
                failures,
                elapsed
            ),
        }
    }
}

impl BackupReporter for StderrProgress {
    fn report(&self, event: BackupEvent) {
        let line = Self::render(&event);
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn render(event: &BackupEvent) -> serde_json::Value {
        match event {
            BackupEvent::DryRun => serde_json::json!({ "event": "dry_run" }),
            BackupEvent::Discovering { column, from, to } => serde_json::json!({
                "event": "discovering",
                "column": column,
                "from": from,
                "to": to
            }),
            BackupEvent::Discovered { partitions } => serde_json::json!({
                "event": "discovered",
                "partitions": partitions
            }),
            BackupEvent::PageSizeClamped { requested, applied } => serde_json::json!({
                "event": "page_size_clamped",
                "requested": requested,
                "applied": applied
            }),
            BackupEvent::PartitionStarted { partition } => serde_json::json!({
                "event": "partition_started",
                "partition": partition
            }),
            BackupEvent::PageArchived {
                partition,
                key,
                rows,
                location,
            } => serde_json::json!({
                "event": "page_archived",
                "partition": partition,
                "key": key,
                "rows": rows,
                "location": location
            }),
            BackupEvent::PageFailed {
                partition,
                key,
                error,
            } => serde_json::json!({
                "event": "page_failed",
                "partition": partition,
                "key": key,
                "error": error
            }),
            BackupEvent::Warning { partition, message } => serde_json::json!({
                "event": "warning",
                "partition": partition,
                "message": message
            }),
            BackupEvent::PartitionFinished {
                partition,
                rows,
                elapsed,
            } => serde_json::json!({
                "event": "partition_finished",
                "partition": partition,
                "rows": rows,
                "elapsed_ms": elapsed.as_millis() as u64
            }),
            BackupEvent::PartitionAborted { partition, error } => serde_json::json!({
                "event": "partition_aborted",
                "partition": partition,
                "error": error
            }),
            BackupEvent::Finished {
                total_rows,
                failures,
                elapsed,
            } => serde_json::json!({
                "event": "finished",
                "total_rows": total_rows,
                "failures": failures,
                "elapsed_ms": elapsed.as_millis() as u64
            }),
        }
    }
}

impl BackupReporter for JsonProgress {
    fn report(&self, event: BackupEvent) {
        if let Ok(line) = serde_json::to_string(&Self::render(&event)) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// Structured `tracing` events, for runs under a log collector.
pub struct TracingProgress;

impl BackupReporter for TracingProgress {
    fn report(&self, event: BackupEvent) {
        match event {
            BackupEvent::DryRun => tracing::info!("***** RUNNING IN DRY-RUN MODE *****"),
            BackupEvent::Discovering { column, from, to } => {
                tracing::info!(%column, %from, %to, "retrieving partition values...")
            }
            BackupEvent::Discovered { partitions } => {
                tracing::info!(count = partitions.len(), ?partitions, "backing up all data...")
            }
            BackupEvent::PageSizeClamped { requested, applied } => {
                tracing::warn!(requested, applied, "rows per page clamped")
            }
            BackupEvent::PartitionStarted { partition } => {
                tracing::info!(%partition, "backing up data...")
            }
            BackupEvent::PageArchived {
                partition,
                key,
                rows,
                location,
            } => match location {
                Some(location) => {
                    tracing::debug!(%partition, %key, rows, %location, "uploaded data")
                }
                None => tracing::info!(%partition, %key, rows, "not uploading data due to dry run"),
            },
            BackupEvent::PageFailed {
                partition,
                key,
                error,
            } => tracing::error!(%partition, key = key.as_deref(), %error, "page failed"),
            BackupEvent::Warning { partition, message } => {
                tracing::warn!(%partition, %message, "partition warning")
            }
            BackupEvent::PartitionFinished {
                partition,
                rows,
                elapsed,
            } => tracing::info!(%partition, rows, ?elapsed, "finished backing up data"),
            BackupEvent::PartitionAborted { partition, error } => {
                tracing::error!(%partition, %error, "query with partition value")
            }
            BackupEvent::Finished {
                total_rows,
                failures,
                elapsed,
            } => tracing::info!(total_rows, failures, ?elapsed, "finished backing up all data"),
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BackupReporter for NoProgress {
    fn report(&self, _event: BackupEvent) {}
}

/// Format a count with thousands separators: `1234567` → `"1,234,567"`.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
    Log,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise structured logs.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Log
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn BackupReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
            ProgressMode::Log => Box::new(TracingProgress),
        }
    }
}
