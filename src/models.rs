//! Core data models used throughout Timestream Travel.
//!
//! These types represent the query pages, nested values, and run results that
//! flow through the backup pipeline. Wire formats are converted into these
//! types at the service boundary (see [`crate::timestream`]); nothing in the
//! pipeline looks at raw JSON from the query service.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Format used for time bounds inside query text.
pub const QUERY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A distinct value of the discriminator column. One worker per value.
pub type PartitionValue = String;

/// Half of a column descriptor: how to interpret the paired [`Datum`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    /// A scalar column. Carries the service's scalar type name (`VARCHAR`,
    /// `BIGINT`, `TIMESTAMP`, ...) for display only; values stay strings.
    Scalar(String),
    /// An array whose elements are all described by the boxed descriptor.
    Array(Box<ColumnDescriptor>),
    /// A nested row, paired positionally with its values.
    Row(Vec<ColumnDescriptor>),
    /// A list of `(time, value)` points, each value described by the boxed descriptor.
    TimeSeries(Box<ColumnDescriptor>),
}

impl ColumnKind {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnKind::Scalar(_) => "scalar",
            ColumnKind::Array(_) => "array",
            ColumnKind::Row(_) => "row",
            ColumnKind::TimeSeries(_) => "timeseries",
        }
    }
}

/// Column name plus type tag.
///
/// Element descriptors nested inside arrays and time series usually have no
/// name on the wire; they carry an empty string here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnDescriptor {
    pub fn scalar(name: impl Into<String>, scalar_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Scalar(scalar_type.into()),
        }
    }

    pub fn array(name: impl Into<String>, element: ColumnDescriptor) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Array(Box::new(element)),
        }
    }

    pub fn row(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Row(columns),
        }
    }

    pub fn time_series(name: impl Into<String>, value: ColumnDescriptor) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::TimeSeries(Box::new(value)),
        }
    }
}

/// One raw value as returned by the query service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datum {
    Scalar(String),
    Null,
    Array(Vec<Datum>),
    Row(Vec<Datum>),
    TimeSeries(Vec<TimePoint>),
}

impl Datum {
    pub fn scalar(value: impl Into<String>) -> Self {
        Datum::Scalar(value.into())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Datum::Scalar(_) => "scalar",
            Datum::Null => "null",
            Datum::Array(_) => "array",
            Datum::Row(_) => "row",
            Datum::TimeSeries(_) => "timeseries",
        }
    }
}

/// A single point of a time-series value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimePoint {
    pub time: String,
    pub value: Datum,
}

/// A result row: values paired positionally with the page's column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub data: Vec<Datum>,
}

impl Row {
    pub fn new(data: Vec<Datum>) -> Self {
        Self { data }
    }
}

/// One paginated query call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub query: String,
    pub next_token: Option<String>,
    pub max_rows: u32,
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPage {
    pub rows: Vec<Row>,
    pub columns: Vec<ColumnDescriptor>,
    /// Continuation token; `None` means the result set is exhausted.
    pub next_token: Option<String>,
}

/// A validated, half-open-in-spirit backup window with `from < to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, rejecting equal or inverted bounds.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if from > to {
            bail!(
                "'to' cannot be before 'from' (from: {}, to: {})",
                from.format(QUERY_TIME_FORMAT),
                to.format(QUERY_TIME_FORMAT)
            );
        }
        if from == to {
            bail!(
                "'to' cannot be equal to 'from' ({})",
                from.format(QUERY_TIME_FORMAT)
            );
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    pub fn to(&self) -> DateTime<Utc> {
        self.to
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {}",
            self.from.format(QUERY_TIME_FORMAT),
            self.to.format(QUERY_TIME_FORMAT)
        )
    }
}

/// Where rows come from and where archives go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    pub database: String,
    pub table: String,
    /// Discriminator column used to shard the run.
    pub column: String,
    pub bucket: String,
}

/// Category of a non-fatal failure collected during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FailureKind {
    /// A page fetch failed; the partition stopped.
    #[error("fetch")]
    Fetch,
    /// A row could not be serialized or compressed; the row was skipped.
    #[error("serialize")]
    Serialize,
    /// An archive upload failed; the partition moved on to its next page.
    #[error("upload")]
    Upload,
    /// The run was cancelled while this partition had a call in flight.
    #[error("cancelled")]
    Cancelled,
    /// The partition task panicked.
    #[error("panicked")]
    Panicked,
}

/// A recorded, non-fatal failure attributed to one partition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("partition '{partition}': {kind} failed: {message}")]
pub struct PartitionFailure {
    pub partition: PartitionValue,
    pub kind: FailureKind,
    pub message: String,
}

impl PartitionFailure {
    pub fn new(partition: &str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            partition: partition.to_string(),
            kind,
            message: message.into(),
        }
    }
}

/// Aggregate outcome of a backup run, built once after every worker finished.
#[derive(Debug, Clone, Default)]
pub struct BackupResult {
    /// Rows written per partition. Every discovered partition has an entry,
    /// including ones that contributed nothing.
    pub rows_per_partition: BTreeMap<PartitionValue, u64>,
    /// Archives successfully uploaded (always zero in dry-run).
    pub uploads: u64,
    pub failures: Vec<PartitionFailure>,
    pub elapsed: Duration,
}

impl BackupResult {
    pub fn has_errors(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn total_rows(&self) -> u64 {
        self.rows_per_partition.values().sum()
    }
}
