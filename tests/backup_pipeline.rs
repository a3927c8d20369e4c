//! End-to-end tests of the backup pipeline through the public API, with an
//! in-memory table standing in for Timestream and an in-memory object store.

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;

use timestream_travel::backup::{run_backup, BackupParams, Services};
use timestream_travel::models::{
    BackupTarget, ColumnDescriptor, Datum, FailureKind, QueryPage, QueryRequest, Row,
};
use timestream_travel::progress::{BackupEvent, BackupReporter};
use timestream_travel::store::InMemoryObjectStore;
use timestream_travel::traits::QueryService;

// ============ Fakes ============

enum Partition {
    Rows(usize),
    Fails,
    Hangs,
}

/// A table of synthetic rows, one block per partition value, paged by
/// `max_rows` with offset tokens.
struct FakeTable {
    partitions: Vec<(&'static str, Partition)>,
    discovery_fails: bool,
    requests: Mutex<Vec<QueryRequest>>,
}

impl FakeTable {
    fn new(partitions: Vec<(&'static str, Partition)>) -> Self {
        Self {
            partitions,
            discovery_fails: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn partition_requests(&self) -> Vec<QueryRequest> {
        self.requests()
            .into_iter()
            .filter(|r| !r.query.contains("GROUP BY"))
            .collect()
    }
}

fn columns() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::scalar("measure_name", "VARCHAR"),
        ColumnDescriptor::scalar("time", "TIMESTAMP"),
        ColumnDescriptor::scalar("measure_value::double", "DOUBLE"),
    ]
}

fn to() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 6, 12, 0, 0, 0).unwrap()
}

fn from() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 6, 9, 0, 0, 0).unwrap()
}

/// Row `i` of a partition, newest first: one second apart, ending just before `to`.
fn row(partition: &str, i: usize) -> Row {
    let time = to() - chrono::Duration::seconds(i as i64 + 1);
    Row::new(vec![
        Datum::scalar(partition),
        Datum::scalar(time.format("%Y-%m-%d %H:%M:%S%.9f").to_string()),
        Datum::scalar(format!("{}.5", i)),
    ])
}

#[async_trait]
impl QueryService for FakeTable {
    async fn query(&self, request: &QueryRequest) -> Result<QueryPage> {
        self.requests.lock().unwrap().push(request.clone());

        if request.query.contains("GROUP BY") {
            if self.discovery_fails {
                bail!("AccessDeniedException: not authorized");
            }
            return Ok(QueryPage {
                rows: self
                    .partitions
                    .iter()
                    .map(|(name, _)| Row::new(vec![Datum::scalar(*name)]))
                    .collect(),
                columns: vec![ColumnDescriptor::scalar("measure_name", "VARCHAR")],
                next_token: None,
            });
        }

        let value = request
            .query
            .split("measure_name = '")
            .nth(1)
            .and_then(|rest| rest.split('\'').next())
            .unwrap_or_default()
            .to_string();
        let partition = self
            .partitions
            .iter()
            .find(|(name, _)| *name == value)
            .map(|(_, p)| p);

        match partition {
            Some(Partition::Rows(total)) => {
                let offset: usize = request
                    .next_token
                    .as_deref()
                    .map(|t| t.parse().unwrap())
                    .unwrap_or(0);
                let end = (offset + request.max_rows as usize).min(*total);
                Ok(QueryPage {
                    rows: (offset..end).map(|i| row(&value, i)).collect(),
                    columns: columns(),
                    next_token: (end < *total).then(|| end.to_string()),
                })
            }
            Some(Partition::Fails) => bail!("ThrottlingException: rate exceeded"),
            Some(Partition::Hangs) => Ok(std::future::pending::<QueryPage>().await),
            None => Ok(QueryPage::default()),
        }
    }
}

#[derive(Default)]
struct RecordingReporter {
    events: Mutex<Vec<BackupEvent>>,
}

impl RecordingReporter {
    fn events(&self) -> Vec<BackupEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl BackupReporter for RecordingReporter {
    fn report(&self, event: BackupEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct Harness {
    table: Arc<FakeTable>,
    store: Arc<InMemoryObjectStore>,
    reporter: Arc<RecordingReporter>,
}

impl Harness {
    fn new(table: FakeTable) -> Self {
        Self {
            table: Arc::new(table),
            store: Arc::new(InMemoryObjectStore::new()),
            reporter: Arc::new(RecordingReporter::default()),
        }
    }

    fn services(&self) -> Services {
        Services {
            query: self.table.clone(),
            store: self.store.clone(),
            reporter: self.reporter.clone(),
        }
    }
}

fn params() -> BackupParams {
    BackupParams {
        target: BackupTarget {
            database: "TestDB".into(),
            table: "IoT".into(),
            column: "measure_name".into(),
            bucket: "backups".into(),
        },
        from: from(),
        to: to(),
        rows_per_page: 1000,
        dry_run: false,
    }
}

fn gunzip(bytes: &[u8]) -> String {
    let mut out = String::new();
    GzDecoder::new(bytes).read_to_string(&mut out).unwrap();
    out
}

// ============ Tests ============

#[tokio::test]
async fn failing_partition_does_not_stop_the_others() {
    let h = Harness::new(FakeTable::new(vec![
        ("A", Partition::Rows(3)),
        ("B", Partition::Fails),
    ]));

    let result = run_backup(&params(), h.services(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.rows_per_partition["A"], 3);
    assert_eq!(result.rows_per_partition["B"], 0);
    assert_eq!(result.uploads, 1);
    assert!(result.has_errors());
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].partition, "B");
    assert_eq!(result.failures[0].kind, FailureKind::Fetch);

    let keys = h.store.keys("backups");
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("TestDB/IoT/A/20210611/20210611T235957Z_20210611T235959Z_"));
    assert!(keys[0].ends_with(".log.gz"));

    let body = gunzip(&h.store.get("backups", &keys[0]).unwrap());
    let lines: Vec<serde_json::Value> = body
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["measure_name"], "A");
    assert_eq!(lines[0]["time"], "2021-06-11 23:59:59.000000000");
    assert_eq!(lines[2]["measure_value::double"], "2.5");
}

#[tokio::test]
async fn checksum_in_key_matches_archive_bytes() {
    let h = Harness::new(FakeTable::new(vec![("A", Partition::Rows(2))]));

    run_backup(&params(), h.services(), CancellationToken::new())
        .await
        .unwrap();

    let key = &h.store.keys("backups")[0];
    let body = h.store.get("backups", key).unwrap();
    let expected = format!("_{:08x}.log.gz", crc32fast::hash(&body));
    assert!(key.ends_with(&expected), "{} should end with {}", key, expected);
}

#[tokio::test]
async fn discovery_runs_before_any_partition_query() {
    let h = Harness::new(FakeTable::new(vec![
        ("A", Partition::Rows(1)),
        ("B", Partition::Rows(1)),
    ]));

    run_backup(&params(), h.services(), CancellationToken::new())
        .await
        .unwrap();

    let requests = h.table.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(
        requests[0].query,
        "SELECT measure_name FROM \"TestDB\".\"IoT\" WHERE time >= '2021-06-09 00:00:00' \
         and time <= '2021-06-12 00:00:00' GROUP BY measure_name"
    );
    assert_eq!(requests[0].max_rows, 100);
    assert!(requests[1..]
        .iter()
        .all(|r| r.query.ends_with("ORDER BY time DESC")));
}

#[tokio::test]
async fn pages_follow_tokens_and_make_one_archive_each() {
    let h = Harness::new(FakeTable::new(vec![("A", Partition::Rows(2500))]));

    let result = run_backup(&params(), h.services(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.rows_per_partition["A"], 2500);
    assert_eq!(result.uploads, 3);
    assert!(!result.has_errors());
    assert_eq!(h.store.keys("backups").len(), 3);

    let tokens: Vec<Option<String>> = h
        .table
        .partition_requests()
        .into_iter()
        .map(|r| r.next_token)
        .collect();
    assert_eq!(
        tokens,
        vec![None, Some("1000".to_string()), Some("2000".to_string())]
    );
}

#[tokio::test]
async fn oversized_page_request_is_clamped() {
    let h = Harness::new(FakeTable::new(vec![("A", Partition::Rows(1))]));
    let mut params = params();
    params.rows_per_page = 5000;

    run_backup(&params, h.services(), CancellationToken::new())
        .await
        .unwrap();

    assert!(h
        .table
        .partition_requests()
        .iter()
        .all(|r| r.max_rows == 1000));
    assert!(h.reporter.events().contains(&BackupEvent::PageSizeClamped {
        requested: 5000,
        applied: 1000,
    }));
}

#[tokio::test]
async fn inverted_or_empty_window_queries_nothing() {
    for (from, to) in [(to(), from()), (from(), from())] {
        let h = Harness::new(FakeTable::new(vec![("A", Partition::Rows(1))]));
        let mut params = params();
        params.from = from;
        params.to = to;

        let err = run_backup(&params, h.services(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("'to' cannot be"));
        assert!(h.table.requests().is_empty());
    }
}

#[tokio::test]
async fn dry_run_counts_rows_without_uploading() {
    let h = Harness::new(FakeTable::new(vec![
        ("A", Partition::Rows(1200)),
        ("B", Partition::Rows(7)),
    ]));
    let mut params = params();
    params.dry_run = true;

    let result = run_backup(&params, h.services(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.rows_per_partition["A"], 1200);
    assert_eq!(result.rows_per_partition["B"], 7);
    assert_eq!(result.uploads, 0);
    assert!(!result.has_errors());
    assert!(h.store.is_empty());

    let events = h.reporter.events();
    assert_eq!(events[0], BackupEvent::DryRun);
    let archived = events
        .iter()
        .filter(|e| matches!(e, BackupEvent::PageArchived { location: None, .. }))
        .count();
    assert_eq!(archived, 3);
}

#[tokio::test]
async fn discovery_failure_is_fatal() {
    let mut table = FakeTable::new(vec![("A", Partition::Rows(1))]);
    table.discovery_fails = true;
    let h = Harness::new(table);

    let err = run_backup(&params(), h.services(), CancellationToken::new())
        .await
        .unwrap_err();

    let message = format!("{:#}", err);
    assert!(message.contains("retrieve partition values"));
    assert!(message.contains("AccessDeniedException"));
    assert!(h.table.partition_requests().is_empty());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn empty_table_is_a_clean_run() {
    let h = Harness::new(FakeTable::new(vec![]));

    let result = run_backup(&params(), h.services(), CancellationToken::new())
        .await
        .unwrap();

    assert!(result.rows_per_partition.is_empty());
    assert_eq!(result.total_rows(), 0);
    assert!(!result.has_errors());
}

#[tokio::test]
async fn cancellation_stops_hanging_workers() {
    let h = Harness::new(FakeTable::new(vec![
        ("A", Partition::Rows(3)),
        ("B", Partition::Hangs),
    ]));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        run_backup(&params(), h.services(), cancel),
    )
    .await
    .expect("run should return promptly after cancellation")
    .unwrap();

    assert_eq!(result.rows_per_partition["A"], 3);
    assert_eq!(result.rows_per_partition["B"], 0);
    assert!(result.has_errors());
    assert!(result
        .failures
        .iter()
        .any(|f| f.partition == "B" && f.kind == FailureKind::Cancelled));
}

#[tokio::test]
async fn every_partition_reports_start_and_the_run_reports_finish() {
    let h = Harness::new(FakeTable::new(vec![
        ("A", Partition::Rows(1)),
        ("B", Partition::Fails),
    ]));

    run_backup(&params(), h.services(), CancellationToken::new())
        .await
        .unwrap();

    let events = h.reporter.events();
    let started = events
        .iter()
        .filter(|e| matches!(e, BackupEvent::PartitionStarted { .. }))
        .count();
    assert_eq!(started, 2);
    assert!(events
        .iter()
        .any(|e| matches!(e, BackupEvent::PartitionAborted { partition, .. } if partition == "B")));
    assert!(matches!(
        events.last(),
        Some(BackupEvent::Finished { total_rows: 1, failures: 1, .. })
    ));
}
