//! # Timestream Travel
//!
//! Backs up time-series data from Amazon Timestream into S3 as gzip-compressed
//! newline-delimited JSON archives.
//!
//! A run covers one time window. The table is split by the distinct values of
//! a discriminator column (the *partition* values, `measure_name` by default),
//! and every partition is exported concurrently by its own worker: it pages
//! through the partition's rows, newest first, and uploads one archive per
//! page under
//!
//! ```text
//! <database>/<table>/<partition>/<YYYYMMDD>/<from>_<to>_<crc32>.log.gz
//! ```
//!
//! Failures are collected rather than fatal: a partition that fails does not
//! stop the others, and the run reports every error at the end.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  values   ┌──────────────┐  pages   ┌───────────┐
//! │ discover   │─────────▶│ worker × N   │────────▶│ archive   │
//! │ GROUP BY   │           │ (one task    │          │ gzip+crc  │
//! └────────────┘           │  per value)  │          └─────┬─────┘
//!       ▲                  └──────┬───────┘                │
//!       │                         │ reports                ▼
//! ┌─────┴──────┐           ┌──────▼───────┐          ┌───────────┐
//! │ Timestream │           │   backup     │          │ S3 / dir  │
//! │ (pages)    │           │  aggregate   │          │ (put)     │
//! └────────────┘           └──────────────┘          └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! timestream-travel backup --database TestDB --table IoT --bucket backups --from 1d
//! timestream-travel backup --from "2021-06-09" --to "2021-06-12" --dry-run
//! timestream-travel backup --from 2h --output-dir ./archives
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Core data types |
//! | [`flatten`] | Nested query values to plain JSON |
//! | [`archive`] | Gzip NDJSON archives and object keys |
//! | [`traits`] | `QueryService` / `ObjectStore` seams |
//! | [`pages`] | Paginated, cancellable result streams |
//! | [`discover`] | Partition value discovery |
//! | [`worker`] | Per-partition export |
//! | [`backup`] | Run orchestration and summary |
//! | [`progress`] | Progress events and reporters |
//! | [`aws`] | Credentials and SigV4 signing |
//! | [`timestream`] | Timestream Query client |
//! | [`s3`] | S3 uploader |
//! | [`store`] | In-memory and local-directory stores |
//! | [`timespec`] | `--from` / `--to` parsing |
//! | [`config`] | TOML configuration parsing |

pub mod archive;
pub mod aws;
pub mod backup;
pub mod config;
pub mod discover;
pub mod flatten;
pub mod models;
pub mod pages;
pub mod progress;
pub mod s3;
pub mod store;
pub mod timespec;
pub mod timestream;
pub mod traits;
pub mod worker;
