//! # Timestream Travel CLI (`timestream-travel`)
//!
//! Backs up a Timestream table into S3, one gzip archive per result page and
//! partition value.
//!
//! ## Usage
//!
//! ```bash
//! timestream-travel [--config travel.toml] [--verbose] backup [flags]
//! ```
//!
//! ## Examples
//!
//! ```bash
//! # Last hour of TestDB.IoT into the default bucket
//! timestream-travel backup
//!
//! # Three days, partitioned by a custom column
//! timestream-travel backup --from 2021-06-09 --to 2021-06-12 --column device_id
//!
//! # Relative window: from 1 day before `to`, `to` = 2 hours ago
//! timestream-travel backup --from 1d --to 2h
//!
//! # Query only, build archives, upload nothing
//! timestream-travel backup --from 1w --dry-run
//!
//! # Write archives to a local directory instead of S3
//! timestream-travel backup --output-dir ./archives
//! ```
//!
//! The run summary goes to stdout; progress goes to stderr. The process exits
//! non-zero if any partition recorded an error.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use timestream_travel::aws::AwsCredentials;
use timestream_travel::backup::{render_summary, run_backup, BackupParams, Services};
use timestream_travel::config::{self, Config};
use timestream_travel::models::BackupTarget;
use timestream_travel::progress::ProgressMode;
use timestream_travel::s3::{S3Settings, S3Uploader};
use timestream_travel::store::LocalDirStore;
use timestream_travel::timespec::resolve_range;
use timestream_travel::timestream::TimestreamQueryClient;
use timestream_travel::traits::ObjectStore;

/// Timestream Travel: back up Amazon Timestream tables into S3.
#[derive(Parser)]
#[command(
    name = "timestream-travel",
    about = "Back up time-series data from Amazon Timestream into S3",
    version
)]
struct Cli {
    /// Path to an optional configuration file (TOML).
    ///
    /// Flags given on the command line override values from the file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Progress output on stderr. Defaults to `human` on a terminal and
    /// `log` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up time-series data from Amazon Timestream.
    ///
    /// Discovers the distinct values of `--column` in the window, then
    /// exports every value concurrently, one archive per result page.
    #[command(alias = "b")]
    Backup(BackupArgs),
}

#[derive(Args)]
struct BackupArgs {
    /// AWS region [default: eu-west-1].
    #[arg(short, long)]
    region: Option<String>,

    /// Timestream database [default: TestDB].
    #[arg(long, visible_alias = "db")]
    database: Option<String>,

    /// Timestream table [default: IoT].
    #[arg(long, visible_alias = "tbl")]
    table: Option<String>,

    /// S3 bucket receiving the archives [default: test-playday-bucket].
    #[arg(short, long)]
    bucket: Option<String>,

    /// Column whose distinct values partition the export [default: measure_name].
    #[arg(short, long)]
    column: Option<String>,

    /// Start of the window: absolute (`2021-06-09`, `2021-06-09 12:00:00`)
    /// or relative to `--to` (`30m`, `1h`, `1d`, `1w`) [default: 1 hour before `--to`].
    #[arg(long)]
    from: Option<String>,

    /// End of the window: absolute, or relative to now [default: now].
    #[arg(long)]
    to: Option<String>,

    /// Rows per page and archive, at most 1000 [default: 1000].
    #[arg(long)]
    rows: Option<u64>,

    /// Query and build archives, but upload nothing.
    #[arg(long)]
    dry_run: bool,

    /// Write archives under this directory instead of S3.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

impl BackupArgs {
    fn apply(&self, cfg: &mut Config) {
        if let Some(ref region) = self.region {
            cfg.aws.region = region.clone();
        }
        if let Some(ref database) = self.database {
            cfg.backup.database = database.clone();
        }
        if let Some(ref table) = self.table {
            cfg.backup.table = table.clone();
        }
        if let Some(ref bucket) = self.bucket {
            cfg.backup.bucket = bucket.clone();
        }
        if let Some(ref column) = self.column {
            cfg.backup.column = column.clone();
        }
        if let Some(rows) = self.rows {
            cfg.backup.rows = rows;
        }
        cfg.backup.dry_run |= self.dry_run;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "timestream_travel=debug"
    } else {
        "timestream_travel=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = match cli.config {
        Some(ref path) => config::load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Backup(args) => {
            args.apply(&mut cfg);
            cfg.validate()?;
            let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
            backup(&cfg, &args, progress).await?;
        }
    }

    Ok(())
}

async fn backup(cfg: &Config, args: &BackupArgs, progress: ProgressMode) -> Result<()> {
    let (from, to) = resolve_range(args.from.as_deref(), args.to.as_deref(), Utc::now());
    let params = BackupParams {
        target: BackupTarget {
            database: cfg.backup.database.clone(),
            table: cfg.backup.table.clone(),
            column: cfg.backup.column.clone(),
            bucket: cfg.backup.bucket.clone(),
        },
        from,
        to,
        rows_per_page: cfg.backup.rows,
        dry_run: cfg.backup.dry_run,
    };

    let creds = AwsCredentials::from_env()?;
    let query = TimestreamQueryClient::new(
        creds.clone(),
        cfg.aws.region.clone(),
        cfg.aws.query_endpoint.clone(),
    );
    let store: Arc<dyn ObjectStore> = match args.output_dir {
        Some(ref dir) => Arc::new(LocalDirStore::new(dir)),
        None => Arc::new(S3Uploader::new(
            creds,
            S3Settings {
                region: cfg.aws.region.clone(),
                endpoint: cfg.aws.s3_endpoint.clone(),
                path_style: cfg.aws.path_style,
            },
        )),
    };
    info!(region = %cfg.aws.region, store = store.kind(), "services ready");

    let services = Services {
        query: Arc::new(query),
        store,
        reporter: Arc::from(progress.reporter()),
    };

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, cancelling backup");
                cancel_on_signal.cancel();
            }
            Err(e) => error!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });

    let result = run_backup(&params, services, cancel).await?;
    print!("{}", render_summary(&params, &result));

    if result.has_errors() {
        bail!("encountered {} errors", result.failures.len());
    }
    Ok(())
}
