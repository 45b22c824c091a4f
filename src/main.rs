use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use trailscope::blob::LocalBlobStore;
use trailscope::config::Config;
use trailscope::geoip::LazyGeoIndex;
use trailscope::pipeline::{bucket_report, generate_report, GenerateReportInput};
use trailscope::sources::cloudtrail::{scan, Partition};
use trailscope::store::{FsReportStore, ReportId, Retention};
use trailscope::traits::GeoIndex;
use trailscope::{Report, TimeWindow};

const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_OUTPUT_DIR: &str = "reports";

#[derive(Debug, Parser)]
#[command(name = "trailscope")]
#[command(about = "CloudTrail activity reports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the (account, region) partitions of a trail bucket.
    Scan {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        bucket: String,
        #[arg(long, default_value = "")]
        key_prefix: String,
    },
    /// Generate and store the report for one partition and window.
    Report {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        bucket: String,
        #[arg(long)]
        account: String,
        #[arg(long)]
        region: String,
        /// Prefix the account directory lives under, as printed by `scan`.
        #[arg(long, default_value = "AWSLogs/")]
        accounts_prefix: String,
        /// RFC 3339 start of the window.
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long)]
        duration_seconds: u64,
        #[arg(long, default_value = "local")]
        team: String,
        /// Reuse an id to overwrite an earlier attempt.
        #[arg(long)]
        report_id: Option<ReportId>,
        #[arg(long)]
        max_source_bytes: Option<u64>,
        #[arg(long)]
        retention: Option<Retention>,
    },
    /// Aggregate local log files and print the report.
    Import {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long)]
        duration_seconds: u64,
        /// `.json.gz` batches, or plain `.json`.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Aggregate every partition of a bucket into one report and print it.
    Bucket {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        bucket: String,
        #[arg(long, default_value = "")]
        key_prefix: String,
        #[arg(long, requires = "duration_seconds")]
        start: Option<DateTime<Utc>>,
        #[arg(long, requires = "start")]
        duration_seconds: Option<u64>,
        #[arg(long)]
        max_source_bytes: Option<u64>,
    },
}

impl Commands {
    fn config_path(&self) -> Option<&Path> {
        match self {
            Commands::Scan { config, .. }
            | Commands::Report { config, .. }
            | Commands::Bucket { config, .. } => Some(config),
            Commands::Import { config, .. } => config.as_deref(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.command.config_path() {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    init_tracing(&config);

    run(cli.command, &config)
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.log.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands, config: &Config) -> anyhow::Result<()> {
    match command {
        Commands::Scan {
            bucket, key_prefix, ..
        } => {
            let blobs = blob_store(config)?;
            let partitions = scan(&blobs, &bucket, &key_prefix)?;
            info!(bucket = %bucket, partitions = partitions.len(), "bucket scanned");
            for partition in partitions {
                println!("{}", serde_json::to_string(&partition)?);
            }
        }
        Commands::Report {
            bucket,
            account,
            region,
            accounts_prefix,
            start,
            duration_seconds,
            team,
            report_id,
            max_source_bytes,
            retention,
            ..
        } => {
            let blobs = blob_store(config)?;
            let geo = geo_index(config)?;
            let output_dir = config
                .report
                .output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
            let reports = FsReportStore::new(output_dir);

            let input = GenerateReportInput {
                report_id: report_id.unwrap_or_else(ReportId::generate),
                team_id: team,
                bucket,
                partition: Partition::new(accounts_prefix, account, region),
                window: TimeWindow::new(start, duration_seconds),
                retention: retention.unwrap_or(config.report.retention),
                max_source_bytes: max_source_bytes
                    .or(config.report.max_source_bytes_per_partition),
            };
            match generate_report(&blobs, geo.as_ref(), &reports, &input)? {
                Some(stored) => println!("{}", serde_json::to_string_pretty(&stored)?),
                None => println!("no matching activity for {}", input.report_id),
            }
        }
        Commands::Import {
            start,
            duration_seconds,
            files,
            ..
        } => {
            let geo = geo_index(config)?;
            let mut report = Report::new(TimeWindow::new(start, duration_seconds));
            for path in &files {
                import_file(&mut report, geo.as_ref(), path)?;
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Bucket {
            bucket,
            key_prefix,
            start,
            duration_seconds,
            max_source_bytes,
            ..
        } => {
            let blobs = blob_store(config)?;
            let geo = geo_index(config)?;
            let window = start.zip(duration_seconds).map(|(start, duration)| {
                TimeWindow::new(start, duration)
            });
            let report = bucket_report(
                &blobs,
                geo.as_ref(),
                &bucket,
                &key_prefix,
                window,
                max_source_bytes.or(config.report.max_source_bytes_per_partition),
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn blob_store(config: &Config) -> anyhow::Result<LocalBlobStore> {
    let Some(root) = &config.blobs.root else {
        bail!("blobs.root must be set in the config file");
    };
    let store = LocalBlobStore::new(root);
    Ok(match config.blobs.page_size {
        Some(page_size) => store.with_page_size(page_size),
        None => store,
    })
}

/// Opens the configured database up front so a broken one fails the command
/// before any ingestion.
fn geo_index(config: &Config) -> anyhow::Result<Box<dyn GeoIndex>> {
    match &config.geoip.database_path {
        Some(path) => {
            let index = LazyGeoIndex::from_path(path);
            index
                .ensure_open()
                .with_context(|| format!("failed to open geoip database {}", path.display()))?;
            Ok(Box::new(index))
        }
        None => default_geo_index(),
    }
}

#[cfg(feature = "bundled-geoip")]
fn default_geo_index() -> anyhow::Result<Box<dyn GeoIndex>> {
    let index = trailscope::geoip::bundled();
    index
        .ensure_open()
        .context("failed to open bundled geoip database")?;
    Ok(Box::new(index))
}

#[cfg(not(feature = "bundled-geoip"))]
fn default_geo_index() -> anyhow::Result<Box<dyn GeoIndex>> {
    tracing::warn!("no geoip database configured, addresses will not be located");
    Ok(Box::new(trailscope::geoip::NoGeoIndex))
}

fn import_file(report: &mut Report, geo: &dyn GeoIndex, path: &Path) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let compressed = path.extension().is_some_and(|extension| extension == "gz");
    let result = if compressed {
        report.import_compressed_log(file, geo)
    } else {
        report.import_log_json(file, geo)
    };
    result.with_context(|| format!("failed to import {}", path.display()))?;
    info!(path = %path.display(), principals = report.principals().len(), "imported log file");
    Ok(())
}
