//! CLI entry point for the air quality monitor.
//!
//! Provides subcommands for listing the station catalog, running a single
//! scan across the configured sources, and polling on an interval.

use air_monitor::config::Settings;
use air_monitor::model::{Rating, SourceTag, StationRef};
use air_monitor::output::{ScanSummary, filter_by_rating, log_report, print_json};
use air_monitor::scan::Scanner;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "air_monitor")]
#[command(about = "Polls air quality stations and rates their latest readings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ScanArgs {
    /// Station ids to scan (repeatable); defaults to the whole catalog
    #[arg(short, long = "station", value_name = "ID")]
    stations: Vec<String>,

    /// Sources in precedence order
    #[arg(long, value_delimiter = ',', default_values_t = [SourceTag::Scraped, SourceTag::Rest])]
    sources: Vec<SourceTag>,

    /// Only show stations with these overall ratings
    #[arg(long, value_delimiter = ',')]
    only: Vec<Rating>,

    /// Emit the report as JSON instead of one line per station
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured station catalog
    Stations,
    /// Run a single scan and report the results
    Scan(ScanArgs),
    /// Scan repeatedly on a fixed interval
    Watch {
        #[command(flatten)]
        scan: ScanArgs,

        /// Seconds between scans
        #[arg(short, long, default_value_t = 600)]
        interval: u64,

        /// Number of scans to run (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        cycles: usize,

        /// Drop cached results before every scan
        #[arg(long, default_value_t = false)]
        fresh: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/air_monitor.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("air_monitor.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("loading settings")?;

    match cli.command {
        Commands::Stations => {
            for station in settings.registry.all() {
                info!(
                    station_id = %station.id,
                    name = %station.name,
                    lat = station.latitude,
                    lng = station.longitude,
                    sinaica = %station.scraped_id,
                    openaq = %station.rest_id,
                    "Station"
                );
            }
            info!(total = settings.registry.all().len(), "Station catalog");
        }
        Commands::Scan(args) => {
            let scanner = settings.build_scanner()?;
            let stations = select_stations(&settings, &args)?;
            run_scan(&scanner, &stations, &args).await?;
        }
        Commands::Watch {
            scan,
            interval,
            cycles,
            fresh,
        } => {
            let scanner = settings.build_scanner()?;
            let stations = select_stations(&settings, &scan)?;
            watch(&scanner, &stations, &scan, interval, cycles, fresh).await?;
        }
    }

    Ok(())
}

fn select_stations(settings: &Settings, args: &ScanArgs) -> Result<Vec<StationRef>> {
    if args.stations.is_empty() {
        return Ok(settings.registry.all().to_vec());
    }
    Ok(settings.registry.select(&args.stations)?)
}

async fn run_scan(scanner: &Scanner, stations: &[StationRef], args: &ScanArgs) -> Result<()> {
    let report = scanner.scan(stations, &args.sources).await;
    let shown = filter_by_rating(&report.snapshots, &args.only);

    if args.json {
        print_json(&serde_json::json!({
            "generated_at": report.generated_at,
            "sources": report.sources,
            "summary": ScanSummary::from_snapshots(shown.iter().copied()),
            "snapshots": shown,
        }))?;
    } else {
        log_report(&shown);
    }
    Ok(())
}

/// Scans every `interval` seconds. The cache carries over between cycles
/// unless `fresh` is set.
#[tracing::instrument(skip(scanner, stations, args), fields(stations = stations.len()))]
async fn watch(
    scanner: &Scanner,
    stations: &[StationRef],
    args: &ScanArgs,
    interval: u64,
    cycles: usize,
    fresh: bool,
) -> Result<()> {
    if cycles == 0 {
        info!(interval, "Polling indefinitely. Press Ctrl+C to stop.");
    } else {
        info!(cycles, interval, "Starting polling");
    }

    let mut cycle = 0;
    loop {
        if cycles > 0 && cycle >= cycles {
            break;
        }
        cycle += 1;

        if fresh {
            scanner.cache().invalidate_all();
        }
        info!(cycle, "Starting scan cycle");
        run_scan(scanner, stations, args).await?;

        if cycles == 0 || cycle < cycles {
            info!(interval, "Waiting before next scan");
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }

    info!(cycles = cycle, "Finished polling");
    Ok(())
}
