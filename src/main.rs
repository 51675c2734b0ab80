//! CLI entry point for the TripModifications analyzer.
//!
//! Provides subcommands for decoding a feed (reporting which encoding shape
//! matched and which entities it carries) and for validating detours against
//! a GTFS schedule while deriving the renderable detour geometry.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use tripmod_analyzer::{
    decoder, geometry,
    fetch::{BasicClient, fetch_bytes},
    report, schedule::ScheduleTables, validator,
};

#[derive(Parser)]
#[command(name = "tripmod_analyzer")]
#[command(about = "Decode and validate GTFS-rt TripModifications feeds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a feed and summarize its entities
    Decode {
        /// Path to file or URL to fetch (.pb / .pb.gz / .pbtxt)
        #[arg(value_name = "FILE_OR_URL")]
        source: String,
    },
    /// Validate TripModifications and derive detour geometry
    Analyze {
        /// Path to file or URL to fetch (.pb / .pb.gz / .pbtxt)
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Directory of extracted GTFS tables (stops.txt, trips.txt, ...)
        #[arg(short, long)]
        gtfs: Option<String>,

        /// CSV file to append validation issues to
        #[arg(short, long, default_value = "issues.csv")]
        output: String,

        /// Also print the issue list as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/tripmod_analyzer.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("tripmod_analyzer.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { source } => {
            let bytes = fetcher(&source).await?;
            let (feed, meta) = decoder::decode(&bytes)?;

            info!(mode = %meta.mode, was_compressed = meta.was_compressed, "Feed decoded");
            for entity in &feed.entity {
                let fields = decoder::present_fields(entity);
                info!(entity_id = entity.id(), fields = fields.join(","), "Entity");
            }
            info!(total_entities = feed.entity.len(), "Decode summary");
        }
        Commands::Analyze {
            source,
            gtfs,
            output,
            json,
        } => {
            let bytes = fetcher(&source).await?;
            let (feed, meta) = decoder::decode(&bytes)?;
            info!(mode = %meta.mode, was_compressed = meta.was_compressed, "Feed decoded");

            let tables = match gtfs {
                Some(dir) => ScheduleTables::from_dir(Path::new(&dir))?,
                None => {
                    warn!("No GTFS directory given; routability checks and geometry fallbacks are limited");
                    ScheduleTables::default()
                }
            };

            let issues = validator::validate(&feed, &tables);
            report::log_summary(&issues);
            report::append_report(&output, &issues)?;
            if json {
                report::print_json(&issues)?;
            }

            let tripmods = decoder::trip_modification_entities(&feed);
            if tripmods.is_empty() {
                warn!("No TripModifications entities in the decoded feed");
            }
            let shapes_rt = decoder::rt_shapes(&feed);

            for &(entity_id, tm) in &tripmods {
                let original = match geometry::reference_trip_id(tm) {
                    Some(trip_id) => geometry::resolve_original_path(&tables, trip_id),
                    None => Vec::new(),
                };
                let stop_ids = geometry::replacement_stop_ids(tm);
                let detours = geometry::resolve_detour_paths(&shapes_rt, &tables, &stop_ids);
                let markers = geometry::replacement_stop_points(&tables, &stop_ids);

                info!(
                    entity_id,
                    original_points = original.len(),
                    detour_paths = detours.len(),
                    replacement_stops = markers.len(),
                    "Geometry resolved"
                );
            }
        }
    }

    Ok(())
}

/// Loads feed data from a local file path or fetches it over HTTP.
#[tracing::instrument(fields(source = %url))]
async fn fetcher(url: &str) -> Result<Vec<u8>> {
    let bytes = if url.starts_with("http") {
        let client = BasicClient::new();
        fetch_bytes(&client, url).await?
    } else {
        std::fs::read(url)?
    };
    Ok(bytes)
}
