//! Event archiver: one chaptered video per camera per day.
//!
//! Usage:
//!   archiver archive --date 2024-10-08 --camera frontgate          # archive one day
//!   archiver archive --date-range 2024-10-01:2024-10-07 --camera frontgate --zone road
//!   archiver list    --date 2024-10-08 --camera frontgate --jsonl  # describe clips only

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use archiver::clip::ArchiveRun;
use archiver::config::{Config, OutputFormat};
use archiver::error::ArchiveError;
use archiver::lifecycle::spawn_signal_listener;
use archiver::manager::{parse_date, parse_date_range, write_listing, ArchiveManager, RunOutcome};
use archiver::media::FfmpegEngine;

/// Exit code for a run stopped by SIGINT / SIGTERM.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "archiver", about = "Archive NVR motion events into chaptered videos", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download, annotate and concatenate a day's clips.
    Archive {
        #[command(flatten)]
        filter: Filter,
        /// Inclusive range `YYYY-MM-DD:YYYY-MM-DD`, instead of --date.
        #[arg(long, conflicts_with = "date")]
        date_range: Option<String>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Print the day's clips as JSON without downloading them.
    List {
        #[command(flatten)]
        filter: Filter,
        /// Also write the listing as a JSON-lines file into the output dir.
        #[arg(long)]
        jsonl: bool,
        #[arg(long)]
        base_url: Option<String>,
    },
}

#[derive(Args)]
struct Filter {
    /// Day to process, `YYYY-MM-DD`.
    #[arg(long)]
    date: Option<String>,
    /// Camera name.
    #[arg(long)]
    camera: String,
    #[arg(long)]
    zone: Option<String>,
    #[arg(long)]
    label: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            if matches!(e.downcast_ref::<ArchiveError>(), Some(ArchiveError::Interrupted)) {
                warn!("Stopped by interrupt");
                return ExitCode::from(EXIT_INTERRUPTED);
            }
            error!(error = %format!("{e:#}"), "Archiver failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load {}", path.display())),
        None => Ok(Config::default()),
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut cfg = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Archive { filter, date_range, output_dir, format, base_url, concurrency } => {
            if let Some(dir) = output_dir {
                cfg.output.dir = dir;
            }
            if let Some(format) = format {
                cfg.output.format = format;
            }
            if let Some(url) = base_url {
                cfg.server.base_url = url;
            }
            if let Some(n) = concurrency {
                cfg.batch.concurrency = n;
            }
            run_archive(cfg, filter, date_range).await
        }
        Command::List { filter, jsonl, base_url } => {
            if let Some(url) = base_url {
                cfg.server.base_url = url;
            }
            run_list(cfg, filter, jsonl).await
        }
    }
}

async fn run_archive(cfg: Config, filter: Filter, date_range: Option<String>) -> anyhow::Result<ExitCode> {
    let engine = FfmpegEngine::new(&cfg.media);
    engine.check().context("Media engine unavailable")?;

    info!(
        base_url = cfg.server.base_url,
        output_dir = ?cfg.output.dir,
        format = %cfg.output.format,
        concurrency = cfg.batch.concurrency,
        max_failures = cfg.batch.max_failures,
        "Starting archiver"
    );

    let cancel = CancellationToken::new();
    let listener = spawn_signal_listener(cancel.clone());
    let manager = ArchiveManager::new(cfg, Arc::new(engine), cancel.clone())?;

    let result = match date_range {
        Some(range) => {
            let (start, end) = parse_date_range(&range)?;
            let summary = manager
                .archive_range(start, end, &filter.camera, filter.zone, filter.label)
                .await?;
            for (date, e) in &summary.failed {
                error!(date = %date, reason = e.reason_code(), error = %e, "Day not archived");
            }
            Ok(if summary.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        None => {
            let run = run_for(&filter)?;
            match manager.archive(&run).await? {
                RunOutcome::Archived { output, succeeded, failed, chapters } => {
                    info!(output = ?output, succeeded, failed, chapters, "Archive written");
                }
                RunOutcome::Skipped { output } => info!(output = ?output, "Archive skipped, already exists"),
                RunOutcome::NoEvents => info!("No events, nothing written"),
            }
            Ok(ExitCode::SUCCESS)
        }
    };

    listener.abort();
    result
}

async fn run_list(cfg: Config, filter: Filter, jsonl: bool) -> anyhow::Result<ExitCode> {
    let output_dir = cfg.output.dir.clone();
    let engine = FfmpegEngine::new(&cfg.media);
    let manager = ArchiveManager::new(cfg, Arc::new(engine), CancellationToken::new())?;
    let run = run_for(&filter)?;

    let listings = manager.list(&run).await?;
    for listing in &listings {
        println!("{}", serde_json::to_string(listing)?);
    }
    if jsonl {
        let path = write_listing(&output_dir, &run, &listings)?;
        info!(path = ?path, clips = listings.len(), "Listing written");
    }
    Ok(ExitCode::SUCCESS)
}

fn run_for(filter: &Filter) -> anyhow::Result<ArchiveRun> {
    let date = filter.date.as_deref().context("--date or --date-range is required")?;
    Ok(ArchiveRun::new(parse_date(date)?, filter.camera.clone())
        .with_zone(filter.zone.clone())
        .with_label(filter.label.clone()))
}
