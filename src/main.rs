use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use synclip::config::Config;
use synclip::error::SynclipError;
use synclip::pipeline::{self, PipelineOptions};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Exit codes: success, fatal failure, and a batch that only partially
/// succeeded.
const EXIT_OK: u8 = 0;
const EXIT_FATAL: u8 = 1;
const EXIT_PARTIAL: u8 = 2;

#[derive(Parser)]
#[command(name = "synclip")]
#[command(version, about = "Batch lip-sync generation through a remote rendering service")]
#[command(
    long_about = "Split an audio track into segments at natural pauses, drive one disposable \
account per segment through the remote lip-sync service, and merge the rendered results."
)]
struct Cli {
    /// Source audio file
    audio: PathBuf,

    /// Source video file (re-encoded once and shared by every unit)
    video: PathBuf,

    /// Target segment duration in seconds
    #[arg(short, long)]
    target_secs: Option<u64>,

    /// Disable progress bars
    #[arg(long)]
    no_progress: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if !cli.audio.exists() {
        anyhow::bail!("Audio file not found: {}", cli.audio.display());
    }
    if !cli.video.exists() {
        anyhow::bail!("Video file not found: {}", cli.video.display());
    }

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(secs) = cli.target_secs {
        config.segmenter.target_duration_ms = secs * 1000;
    }
    config.validate().context("Configuration validation failed")?;

    info!("Audio:    {}", cli.audio.display());
    info!("Video:    {}", cli.video.display());
    info!("Service:  {}", config.service_url);
    info!(
        "Segments: target {}s, cut on >={}ms silence",
        config.segmenter.target_duration_ms / 1000,
        config.segmenter.min_silence_ms
    );

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupt received, finishing current unit...");
            cancelled.store(true, Ordering::Relaxed);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let options = PipelineOptions {
        show_progress: !cli.no_progress,
    };

    let result = pipeline::run(&cli.audio, &cli.video, &config, options, cancelled).await;

    match result {
        Ok(result) => {
            pipeline::print_summary(&result);
            let failed = result.stats.batch.failed_units + result.stats.batch.manual_units;
            if failed > 0 {
                info!("{failed} units did not complete; output is best effort");
                Ok(ExitCode::from(EXIT_PARTIAL))
            } else {
                Ok(ExitCode::from(EXIT_OK))
            }
        }
        Err(SynclipError::Cancelled) => {
            eprintln!("Cancelled.");
            Ok(ExitCode::from(EXIT_FATAL))
        }
        Err(e) => Err(e.into()),
    }
}
