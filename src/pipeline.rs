use crate::assemble::assemble;
use crate::audio::{
    check_ffmpeg, check_ffprobe, export_segment_clips, extract_analysis_wav, get_media_duration,
    prepare_safe_video, segment_track, AudioTrack, EncodeSettings, SegmentClip,
};
use crate::batch::{BatchCoordinator, BatchStats};
use crate::config::Config;
use crate::error::{Result, SynclipError};
use crate::interactive::TerminalPrompt;
use crate::provision::DisposableMailProvider;
use crate::remote::HttpJobService;
use crate::unit::UnitContext;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info};

/// Per-run options on top of the persistent [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Show progress bars and spinners.
    pub show_progress: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            show_progress: true,
        }
    }
}

/// Timing and outcome numbers for the final summary.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub total_time: Duration,
    pub prepare_time: Duration,
    pub batch: BatchStats,
    pub segments_planned: usize,
}

/// Result of a full run.
#[derive(Debug)]
pub struct PipelineResult {
    /// Final merged artifact.
    pub final_artifact: PathBuf,
    pub stats: PipelineStats,
}

/// Run the whole batch: prepare media, plan segments, drive every unit
/// through the remote service, assemble the results.
pub async fn run(
    audio: &Path,
    video: &Path,
    config: &Config,
    options: PipelineOptions,
    cancelled: Arc<AtomicBool>,
) -> Result<PipelineResult> {
    let start_time = Instant::now();

    if !audio.exists() {
        return Err(SynclipError::FileNotFound(audio.display().to_string()));
    }
    if !video.exists() {
        return Err(SynclipError::FileNotFound(video.display().to_string()));
    }

    check_ffmpeg()?;
    check_ffprobe()?;
    config.ensure_dirs()?;

    let temp_dir = TempDir::new()?;
    debug!("Using temp directory: {:?}", temp_dir.path());

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 1: Media preparation
    // ═══════════════════════════════════════════════════════════════════════
    info!("Stage 1/4: Preparing media");
    let prepare_start = Instant::now();

    let prepare_pb = spinner(&options, "Re-encoding safe video...");

    let audio_duration = get_media_duration(audio)?;
    info!(
        "Source audio runs {:.1}s",
        audio_duration.as_secs_f64()
    );

    let safe_video = prepare_safe_video(video, &config.input_dir, &EncodeSettings::default())?;

    if let Some(pb) = &prepare_pb {
        pb.set_message("Extracting analysis audio...");
    }

    let analysis_wav = temp_dir.path().join("analysis.wav");
    extract_analysis_wav(audio, &analysis_wav)?;

    if let Some(pb) = prepare_pb {
        pb.finish_with_message("✓ Media prepared");
    }

    if cancelled.load(Ordering::Relaxed) {
        return Err(SynclipError::Cancelled);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 2: Segmentation
    // ═══════════════════════════════════════════════════════════════════════
    info!("Stage 2/4: Planning segments");

    let segment_pb = spinner(&options, "Searching silence cut points...");

    let track = AudioTrack::from_wav(&analysis_wav)?;
    let segments = segment_track(&track, &config.segmenter)?;

    if let Some(pb) = &segment_pb {
        pb.set_message(format!("Exporting {} segment clips...", segments.len()));
    }

    let clips: Vec<SegmentClip> = export_segment_clips(audio, &segments, &config.output_dir)?;

    if let Some(pb) = segment_pb {
        pb.finish_with_message(format!("✓ {} segments planned", clips.len()));
    }

    let prepare_time = prepare_start.elapsed();
    info!(
        "Prepared {} segments in {:.1}s",
        clips.len(),
        prepare_time.as_secs_f64()
    );

    if cancelled.load(Ordering::Relaxed) {
        return Err(SynclipError::Cancelled);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 3: Batch submission and collection
    // ═══════════════════════════════════════════════════════════════════════
    info!("Stage 3/4: Driving {} units", clips.len());

    let provider = DisposableMailProvider::new(
        config.mail_url.clone(),
        config.service_url.clone(),
        config.mail_sender_filter.clone(),
    );
    let service = HttpJobService::new(config.service_url.clone());
    let prompt = TerminalPrompt::new();

    let context = UnitContext {
        identities: &provider,
        inbox: &provider,
        service: &service,
        prompt: &prompt,
        config: &config.unit,
        video: &safe_video,
        output_dir: &config.output_dir,
        profiles_dir: &config.profiles_dir,
    };

    let coordinator =
        BatchCoordinator::new(context, cancelled.clone()).with_progress(options.show_progress);
    let report = coordinator.run(clips).await?;

    if cancelled.load(Ordering::Relaxed) {
        return Err(SynclipError::Cancelled);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 4: Assembly
    // ═══════════════════════════════════════════════════════════════════════
    info!(
        "Stage 4/4: Assembling {} result artifacts",
        report.artifacts.len()
    );

    let assemble_pb = spinner(&options, "Concatenating results...");

    let final_artifact = assemble(&report.artifacts, &config.output_dir)?;

    if let Some(pb) = assemble_pb {
        pb.finish_with_message(format!("✓ {}", final_artifact.display()));
    }

    let stats = PipelineStats {
        total_time: start_time.elapsed(),
        prepare_time,
        segments_planned: report.stats.total_units,
        batch: report.stats,
    };

    Ok(PipelineResult {
        final_artifact,
        stats,
    })
}

fn spinner(options: &PipelineOptions, message: &str) -> Option<ProgressBar> {
    if !options.show_progress {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Print a summary of the run.
pub fn print_summary(result: &PipelineResult) {
    let stats = &result.stats;
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                      Batch Run Complete                        ");
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Output:     {}", result.final_artifact.display());
    println!("  Segments:   {}", stats.segments_planned);
    println!(
        "  Units:      {} succeeded, {} failed, {} manual",
        stats.batch.completed_units, stats.batch.failed_units, stats.batch.manual_units
    );
    println!();
    println!("  Timing:");
    println!("    Prepare:  {:.1}s", stats.prepare_time.as_secs_f64());
    println!(
        "    Batch:    {:.1}s",
        stats.batch.total_time.as_secs_f64()
    );
    println!("    Total:    {:.1}s", stats.total_time.as_secs_f64());
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}
