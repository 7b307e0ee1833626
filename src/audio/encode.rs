use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, SynclipError};

use super::{Segment, SegmentClip};

/// Re-encode settings for the shared safe video.
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub crf: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
            video_bitrate: "1M".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

/// Check if FFmpeg is installed and accessible.
pub fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg").arg("-version").output().map_err(|e| {
        SynclipError::Encode(format!(
            "FFmpeg not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
        ))
    })?;

    if !output.status.success() {
        return Err(SynclipError::Encode("FFmpeg check failed".to_string()));
    }

    debug!("FFmpeg is available");
    Ok(())
}

/// Check if FFprobe is installed and accessible.
pub fn check_ffprobe() -> Result<()> {
    let output = Command::new("ffprobe")
        .arg("-version")
        .output()
        .map_err(|e| {
            SynclipError::Encode(format!(
                "FFprobe not found. Please install FFmpeg (includes FFprobe). Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(SynclipError::Encode("FFprobe check failed".to_string()));
    }

    debug!("FFprobe is available");
    Ok(())
}

/// Get media duration using FFprobe.
pub fn get_media_duration(input: &Path) -> Result<Duration> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .output()
        .map_err(|e| SynclipError::Encode(format!("Failed to run FFprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SynclipError::Encode(format!("FFprobe failed: {stderr}")));
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    let duration_secs: f64 = duration_str.trim().parse().map_err(|e| {
        SynclipError::Encode(format!(
            "Failed to parse duration '{}': {e}",
            duration_str.trim()
        ))
    })?;

    Ok(Duration::from_secs_f64(duration_secs))
}

/// Extract a mono 16-bit 16kHz WAV for silence analysis.
///
/// The segmenter works on this intermediate; segment clips are cut from the
/// original source to keep full quality.
pub fn extract_analysis_wav(input: &Path, output: &Path) -> Result<()> {
    if !input.exists() {
        return Err(SynclipError::FileNotFound(input.display().to_string()));
    }

    info!("Extracting analysis audio from {}", input.display());

    let status = Command::new("ffmpeg")
        .args(["-y", "-i"])
        .arg(input)
        .args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1"])
        .arg(output)
        .status()
        .map_err(|e| SynclipError::Encode(format!("Failed to run FFmpeg: {e}")))?;

    if !status.success() {
        return Err(SynclipError::Decode(
            "FFmpeg audio extraction failed".to_string(),
        ));
    }

    if !output.exists() {
        return Err(SynclipError::Decode(
            "Analysis WAV was not created".to_string(),
        ));
    }

    Ok(())
}

/// Cut one audio clip per segment from the source track.
///
/// Clips are written to the output directory as `seg_NN.mp3`, numbered by
/// segment index.
pub fn export_segment_clips(
    source_audio: &Path,
    segments: &[Segment],
    output_dir: &Path,
) -> Result<Vec<SegmentClip>> {
    if !source_audio.exists() {
        return Err(SynclipError::FileNotFound(
            source_audio.display().to_string(),
        ));
    }

    std::fs::create_dir_all(output_dir)?;

    info!(
        "Exporting {} segment clips to {}",
        segments.len(),
        output_dir.display()
    );

    let mut clips = Vec::new();

    for segment in segments {
        let clip_path = output_dir.join(segment_clip_name(segment.index));
        let start_secs = format!("{:.3}", segment.start_ms as f64 / 1000.0);
        let duration_secs = format!("{:.3}", segment.duration_ms() as f64 / 1000.0);

        debug!(
            "Exporting segment {}: start={}s duration={}s",
            segment.index, start_secs, duration_secs
        );

        let status = Command::new("ffmpeg")
            .args(["-y", "-ss"])
            .arg(&start_secs)
            .arg("-t")
            .arg(&duration_secs)
            .arg("-i")
            .arg(source_audio)
            .args(["-acodec", "libmp3lame"])
            .arg(&clip_path)
            .status()
            .map_err(|e| SynclipError::Encode(format!("Failed to run FFmpeg: {e}")))?;

        if !status.success() {
            return Err(SynclipError::Encode(format!(
                "FFmpeg failed exporting segment {}",
                segment.index
            )));
        }

        clips.push(SegmentClip {
            segment: segment.clone(),
            path: clip_path,
        });
    }

    Ok(clips)
}

/// Segment clip file name, zero-padded by index.
pub fn segment_clip_name(index: usize) -> String {
    format!("seg_{:02}.mp3", index)
}

/// Re-encode the source video into a playback-safe shared asset
/// (H.264 + AAC, even dimensions, faststart). Falls back to a stream copy if
/// the re-encode fails; both failing is an encode error.
pub fn prepare_safe_video(
    input: &Path,
    output_dir: &Path,
    settings: &EncodeSettings,
) -> Result<PathBuf> {
    if !input.exists() {
        return Err(SynclipError::FileNotFound(input.display().to_string()));
    }

    std::fs::create_dir_all(output_dir)?;
    let output = output_dir.join("video_safe.mp4");

    info!("Re-encoding video to {}", output.display());

    let status = Command::new("ffmpeg")
        .args(["-y", "-i"])
        .arg(input)
        .args(["-vcodec", &settings.video_codec])
        .args(["-acodec", &settings.audio_codec])
        .args(["-preset", &settings.preset])
        .args(["-crf", &settings.crf.to_string()])
        .args(["-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2"])
        .args(["-movflags", "+faststart"])
        .args(["-b:v", &settings.video_bitrate])
        .args(["-b:a", &settings.audio_bitrate])
        .arg(&output)
        .status()
        .map_err(|e| SynclipError::Encode(format!("Failed to run FFmpeg: {e}")))?;

    if status.success() && output.exists() {
        return Ok(output);
    }

    warn!("Re-encode failed, falling back to stream copy");

    let status = Command::new("ffmpeg")
        .args(["-y", "-i"])
        .arg(input)
        .args(["-vcodec", "copy", "-acodec", "copy"])
        .arg(&output)
        .status()
        .map_err(|e| SynclipError::Encode(format!("Failed to run FFmpeg: {e}")))?;

    if !status.success() || !output.exists() {
        return Err(SynclipError::Encode(
            "Video re-encode and stream-copy fallback both failed".to_string(),
        ));
    }

    info!("Stream copy fallback succeeded");
    Ok(output)
}
