use tracing::{debug, info};

use crate::config::SegmenterConfig;
use crate::error::{Result, SynclipError};

use super::{AudioTrack, Segment, SilenceInterval};

/// Analysis frame length in milliseconds. Silence detection works on RMS
/// levels of fixed frames, so cut points land on frame boundaries.
const FRAME_MS: u64 = 10;

/// Split a track into bounded-duration segments, preferring cuts at natural
/// silence.
///
/// A cursor walks the track in windows of at most `target_duration_ms`. If the
/// last silence inside a window ends within `search_back_ms` of the window
/// end, the cut lands on that silence; otherwise the segment is cut at the
/// window boundary. The final segment absorbs whatever remains and may be
/// shorter than the target.
pub fn segment_track(track: &AudioTrack, config: &SegmenterConfig) -> Result<Vec<Segment>> {
    let total_ms = track.duration_ms();
    if total_ms == 0 {
        return Err(SynclipError::EmptyTrack);
    }

    let mut segments = Vec::new();
    let mut pos: u64 = 0;

    while pos < total_ms {
        let target_end = (pos + config.target_duration_ms).min(total_ms);

        let mut cut = if target_end == total_ms {
            // Final window: take everything that is left.
            total_ms
        } else {
            let window_len = target_end - pos;
            let intervals = detect_silence_intervals(track, pos, target_end, config);

            match intervals.last() {
                Some(last) if last.end_ms >= window_len.saturating_sub(config.search_back_ms) => {
                    debug!(
                        "Window at {}ms: cutting on silence ending at +{}ms",
                        pos, last.end_ms
                    );
                    pos + last.end_ms
                }
                _ => {
                    debug!("Window at {}ms: no usable silence, forced cut", pos);
                    target_end
                }
            }
        };

        // Forward-progress guard for degenerate cut points.
        if cut <= pos {
            if target_end <= pos {
                break;
            }
            cut = target_end;
        }

        segments.push(Segment {
            index: segments.len() + 1,
            start_ms: pos,
            end_ms: cut,
        });
        pos = cut;
    }

    info!(
        "Planned {} segments over {:.1}s of audio",
        segments.len(),
        total_ms as f64 / 1000.0
    );

    Ok(segments)
}

/// Detect all silence intervals of at least `min_silence_ms` inside
/// `[window_start_ms, window_end_ms)`. Returned offsets are relative to the
/// window start, in ascending order.
fn detect_silence_intervals(
    track: &AudioTrack,
    window_start_ms: u64,
    window_end_ms: u64,
    config: &SegmenterConfig,
) -> Vec<SilenceInterval> {
    let samples = track.slice_ms(window_start_ms, window_end_ms);
    let frame_len = (track.sample_rate() as u64 * FRAME_MS / 1000).max(1) as usize;

    let silent_frames: Vec<bool> = samples
        .chunks_exact(frame_len)
        .map(|frame| frame_db(frame) < config.silence_threshold_db)
        .collect();

    let min_silence_frames = (config.min_silence_ms / FRAME_MS).max(1) as usize;

    let mut intervals = Vec::new();
    let mut run_start: Option<usize> = None;

    for (i, &silent) in silent_frames.iter().enumerate() {
        match (silent, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if i - start >= min_silence_frames {
                    intervals.push(SilenceInterval {
                        start_ms: start as u64 * FRAME_MS,
                        end_ms: i as u64 * FRAME_MS,
                    });
                }
                run_start = None;
            }
            _ => {}
        }
    }

    if let Some(start) = run_start {
        let end = silent_frames.len();
        if end - start >= min_silence_frames {
            intervals.push(SilenceInterval {
                start_ms: start as u64 * FRAME_MS,
                end_ms: end as u64 * FRAME_MS,
            });
        }
    }

    intervals
}

/// RMS level of one frame in dBFS.
fn frame_db(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let rms = (sum_squares / samples.len() as f64).sqrt();
    if rms <= 0.0 {
        return f32::NEG_INFINITY;
    }
    20.0 * rms.log10() as f32
}
