use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::audio::SegmentClip;
use crate::error::{Result, SynclipError};
use crate::unit::{ResultArtifact, UnitContext, UnitPipeline, UnitState};

/// Counts from one batch run.
#[derive(Debug, Clone)]
pub struct BatchStats {
    pub total_units: usize,
    pub submitted_units: usize,
    pub completed_units: usize,
    pub failed_units: usize,
    pub manual_units: usize,
    pub total_time: Duration,
}

/// Outcome of a batch: the artifacts that made it, keyed by segment index
/// (failed units are simply absent), plus the counts for the summary.
#[derive(Debug)]
pub struct BatchReport {
    pub artifacts: Vec<ResultArtifact>,
    pub stats: BatchStats,
}

/// Runs every unit through a fan-out submission phase and a fan-in
/// collection phase, sequentially and in segment-index order.
///
/// Units are fully isolated: no identity, job handle, or artifact is shared,
/// so one poisoned unit never takes down its siblings. The phases could run
/// units concurrently without changing observable results; sequential keeps
/// the shared-video check-then-upload trivially race-free.
pub struct BatchCoordinator<'a> {
    context: UnitContext<'a>,
    cancelled: Arc<AtomicBool>,
    show_progress: bool,
}

impl<'a> BatchCoordinator<'a> {
    pub fn new(context: UnitContext<'a>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            context,
            cancelled,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub async fn run(&self, clips: Vec<SegmentClip>) -> Result<BatchReport> {
        let total_units = clips.len();
        let start_time = Instant::now();

        if total_units == 0 {
            return Ok(BatchReport {
                artifacts: Vec::new(),
                stats: BatchStats {
                    total_units: 0,
                    submitted_units: 0,
                    completed_units: 0,
                    failed_units: 0,
                    manual_units: 0,
                    total_time: Duration::ZERO,
                },
            });
        }

        info!("Submitting {} units", total_units);

        let progress_bar = if self.show_progress {
            let pb = ProgressBar::new(total_units as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} units {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        // Phase 1: fan-out. Each unit is driven until its job is observed
        // running; failures are recorded and skipped, never retried here.
        let mut units: Vec<UnitPipeline> = Vec::with_capacity(total_units);

        for clip in clips {
            if self.cancelled.load(Ordering::Relaxed) {
                warn!("Cancelled during submission phase");
                return Err(SynclipError::Cancelled);
            }

            let mut unit = UnitPipeline::new(clip);
            if let Some(pb) = &progress_bar {
                pb.set_message(format!("submitting unit {}", unit.index()));
            }

            let state = unit.run_submission(&self.context).await;
            info!("[unit {}] submission phase ended at {state}", unit.index());

            if let Some(pb) = &progress_bar {
                pb.inc(1);
            }
            units.push(unit);
        }

        let submitted_units = units
            .iter()
            .filter(|u| u.state() == UnitState::Polling)
            .count();

        if let Some(pb) = &progress_bar {
            pb.finish_with_message(format!("{submitted_units}/{total_units} submitted"));
        }

        info!(
            "Submission phase complete: {}/{} units running",
            submitted_units, total_units
        );

        // Phase 2: fan-in. Completion order does not matter; artifacts carry
        // their segment index.
        let collect_bar = if self.show_progress && submitted_units > 0 {
            let pb = ProgressBar::new(submitted_units as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} results {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        for unit in units.iter_mut().filter(|u| u.state() == UnitState::Polling) {
            if self.cancelled.load(Ordering::Relaxed) {
                warn!("Cancelled during collection phase");
                return Err(SynclipError::Cancelled);
            }

            if let Some(pb) = &collect_bar {
                pb.set_message(format!("waiting on unit {}", unit.index()));
            }

            let state = unit.run_collection(&self.context).await;
            info!("[unit {}] collection phase ended at {state}", unit.index());

            if let Some(pb) = &collect_bar {
                pb.inc(1);
            }
        }

        if let Some(pb) = collect_bar {
            pb.finish_with_message("collection complete");
        }

        let mut artifacts: Vec<ResultArtifact> = units
            .iter()
            .filter_map(|u| u.artifact().cloned())
            .collect();
        artifacts.sort_by_key(|a| a.index);

        let completed_units = artifacts.len();
        let manual_units = units
            .iter()
            .filter(|u| u.state() == UnitState::NeedsManualInput)
            .count();
        let failed_units = total_units - completed_units - manual_units;

        let stats = BatchStats {
            total_units,
            submitted_units,
            completed_units,
            failed_units,
            manual_units,
            total_time: start_time.elapsed(),
        };

        info!(
            "Batch complete: {}/{} units succeeded ({} failed, {} manual) in {:.1}s",
            completed_units,
            total_units,
            failed_units,
            manual_units,
            stats.total_time.as_secs_f64()
        );

        Ok(BatchReport { artifacts, stats })
    }
}
