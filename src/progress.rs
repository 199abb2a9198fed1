//! Progress reporting and cancellation support.
//!
//! A highlight run has two long phases: scanning the video for the template
//! and cutting the detected windows into the reel. [`ProgressCallback`]
//! receives [`ProgressInfo`] snapshots for both, with
//! [`overall_percent`](ProgressInfo::overall_percent) mapped onto a single
//! scale: scanning covers 0–50, clip extraction 50–90 and a finished run
//! reports 100.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use killreel::{ProgressCallback, ProgressInfo, ReelOptions};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("[{:?}] {:.0}%", info.phase, info.overall_percent);
//!     }
//! }
//!
//! let options = ReelOptions::new().with_progress(Arc::new(PrintProgress));
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// The stage of a highlight run being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReelPhase {
    /// Decoding frames and matching the template.
    Scanning,
    /// Cutting windows out of the source and encoding them.
    Extracting,
    /// The reel has been written.
    Finished,
}

impl ReelPhase {
    /// The slice of the overall 0–100 scale this phase occupies.
    fn span(self) -> (f32, f32) {
        match self {
            ReelPhase::Scanning => (0.0, 50.0),
            ReelPhase::Extracting => (50.0, 90.0),
            ReelPhase::Finished => (100.0, 100.0),
        }
    }
}

/// A snapshot of pipeline progress.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Which phase is running.
    pub phase: ReelPhase,
    /// Items (frames or clips) processed so far in this phase.
    pub current: u64,
    /// Items expected in this phase, if known.
    pub total: Option<u64>,
    /// Completion of the current phase (0.0 – 100.0), if `total` is known.
    pub phase_percent: Option<f32>,
    /// Completion of the whole run on the 0–100 scale.
    pub overall_percent: f32,
    /// Wall-clock time since the phase started.
    pub elapsed: Duration,
    /// Source timestamp currently being processed.
    pub current_timestamp: Option<Duration>,
}

/// Receives progress updates during a run.
///
/// Callbacks observe but cannot halt the pipeline; use a
/// [`CancellationToken`] for that.
pub trait ProgressCallback: Send + Sync {
    /// Called at regular intervals during scanning and extraction.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Discards all progress notifications. Default when no callback is set.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clones share state. The scan checks the token before every sampled
/// frame, the cutter before every clip.
///
/// ```
/// use killreel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks one phase and emits callbacks every `batch_size` items.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    phase: ReelPhase,
    total: Option<u64>,
    current: u64,
    batch_size: u64,
    start_time: Instant,
    items_since_last_report: u64,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        phase: ReelPhase,
        total: Option<u64>,
        batch_size: u64,
    ) -> Self {
        Self {
            callback,
            phase,
            total,
            current: 0,
            batch_size: batch_size.max(1),
            start_time: Instant::now(),
            items_since_last_report: 0,
        }
    }

    /// Record one completed item and report if the batch is full.
    pub(crate) fn advance(&mut self, timestamp: Option<Duration>) {
        self.current += 1;
        self.items_since_last_report += 1;

        if self.items_since_last_report >= self.batch_size {
            self.report(timestamp);
            self.items_since_last_report = 0;
        }
    }

    /// Unconditionally emit a final report for this phase.
    pub(crate) fn finish(&mut self) {
        if let Some(total) = self.total {
            self.current = self.current.max(total);
        }
        self.report(None);
    }

    fn phase_fraction(&self) -> Option<f32> {
        self.total
            .filter(|&total| total > 0)
            .map(|total| (self.current as f32 / total as f32).min(1.0))
    }

    fn report(&self, timestamp: Option<Duration>) {
        let fraction = self.phase_fraction();
        let (low, high) = self.phase.span();
        let overall_percent = low + (high - low) * fraction.unwrap_or(0.0);

        let info = ProgressInfo {
            phase: self.phase,
            current: self.current,
            total: self.total,
            phase_percent: fraction.map(|f| f * 100.0),
            overall_percent,
            elapsed: self.start_time.elapsed(),
            current_timestamp: timestamp,
        };

        self.callback.on_progress(&info);
    }
}

/// Emit the terminal 100% report.
pub(crate) fn report_finished(callback: &Arc<dyn ProgressCallback>, clips: u64) {
    callback.on_progress(&ProgressInfo {
        phase: ReelPhase::Finished,
        current: clips,
        total: Some(clips),
        phase_percent: Some(100.0),
        overall_percent: 100.0,
        elapsed: Duration::ZERO,
        current_timestamp: None,
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ProgressInfo>>,
    }

    impl ProgressCallback for Recorder {
        fn on_progress(&self, info: &ProgressInfo) {
            self.seen.lock().unwrap().push(info.clone());
        }
    }

    #[test]
    fn scanning_maps_onto_first_half() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker =
            ProgressTracker::new(recorder.clone(), ReelPhase::Scanning, Some(4), 2);
        for _ in 0..4 {
            tracker.advance(None);
        }

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!((seen[0].overall_percent - 25.0).abs() < 1e-4);
        assert!((seen[1].overall_percent - 50.0).abs() < 1e-4);
    }

    #[test]
    fn extraction_maps_between_fifty_and_ninety() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker =
            ProgressTracker::new(recorder.clone(), ReelPhase::Extracting, Some(2), 1);
        tracker.advance(None);
        tracker.finish();

        let seen = recorder.seen.lock().unwrap();
        assert!((seen[0].overall_percent - 70.0).abs() < 1e-4);
        assert!((seen[1].overall_percent - 90.0).abs() < 1e-4);
    }

    #[test]
    fn overrun_is_capped_at_phase_end() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker =
            ProgressTracker::new(recorder.clone(), ReelPhase::Scanning, Some(1), 1);
        tracker.advance(None);
        tracker.advance(None);

        let seen = recorder.seen.lock().unwrap();
        assert!(seen.iter().all(|info| info.overall_percent <= 50.0));
    }

    #[test]
    fn finished_reports_one_hundred() {
        let recorder = Arc::new(Recorder::default());
        let callback: Arc<dyn ProgressCallback> = recorder.clone();
        report_finished(&callback, 3);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].phase, ReelPhase::Finished);
        assert_eq!(seen[0].overall_percent, 100.0);
    }
}
