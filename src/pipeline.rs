//! Pipeline entry points.
//!
//! [`scan`] runs sampling, matching and debouncing over any
//! [`FrameSource`]. [`cut`] writes planned windows to a file. [`run`] does
//! everything from file paths to a finished reel.
//!
//! Progress is reported in three bands: scanning covers 0–50 %, cutting
//! 50–90 % and completion jumps to 100 %.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tempfile::{Builder as TempFileBuilder, NamedTempFile};

use crate::{
    config::ReelOptions,
    detector::{DetectionEvent, EventDetector, FrameOutcome},
    error::ReelError,
    extract::ClipExtractor,
    matcher::TemplateMatcher,
    progress::{ProgressTracker, ReelPhase, report_finished},
    reel::HighlightReel,
    sampler::{FrameSampler, FrameSource},
    source::VideoSource,
    template::Template,
    window::{ClipWindow, plan_windows},
};

/// Extension used for the reel when the output path has none.
const DEFAULT_EXTENSION: &str = "mp4";

/// Result of scanning one source.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    /// Accepted events in ascending time order.
    pub events: Vec<DetectionEvent>,
    /// Frames decoded, sampled or not.
    pub frames_decoded: u64,
    /// Frames handed to the matcher.
    pub frames_sampled: u64,
    /// Sampled frames on which matching failed.
    pub match_failures: u64,
}

/// Terminal result of [`run`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReelOutcome {
    /// At least one event was found and the reel was written.
    Created {
        /// Accepted events.
        events: Vec<DetectionEvent>,
        /// Windows that were cut, in reel order.
        windows: Vec<ClipWindow>,
        /// The written reel.
        reel: HighlightReel,
    },
    /// The scan finished without a single event. No file was written.
    NothingFound {
        /// Frames decoded during the scan.
        frames_scanned: u64,
    },
}

/// Scan `source` for `template`.
///
/// `estimated_frames` only feeds progress reporting.
///
/// # Errors
///
/// [`ReelError::InvalidConfiguration`] for bad options,
/// [`ReelError::Cancelled`] when the options' token fires, or any error
/// the source raises while decoding. Per-frame matching failures are not
/// errors; they are counted in [`ScanReport::match_failures`].
///
/// # Example
///
/// ```no_run
/// use killreel::{ColorMode, ReelOptions, Template, VideoSource, scan};
///
/// let options = ReelOptions::new().with_threshold(0.8);
/// let template = Template::open("kill_icon.png", ColorMode::Grayscale)?;
/// let mut source = VideoSource::open("match.mp4")?;
/// let estimate = source.metadata().video.frame_count;
/// let frames = source.frames(options.color_mode())?;
///
/// let report = scan(frames, &template, &options, Some(estimate))?;
/// for event in &report.events {
///     println!("kill at {:.2}s", event.timestamp);
/// }
/// # Ok::<(), killreel::ReelError>(())
/// ```
pub fn scan<S: FrameSource>(
    source: S,
    template: &Template,
    options: &ReelOptions,
    estimated_frames: Option<u64>,
) -> Result<ScanReport, ReelError> {
    options.validate()?;
    log::info!(
        "Scanning for {}x{} template (threshold={}, cooldown={}s, stride={})",
        template.width(),
        template.height(),
        options.threshold,
        options.cooldown_seconds,
        options.sample_stride
    );

    let matcher = TemplateMatcher::new(template, options.search_region);
    let mut detector = EventDetector::new(options.threshold, options.cooldown_seconds);
    let mut sampler = FrameSampler::new(source, options.sample_stride)?;

    let stride = options.sample_stride;
    let batch = options.progress_interval.div_ceil(stride).max(1);
    let mut tracker = ProgressTracker::new(
        options.progress.clone(),
        ReelPhase::Scanning,
        estimated_frames.map(|frames| frames.div_ceil(stride)),
        batch,
    );

    let mut frames_sampled = 0;
    for frame in sampler.by_ref() {
        if options.is_cancelled() {
            return Err(ReelError::Cancelled);
        }
        let frame = frame?;
        frames_sampled += 1;

        let outcome = detector.observe(frame.timestamp, matcher.best_match(&frame.image));
        if let FrameOutcome::CoolingDown(score) = outcome {
            log::trace!(
                "Suppressed repeat at {:.3}s (score {:.2})",
                frame.timestamp,
                score.score
            );
        }
        tracker.advance(Some(Duration::from_secs_f64(frame.timestamp.max(0.0))));
    }
    tracker.finish();

    let report = ScanReport {
        frames_decoded: sampler.frames_decoded(),
        frames_sampled,
        match_failures: detector.match_failures(),
        events: detector.finish(),
    };
    log::info!(
        "Scan finished: {} events in {} frames ({} sampled, {} match failures)",
        report.events.len(),
        report.frames_decoded,
        report.frames_sampled,
        report.match_failures
    );
    Ok(report)
}

/// Scan an opened video file with its own decoder.
///
/// # Errors
///
/// As [`scan`], plus decoder setup failures.
pub fn scan_video(
    source: &mut VideoSource,
    template: &Template,
    options: &ReelOptions,
) -> Result<ScanReport, ReelError> {
    let estimate = source.metadata().video.frame_count;
    let frames = source.frames(options.color_mode)?;
    scan(frames, template, options, Some(estimate).filter(|&n| n > 0))
}

/// Cut `windows` out of `source` and write them, in order, to `output`.
///
/// The reel is first written to a temporary file next to `output` and
/// moved into place only once complete; an existing file at `output` is
/// replaced. On failure or cancellation nothing is left behind.
///
/// # Errors
///
/// [`ReelError::InvalidConfiguration`] for an empty window list,
/// [`ReelError::Cancelled`], or any decode, encode or write error.
pub fn cut<P: AsRef<Path>>(
    source: &mut VideoSource,
    windows: &[ClipWindow],
    output: P,
    options: &ReelOptions,
) -> Result<HighlightReel, ReelError> {
    let output = output.as_ref();
    if windows.is_empty() {
        return Err(ReelError::InvalidConfiguration(
            "no clip windows to cut".to_string(),
        ));
    }

    let temporary = temporary_output(output)?;
    log::info!(
        "Cutting {} clips to {} (staging at {})",
        windows.len(),
        output.display(),
        temporary.path().display()
    );

    let written = ClipExtractor::new(source)
        .and_then(|extractor| extractor.write_reel(windows, temporary.path(), options));

    match written {
        Ok(reel) => {
            temporary.persist(output)?;
            let reel = HighlightReel {
                path: output.to_path_buf(),
                ..reel
            };
            log::info!(
                "Wrote {} ({} clips, {:.2}s)",
                reel.path.display(),
                reel.clips,
                reel.written_duration
            );
            Ok(reel)
        }
        Err(error) => {
            discard(temporary);
            Err(error)
        }
    }
}

/// Full pipeline: load the template, scan the video, plan windows and
/// write the reel.
///
/// The template is loaded before the video is opened and the options are
/// validated before the first frame is decoded, so input problems surface
/// before any scanning.
///
/// # Errors
///
/// Any [`ReelError`]; finding nothing is not an error but
/// [`ReelOutcome::NothingFound`].
///
/// # Example
///
/// ```no_run
/// use killreel::{ReelOptions, ReelOutcome, run};
///
/// let options = ReelOptions::new().with_margins(2.0, 2.0);
/// match run("match.mp4", "kill_icon.png", "kill_highlight.mp4", &options)? {
///     ReelOutcome::Created { events, reel, .. } => {
///         println!("{} kills, {:.1}s reel", events.len(), reel.written_duration);
///     }
///     ReelOutcome::NothingFound { frames_scanned } => {
///         println!("nothing found in {frames_scanned} frames");
///     }
/// }
/// # Ok::<(), killreel::ReelError>(())
/// ```
pub fn run<V, T, O>(
    video: V,
    template: T,
    output: O,
    options: &ReelOptions,
) -> Result<ReelOutcome, ReelError>
where
    V: AsRef<Path>,
    T: AsRef<Path>,
    O: AsRef<Path>,
{
    let template = Template::open(template, options.color_mode)?;
    let mut source = VideoSource::open(video)?;

    let report = scan_video(&mut source, &template, options)?;
    if report.events.is_empty() {
        log::info!("No events found; no reel written");
        return Ok(ReelOutcome::NothingFound {
            frames_scanned: report.frames_decoded,
        });
    }

    let windows = plan_windows(
        &report.events,
        source.metadata().duration_seconds(),
        options.pre_margin,
        options.post_margin,
        options.window_merge,
    )?;

    let reel = cut(&mut source, &windows, output, options)?;
    report_finished(&options.progress, reel.clips as u64);

    Ok(ReelOutcome::Created {
        events: report.events,
        windows,
        reel,
    })
}

/// Staging file in the destination directory, keeping the extension so
/// FFmpeg picks the same container.
fn temporary_output(output: &Path) -> Result<NamedTempFile, ReelError> {
    let directory: PathBuf = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let extension = output
        .extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or(DEFAULT_EXTENSION);

    TempFileBuilder::new()
        .prefix(".killreel-")
        .suffix(&format!(".{extension}"))
        .tempfile_in(&directory)
        .map_err(|error| ReelError::OutputWrite {
            path: output.to_path_buf(),
            reason: format!("cannot create temporary file in {}: {error}", directory.display()),
        })
}

fn discard(temporary: NamedTempFile) {
    let path = temporary.path().to_path_buf();
    if let Err(error) = temporary.close() {
        log::warn!(
            "Failed to remove temporary output {}: {error}",
            path.display()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_file_keeps_extension_and_directory() {
        let directory = tempfile::tempdir().unwrap();
        let output = directory.path().join("reel.mkv");

        let temporary = temporary_output(&output).unwrap();
        assert_eq!(temporary.path().parent(), Some(directory.path()));
        assert_eq!(
            temporary.path().extension().and_then(|e| e.to_str()),
            Some("mkv")
        );
    }

    #[test]
    fn discarded_staging_file_is_removed() {
        let directory = tempfile::tempdir().unwrap();
        let temporary = temporary_output(&directory.path().join("reel.mp4")).unwrap();
        let path = temporary.path().to_path_buf();

        discard(temporary);
        assert!(!path.exists());
    }

    #[test]
    fn missing_extension_defaults_to_mp4() {
        let directory = tempfile::tempdir().unwrap();
        let temporary = temporary_output(&directory.path().join("reel")).unwrap();
        assert_eq!(
            temporary.path().extension().and_then(|e| e.to_str()),
            Some("mp4")
        );
    }
}
