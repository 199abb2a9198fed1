//! # killreel
//!
//! Find a kill-feed icon in recorded gameplay and cut a highlight reel
//! around every appearance.
//!
//! `killreel` scans a video for a small reference image (the "kill log"
//! icon a game draws when you score), turns each debounced hit into a clip
//! window and concatenates the clips into one H.264 + AAC video. Decoding
//! and encoding go through FFmpeg via
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next); frames are
//! handled as [`image::DynamicImage`] values.
//!
//! ## Quick Start
//!
//! ```no_run
//! use killreel::{ReelOptions, ReelOutcome, run};
//!
//! let options = ReelOptions::new()
//!     .with_threshold(0.75)
//!     .with_margins(2.0, 2.0);
//!
//! match run("match.mp4", "kill_icon.png", "kill_highlight.mp4", &options)? {
//!     ReelOutcome::Created { events, reel, .. } => {
//!         println!("{} kills -> {}", events.len(), reel.path.display());
//!     }
//!     ReelOutcome::NothingFound { .. } => println!("no kills found"),
//! }
//! # Ok::<(), killreel::ReelError>(())
//! ```
//!
//! ## Pipeline
//!
//! 1. [`FrameSampler`] decodes every frame and hands every `stride`-th one
//!    (default 5) to the matcher, stamped with the decoder's timestamp.
//! 2. [`TemplateMatcher`] computes the normalized correlation coefficient
//!    of the [`Template`] against every alignment and keeps the best.
//! 3. [`EventDetector`] accepts a frame when its score reaches the
//!    threshold and the last accepted event is more than the cooldown ago.
//! 4. [`plan_windows`] expands each event into `[t - pre, t + post]`,
//!    clamped to the video.
//! 5. [`cut`] re-encodes the windows back to back into one file.
//!
//! Each stage is usable on its own; [`scan`] accepts any [`FrameSource`],
//! so detection can run on frames from another decoder.
//!
//! ## Features
//!
//! - **Grayscale or color matching**, with an optional search region to
//!   restrict matching to the kill-feed corner
//! - **Progress & cancellation** through [`ProgressCallback`] and
//!   [`CancellationToken`]
//! - **Atomic output**: the reel is staged in a temporary file and only
//!   moved into place when complete
//! - **Video-only sources** produce video-only reels
//!
//! ## Requirements
//!
//! FFmpeg development libraries (with an H.264 and an AAC encoder) must be
//! installed on your system.

pub mod config;
mod conversion;
pub mod detector;
pub mod error;
mod extract;
pub mod ffmpeg;
pub mod matcher;
pub mod metadata;
pub mod pipeline;
pub mod progress;
pub mod reel;
pub mod sampler;
pub mod source;
pub mod template;
pub mod window;

pub use config::{
    ColorMode, DEFAULT_COOLDOWN_SECONDS, DEFAULT_MARGIN_SECONDS, DEFAULT_PROGRESS_INTERVAL,
    DEFAULT_SAMPLE_STRIDE, DEFAULT_THRESHOLD, ReelOptions, SearchRegion,
};
pub use detector::{DetectionEvent, EventDetector, FrameOutcome};
pub use error::{MatchError, ReelError};
pub use ffmpeg::{FfmpegLogLevel, set_ffmpeg_log_level};
pub use matcher::{MatchScore, TemplateMatcher};
pub use metadata::{AudioMetadata, SourceMetadata, VideoMetadata};
pub use pipeline::{ReelOutcome, ScanReport, cut, run, scan, scan_video};
pub use progress::{CancellationToken, ProgressCallback, ProgressInfo, ReelPhase};
pub use reel::HighlightReel;
pub use sampler::{DecodedFrames, FrameSampler, FrameSource, SampledFrame};
pub use source::VideoSource;
pub use template::Template;
pub use window::{ClipWindow, WindowMerge, plan_windows};
