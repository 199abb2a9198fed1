//! Pipeline configuration.
//!
//! [`ReelOptions`] is the single explicit configuration structure passed to
//! every pipeline entry point: detection tuning (threshold, colour mode,
//! cooldown, sample stride, search region), window planning (margins, merge
//! strategy) and operational hooks (progress callback, cancellation).
//!
//! # Example
//!
//! ```no_run
//! use killreel::{ColorMode, ReelOptions};
//!
//! let options = ReelOptions::new()
//!     .with_threshold(0.8)
//!     .with_color_mode(ColorMode::Color)
//!     .with_margins(1.0, 1.0);
//! assert!(options.validate().is_ok());
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use ffmpeg_next::format::Pixel;

use crate::error::ReelError;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};
use crate::window::WindowMerge;

/// Default similarity threshold.
pub const DEFAULT_THRESHOLD: f32 = 0.7;
/// Default minimum gap between two accepted events, in seconds.
pub const DEFAULT_COOLDOWN_SECONDS: f64 = 3.0;
/// Default seconds kept before and after every event.
pub const DEFAULT_MARGIN_SECONDS: f64 = 2.0;
/// Default number of decoded frames per matched frame.
pub const DEFAULT_SAMPLE_STRIDE: u64 = 5;
/// Default number of decoded frames between two scan progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

/// Thresholds outside this band rarely do what users expect.
const RECOMMENDED_THRESHOLDS: std::ops::RangeInclusive<f32> = 0.4..=0.99;

/// Colour model used for both the template and every scanned frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// Match on luminance only. Tolerates tint changes in the overlay.
    #[default]
    Grayscale,
    /// Match on all three RGB channels.
    Color,
}

impl ColorMode {
    /// Pixel format decoded frames are scaled into.
    pub(crate) fn to_ffmpeg_pixel(self) -> Pixel {
        match self {
            ColorMode::Grayscale => Pixel::GRAY8,
            ColorMode::Color => Pixel::RGB24,
        }
    }

    /// Bytes per pixel of the converted buffers.
    pub(crate) fn channels(self) -> usize {
        match self {
            ColorMode::Grayscale => 1,
            ColorMode::Color => 3,
        }
    }
}

/// Rectangle of the frame to search, in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRegion {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl SearchRegion {
    /// Create a region from its top-left corner and size.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersect with a `frame_width` x `frame_height` frame.
    ///
    /// Returns `None` when nothing of the region lies inside the frame.
    pub fn clip_to(&self, frame_width: u32, frame_height: u32) -> Option<SearchRegion> {
        if self.x >= frame_width || self.y >= frame_height {
            return None;
        }
        let width = self.width.min(frame_width - self.x);
        let height = self.height.min(frame_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(SearchRegion::new(self.x, self.y, width, height))
    }
}

/// Configuration for a highlight run.
///
/// Defaults: threshold
/// 0.7, grayscale matching, 3 s cooldown, 2 s margins on both sides, every
/// 5th frame matched, overlapping windows kept as-is.
#[derive(Clone)]
#[must_use]
pub struct ReelOptions {
    pub(crate) threshold: f32,
    pub(crate) color_mode: ColorMode,
    pub(crate) cooldown_seconds: f64,
    pub(crate) pre_margin: f64,
    pub(crate) post_margin: f64,
    pub(crate) sample_stride: u64,
    pub(crate) window_merge: WindowMerge,
    pub(crate) search_region: Option<SearchRegion>,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) progress_interval: u64,
}

impl Debug for ReelOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ReelOptions")
            .field("threshold", &self.threshold)
            .field("color_mode", &self.color_mode)
            .field("cooldown_seconds", &self.cooldown_seconds)
            .field("pre_margin", &self.pre_margin)
            .field("post_margin", &self.post_margin)
            .field("sample_stride", &self.sample_stride)
            .field("window_merge", &self.window_merge)
            .field("search_region", &self.search_region)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("progress_interval", &self.progress_interval)
            .finish()
    }
}

impl Default for ReelOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ReelOptions {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            color_mode: ColorMode::default(),
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            pre_margin: DEFAULT_MARGIN_SECONDS,
            post_margin: DEFAULT_MARGIN_SECONDS,
            sample_stride: DEFAULT_SAMPLE_STRIDE,
            window_merge: WindowMerge::default(),
            search_region: None,
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Minimum correlation score for a frame to count as a hit.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Colour model for matching.
    pub fn with_color_mode(mut self, mode: ColorMode) -> Self {
        self.color_mode = mode;
        self
    }

    /// Minimum gap between two accepted events, in seconds.
    pub fn with_cooldown(mut self, seconds: f64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    /// Seconds kept before and after each event.
    pub fn with_margins(mut self, pre: f64, post: f64) -> Self {
        self.pre_margin = pre;
        self.post_margin = post;
        self
    }

    /// Match every `stride`-th decoded frame.
    pub fn with_sample_stride(mut self, stride: u64) -> Self {
        self.sample_stride = stride;
        self
    }

    /// How overlapping clip windows are treated.
    pub fn with_window_merge(mut self, merge: WindowMerge) -> Self {
        self.window_merge = merge;
        self
    }

    /// Restrict matching to a rectangle of the frame.
    pub fn with_search_region(mut self, region: SearchRegion) -> Self {
        self.search_region = Some(region);
        self
    }

    /// Attach a progress callback.
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// Once cancelled, the run stops at the next frame or clip boundary and
    /// returns [`ReelError::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Report scan progress every `frames` decoded frames (minimum 1).
    pub fn with_progress_interval(mut self, frames: u64) -> Self {
        self.progress_interval = frames.max(1);
        self
    }

    /// Similarity threshold.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Colour model.
    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    /// Cooldown in seconds.
    pub fn cooldown_seconds(&self) -> f64 {
        self.cooldown_seconds
    }

    /// `(pre, post)` margins in seconds.
    pub fn margins(&self) -> (f64, f64) {
        (self.pre_margin, self.post_margin)
    }

    /// Sample stride in frames.
    pub fn sample_stride(&self) -> u64 {
        self.sample_stride
    }

    /// Window merge strategy.
    pub fn window_merge(&self) -> WindowMerge {
        self.window_merge
    }

    /// Search region, if any.
    pub fn search_region(&self) -> Option<SearchRegion> {
        self.search_region
    }

    /// Check every value before a run starts.
    ///
    /// # Errors
    ///
    /// Returns [`ReelError::InvalidConfiguration`] naming the first bad
    /// option.
    pub fn validate(&self) -> Result<(), ReelError> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 || self.threshold > 1.0 {
            return Err(ReelError::InvalidConfiguration(format!(
                "threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if !self.cooldown_seconds.is_finite() || self.cooldown_seconds < 0.0 {
            return Err(ReelError::InvalidConfiguration(format!(
                "cooldown must be a non-negative number of seconds, got {}",
                self.cooldown_seconds
            )));
        }
        for (name, value) in [("pre", self.pre_margin), ("post", self.post_margin)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ReelError::InvalidConfiguration(format!(
                    "{name} margin must be a non-negative number of seconds, got {value}"
                )));
            }
        }
        if self.pre_margin + self.post_margin <= 0.0 {
            return Err(ReelError::InvalidConfiguration(
                "pre and post margins cannot both be zero".to_string(),
            ));
        }
        if self.sample_stride == 0 {
            return Err(ReelError::InvalidConfiguration(
                "sample stride must be greater than zero".to_string(),
            ));
        }
        if let Some(region) = self.search_region
            && (region.width == 0 || region.height == 0)
        {
            return Err(ReelError::InvalidConfiguration(
                "search region must have a non-zero size".to_string(),
            ));
        }

        if !RECOMMENDED_THRESHOLDS.contains(&self.threshold) {
            log::warn!(
                "Threshold {} is outside the usual {:.2}-{:.2} range",
                self.threshold,
                RECOMMENDED_THRESHOLDS.start(),
                RECOMMENDED_THRESHOLDS.end(),
            );
        }
        Ok(())
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = ReelOptions::new();
        assert!(options.validate().is_ok());
        assert_eq!(options.threshold(), 0.7);
        assert_eq!(options.margins(), (2.0, 2.0));
        assert_eq!(options.sample_stride(), 5);
        assert_eq!(options.color_mode(), ColorMode::Grayscale);
    }

    #[test]
    fn rejects_zero_stride() {
        let result = ReelOptions::new().with_sample_stride(0).validate();
        assert!(matches!(result, Err(ReelError::InvalidConfiguration(_))));
    }

    #[test]
    fn rejects_threshold_above_one() {
        let result = ReelOptions::new().with_threshold(1.2).validate();
        assert!(matches!(result, Err(ReelError::InvalidConfiguration(_))));
    }

    #[test]
    fn rejects_negative_cooldown_and_nan_margin() {
        assert!(ReelOptions::new().with_cooldown(-1.0).validate().is_err());
        assert!(ReelOptions::new().with_margins(f64::NAN, 1.0).validate().is_err());
        assert!(ReelOptions::new().with_margins(0.0, 0.0).validate().is_err());
    }

    #[test]
    fn region_is_clipped_to_frame() {
        let region = SearchRegion::new(90, 10, 50, 50);
        assert_eq!(region.clip_to(100, 100), Some(SearchRegion::new(90, 10, 10, 50)));
        assert_eq!(region.clip_to(80, 100), None);
    }

    #[test]
    fn debug_hides_callback() {
        let debug = format!("{:?}", ReelOptions::new());
        assert!(debug.contains("ReelOptions"));
        assert!(debug.contains("has_cancellation: false"));
    }
}
