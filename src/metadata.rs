//! Source metadata types.
//!
//! Returned by [`VideoSource::metadata`](crate::VideoSource::metadata).
//! Extracted once when the source is opened.

use std::time::Duration;

/// Frame rate assumed when the container reports none.
pub const FALLBACK_FRAMES_PER_SECOND: f64 = 30.0;

/// Metadata for an opened video file.
#[derive(Debug, Clone)]
#[must_use]
pub struct SourceMetadata {
    /// Best video stream.
    pub video: VideoMetadata,
    /// Best audio stream, if the file has one.
    pub audio: Option<AudioMetadata>,
    /// Container duration. `Duration::ZERO` when unknown.
    pub duration: Duration,
    /// Container format name (e.g. `"mov,mp4,m4a,3gp,3g2,mj2"`, `"matroska,webm"`).
    pub format: String,
}

impl SourceMetadata {
    /// Container duration in seconds, `None` when unknown or zero.
    pub fn duration_seconds(&self) -> Option<f64> {
        let seconds = self.duration.as_secs_f64();
        (seconds > 0.0).then_some(seconds)
    }
}

/// Metadata for the video stream.
#[derive(Debug, Clone)]
#[must_use]
pub struct VideoMetadata {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frame rate as reported by the container; `0.0` when unknown.
    pub frames_per_second: f64,
    /// Estimated frame count from duration and frame rate.
    pub frame_count: u64,
    /// Codec name (e.g. `"h264"`).
    pub codec: String,
    /// Presentation time of the first frame, in seconds. Frame timestamps
    /// reported by the crate are relative to this.
    pub start_seconds: f64,
    /// Stream index inside the container.
    pub stream_index: usize,
}

impl VideoMetadata {
    /// Frame rate for estimates, falling back to 30 fps.
    ///
    /// Never used to compute frame timestamps.
    pub fn effective_frames_per_second(&self) -> f64 {
        if self.frames_per_second.is_finite() && self.frames_per_second > 0.0 {
            self.frames_per_second
        } else {
            FALLBACK_FRAMES_PER_SECOND
        }
    }
}

/// Metadata for the audio stream.
#[derive(Debug, Clone)]
#[must_use]
pub struct AudioMetadata {
    /// Sample rate in hertz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Codec name (e.g. `"aac"`).
    pub codec: String,
    /// Stream index inside the container.
    pub stream_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(fps: f64) -> VideoMetadata {
        VideoMetadata {
            width: 1920,
            height: 1080,
            frames_per_second: fps,
            frame_count: 0,
            codec: "h264".to_string(),
            start_seconds: 0.0,
            stream_index: 0,
        }
    }

    #[test]
    fn invalid_frame_rate_falls_back_to_thirty() {
        assert_eq!(video(0.0).effective_frames_per_second(), 30.0);
        assert_eq!(video(f64::NAN).effective_frames_per_second(), 30.0);
        assert_eq!(video(59.94).effective_frames_per_second(), 59.94);
    }

    #[test]
    fn zero_duration_is_unknown() {
        let metadata = SourceMetadata {
            video: video(30.0),
            audio: None,
            duration: Duration::ZERO,
            format: "mp4".to_string(),
        };
        assert_eq!(metadata.duration_seconds(), None);
    }
}
