//! Error types for the `killreel` crate.
//!
//! [`ReelError`] is returned by every fallible pipeline operation. Per-frame
//! matching failures use the separate [`MatchError`] type: they are
//! recoverable, never abort a scan, and only surface through
//! [`FrameOutcome::MatchFailed`](crate::FrameOutcome::MatchFailed).

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use tempfile::PersistError;
use thiserror::Error;

/// The unified error type for all `killreel` operations.
///
/// Input problems (unreadable template, missing video stream, bad options)
/// are reported before any frame is scanned. Encoding problems abort the
/// run after the temporary output has been removed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReelError {
    /// The video file could not be opened.
    #[error("Failed to open video file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to [`crate::VideoSource::open`].
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The template image could not be read or is empty.
    #[error("Failed to load template image at {path}: {reason}")]
    TemplateLoad {
        /// Path of the template image.
        path: PathBuf,
        /// Why the image was rejected.
        reason: String,
    },

    /// The file does not contain a video stream.
    #[error("No video stream found in file")]
    NoVideoStream,

    /// A pipeline option is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The source reports no usable duration, so windows cannot be clamped.
    #[error("Video duration is unknown or zero; cannot plan clip windows")]
    UnknownDuration,

    /// A video frame could not be decoded.
    #[error("Failed to decode video frame: {0}")]
    VideoDecodeError(String),

    /// Audio could not be decoded while cutting clips.
    #[error("Failed to decode audio: {0}")]
    AudioDecodeError(String),

    /// The highlight video stream could not be encoded.
    #[error("Video encoding error: {0}")]
    VideoEncodeError(String),

    /// The highlight audio stream could not be encoded.
    #[error("Audio encoding error: {0}")]
    AudioEncodeError(String),

    /// The output container could not be created or written.
    #[error("Failed to write highlight reel to {path}: {reason}")]
    OutputWrite {
        /// Destination path of the reel.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<FfmpegError> for ReelError {
    fn from(error: FfmpegError) -> Self {
        ReelError::FfmpegError(error.to_string())
    }
}

impl From<PersistError> for ReelError {
    fn from(error: PersistError) -> Self {
        ReelError::OutputWrite {
            path: error.file.path().to_path_buf(),
            reason: error.error.to_string(),
        }
    }
}

/// A recoverable failure of one template-matching step.
///
/// The scan treats any of these as "no match on this frame".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// The template does not fit inside the searched frame area.
    #[error(
        "Template {template_width}x{template_height} does not fit in frame {frame_width}x{frame_height}"
    )]
    TemplateTooLarge {
        /// Template width in pixels.
        template_width: u32,
        /// Template height in pixels.
        template_height: u32,
        /// Width of the searched area.
        frame_width: u32,
        /// Height of the searched area.
        frame_height: u32,
    },

    /// The frame (or the search region inside it) has no pixels.
    #[error("Frame has no pixels to search")]
    EmptyFrame,
}
