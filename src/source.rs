//! Opened video files.
//!
//! [`VideoSource`] owns the FFmpeg demuxer for one pipeline invocation. It
//! caches metadata at open time and hands out the decoding frame source used
//! by the scan and the packet access used by the clip extractor.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    time::Duration,
};

use ffmpeg_next::{codec::context::Context as CodecContext, format::context::Input, media::Type};

use crate::{
    config::ColorMode,
    conversion,
    error::ReelError,
    metadata::{AudioMetadata, SourceMetadata, VideoMetadata},
    sampler::DecodedFrames,
};

/// A video file opened read-only for scanning and cutting.
///
/// # Example
///
/// ```no_run
/// use killreel::VideoSource;
///
/// let source = VideoSource::open("match.mp4")?;
/// let metadata = source.metadata();
/// println!("{}x{} for {:?}", metadata.video.width, metadata.video.height, metadata.duration);
/// # Ok::<(), killreel::ReelError>(())
/// ```
pub struct VideoSource {
    pub(crate) input_context: Input,
    pub(crate) metadata: SourceMetadata,
    pub(crate) file_path: PathBuf,
}

impl Debug for VideoSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("VideoSource")
            .field("metadata", &self.metadata)
            .field("file_path", &self.file_path)
            .finish_non_exhaustive()
    }
}

impl VideoSource {
    /// Open a video file.
    ///
    /// Initialises FFmpeg (idempotent), opens the container, and records the
    /// best video stream and, if present, the best audio stream.
    ///
    /// # Errors
    ///
    /// [`ReelError::FileOpen`] if the file cannot be opened or its codec
    /// parameters cannot be read, [`ReelError::NoVideoStream`] if there is
    /// no video.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReelError> {
        let path = path.as_ref().to_path_buf();
        log::debug!("Opening video source: {}", path.display());

        ffmpeg_next::init().map_err(|error| ReelError::FileOpen {
            path: path.clone(),
            reason: format!("FFmpeg initialisation failed: {error}"),
        })?;

        let input_context =
            ffmpeg_next::format::input(&path).map_err(|error| ReelError::FileOpen {
                path: path.clone(),
                reason: error.to_string(),
            })?;

        let duration_microseconds = input_context.duration();
        let duration = if duration_microseconds > 0 {
            Duration::from_micros(duration_microseconds as u64)
        } else {
            Duration::ZERO
        };

        let video = {
            let stream = input_context
                .streams()
                .best(Type::Video)
                .ok_or(ReelError::NoVideoStream)?;
            let index = stream.index();
            let decoder = CodecContext::from_parameters(stream.parameters())
                .and_then(|context| context.decoder().video())
                .map_err(|error| ReelError::FileOpen {
                    path: path.clone(),
                    reason: format!("Failed to create video decoder for stream {index}: {error}"),
                })?;

            let frame_rate = stream.avg_frame_rate();
            let frames_per_second = if frame_rate.denominator() != 0 {
                frame_rate.numerator() as f64 / frame_rate.denominator() as f64
            } else {
                let rate = stream.rate();
                if rate.denominator() != 0 {
                    rate.numerator() as f64 / rate.denominator() as f64
                } else {
                    0.0
                }
            };

            let time_base = stream.time_base();
            let start_seconds = if stream.start_time() != ffmpeg_sys_next::AV_NOPTS_VALUE
                && conversion::is_usable_time_base(time_base)
            {
                conversion::pts_to_seconds(stream.start_time(), time_base)
            } else {
                0.0
            };

            let mut video = VideoMetadata {
                width: decoder.width(),
                height: decoder.height(),
                frames_per_second,
                frame_count: 0,
                codec: decoder
                    .codec()
                    .map(|codec| codec.name().to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                start_seconds,
                stream_index: index,
            };
            video.frame_count =
                (duration.as_secs_f64() * video.effective_frames_per_second()) as u64;
            video
        };

        let audio = match input_context.streams().best(Type::Audio) {
            Some(stream) => {
                let index = stream.index();
                match CodecContext::from_parameters(stream.parameters())
                    .and_then(|context| context.decoder().audio())
                {
                    Ok(decoder) => Some(AudioMetadata {
                        sample_rate: decoder.rate(),
                        channels: decoder.channels(),
                        codec: decoder
                            .codec()
                            .map(|codec| codec.name().to_string())
                            .unwrap_or_else(|| "unknown".to_string()),
                        stream_index: index,
                    }),
                    Err(error) => {
                        log::warn!("Ignoring undecodable audio stream {index}: {error}");
                        None
                    }
                }
            }
            None => None,
        };

        let metadata = SourceMetadata {
            video,
            audio,
            duration,
            format: input_context.format().name().to_string(),
        };

        log::info!(
            "Opened video source: {} (format={}, duration={:.2}s, {}x{} @ {:.2} fps, audio={})",
            path.display(),
            metadata.format,
            metadata.duration.as_secs_f64(),
            metadata.video.width,
            metadata.video.height,
            metadata.video.frames_per_second,
            metadata.audio.is_some(),
        );

        Ok(Self {
            input_context,
            metadata,
            file_path: path,
        })
    }

    /// Cached metadata.
    pub fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Decode the video stream from the start, converting frames to `mode`.
    ///
    /// The returned [`DecodedFrames`] borrows the source mutably.
    ///
    /// # Errors
    ///
    /// Fails if the decoder or the pixel converter cannot be created.
    pub fn frames(&mut self, mode: ColorMode) -> Result<DecodedFrames<'_>, ReelError> {
        DecodedFrames::new(self, mode)
    }
}
