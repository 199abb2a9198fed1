//! Strided frame sampling.
//!
//! A [`FrameSource`] decodes frames one at a time in decode order;
//! [`FrameSampler`] walks a source and yields every `stride`-th frame as a
//! [`SampledFrame`]. Frames in between are still decoded (the decoder needs
//! them) but never converted to pixels.
//!
//! Timestamps always come from the source's own position counter. For
//! FFmpeg sources that is the frame's best-effort presentation timestamp,
//! so variable-frame-rate footage keeps correct times. Frames the decoder
//! cannot place in time are skipped rather than given an estimated time.
//!
//! # Example
//!
//! ```no_run
//! use killreel::{ColorMode, FrameSampler, VideoSource};
//!
//! let mut source = VideoSource::open("match.mp4")?;
//! let frames = source.frames(ColorMode::Grayscale)?;
//! for frame in FrameSampler::new(frames, 5)? {
//!     let frame = frame?;
//!     println!("frame {} at {:.3}s", frame.index, frame.timestamp);
//! }
//! # Ok::<(), killreel::ReelError>(())
//! ```

use ffmpeg_next::{
    Error as FfmpegError, Packet, Rational,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    frame::Video as VideoFrame,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::{DynamicImage, GrayImage, RgbImage};

use crate::config::ColorMode;
use crate::conversion;
use crate::error::ReelError;
use crate::source::VideoSource;

/// A decoder-like producer of frames in decode order.
///
/// Implemented by [`DecodedFrames`] for real files; tests and callers with
/// their own decoders can implement it for synthetic sources.
pub trait FrameSource {
    /// Decode the next frame and return its position in seconds.
    ///
    /// Returns `Ok(None)` once the source is exhausted.
    fn advance(&mut self) -> Result<Option<f64>, ReelError>;

    /// Pixels of the frame most recently returned by [`advance`](FrameSource::advance).
    fn current_image(&mut self) -> Result<DynamicImage, ReelError>;
}

/// One frame handed to the matcher.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// Zero-based position in decode order.
    pub index: u64,
    /// Source-reported presentation time in seconds.
    pub timestamp: f64,
    /// Decoded pixels.
    pub image: DynamicImage,
}

/// Lazy iterator over every `stride`-th frame of a [`FrameSource`].
///
/// Finite and not restartable: it consumes the source.
pub struct FrameSampler<S> {
    source: S,
    stride: u64,
    decoded: u64,
    done: bool,
}

impl<S: FrameSource> FrameSampler<S> {
    /// Sample frames 0, `stride`, 2·`stride`, ...
    ///
    /// # Errors
    ///
    /// [`ReelError::InvalidConfiguration`] when `stride` is zero.
    pub fn new(source: S, stride: u64) -> Result<Self, ReelError> {
        if stride == 0 {
            return Err(ReelError::InvalidConfiguration(
                "sample stride must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            source,
            stride,
            decoded: 0,
            done: false,
        })
    }

    /// Number of frames decoded so far, sampled or not.
    pub fn frames_decoded(&self) -> u64 {
        self.decoded
    }
}

impl<S: FrameSource> Iterator for FrameSampler<S> {
    type Item = Result<SampledFrame, ReelError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let timestamp = match self.source.advance() {
                Ok(Some(timestamp)) => timestamp,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(error) => {
                    self.done = true;
                    return Some(Err(error));
                }
            };

            let index = self.decoded;
            self.decoded += 1;
            if index % self.stride != 0 {
                continue;
            }

            return Some(match self.source.current_image() {
                Ok(image) => Ok(SampledFrame {
                    index,
                    timestamp,
                    image,
                }),
                Err(error) => {
                    self.done = true;
                    Err(error)
                }
            });
        }
        None
    }
}

/// FFmpeg-backed [`FrameSource`] over a [`VideoSource`]'s video stream.
///
/// Created via [`VideoSource::frames`]. Borrows the source mutably for its
/// whole lifetime.
pub struct DecodedFrames<'a> {
    source: &'a mut VideoSource,
    decoder: VideoDecoder,
    scaler: Option<ScalingContext>,
    stream_index: usize,
    time_base: Rational,
    start_seconds: f64,
    mode: ColorMode,
    decoded_frame: VideoFrame,
    converted_frame: VideoFrame,
    untimed_frames: u64,
    eof_sent: bool,
    done: bool,
}

impl<'a> DecodedFrames<'a> {
    pub(crate) fn new(source: &'a mut VideoSource, mode: ColorMode) -> Result<Self, ReelError> {
        let stream_index = source.metadata.video.stream_index;
        let start_seconds = source.metadata.video.start_seconds;

        let stream = source
            .input_context
            .stream(stream_index)
            .ok_or(ReelError::NoVideoStream)?;
        let time_base = stream.time_base();
        let decoder = CodecContext::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        // Rewind in case the source was used before.
        if let Err(error) = source.input_context.seek(0, ..0) {
            log::debug!("Rewind before scanning failed (continuing): {error}");
        }

        Ok(Self {
            source,
            decoder,
            scaler: None,
            stream_index,
            time_base,
            start_seconds,
            mode,
            decoded_frame: VideoFrame::empty(),
            converted_frame: VideoFrame::empty(),
            untimed_frames: 0,
            eof_sent: false,
            done: false,
        })
    }

    /// Position of the frame in `decoded_frame`, relative to stream start.
    fn position_of_decoded(&self) -> Option<f64> {
        let pts = self
            .decoded_frame
            .timestamp()
            .or_else(|| self.decoded_frame.pts());
        frame_position(pts, self.time_base, self.start_seconds)
    }
}

/// Seconds since stream start, or `None` when the frame cannot be placed.
fn frame_position(pts: Option<i64>, time_base: Rational, start_seconds: f64) -> Option<f64> {
    pts.filter(|_| conversion::is_usable_time_base(time_base))
        .map(|pts| conversion::pts_to_seconds(pts, time_base) - start_seconds)
}

impl FrameSource for DecodedFrames<'_> {
    fn advance(&mut self) -> Result<Option<f64>, ReelError> {
        if self.done {
            return Ok(None);
        }

        loop {
            if self.decoder.receive_frame(&mut self.decoded_frame).is_ok() {
                match self.position_of_decoded() {
                    Some(position) => return Ok(Some(position)),
                    None => {
                        self.untimed_frames += 1;
                        continue;
                    }
                }
            }

            if self.eof_sent {
                if self.untimed_frames > 0 {
                    log::warn!(
                        "Skipped {} video frames without a timestamp",
                        self.untimed_frames
                    );
                }
                self.done = true;
                return Ok(None);
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.source.input_context) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    match self.decoder.send_packet(&packet) {
                        Ok(()) => {}
                        Err(FfmpegError::InvalidData) => {
                            log::debug!("Skipping corrupt video packet at pts {:?}", packet.pts());
                        }
                        Err(error) => {
                            self.done = true;
                            return Err(ReelError::VideoDecodeError(error.to_string()));
                        }
                    }
                }
                Err(FfmpegError::Eof) => {
                    self.decoder
                        .send_eof()
                        .map_err(|error| ReelError::VideoDecodeError(error.to_string()))?;
                    self.eof_sent = true;
                }
                Err(error) => {
                    log::debug!("Non-fatal read error while scanning: {error}");
                }
            }
        }
    }

    fn current_image(&mut self) -> Result<DynamicImage, ReelError> {
        let width = self.decoded_frame.width();
        let height = self.decoded_frame.height();

        let needs_scaler = match &self.scaler {
            Some(scaler) => {
                scaler.input().format != self.decoded_frame.format()
                    || scaler.input().width != width
                    || scaler.input().height != height
            }
            None => true,
        };
        if needs_scaler {
            self.scaler = Some(ScalingContext::get(
                self.decoded_frame.format(),
                width,
                height,
                self.mode.to_ffmpeg_pixel(),
                width,
                height,
                ScalingFlags::BILINEAR,
            )?);
        }

        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(&self.decoded_frame, &mut self.converted_frame)?;
        }

        let buffer = conversion::frame_to_buffer(
            &self.converted_frame,
            width,
            height,
            self.mode.channels(),
        );

        match self.mode {
            ColorMode::Grayscale => GrayImage::from_raw(width, height, buffer)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| {
                    ReelError::VideoDecodeError(
                        "Failed to construct grayscale image from decoded frame".to_string(),
                    )
                }),
            ColorMode::Color => RgbImage::from_raw(width, height, buffer)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| {
                    ReelError::VideoDecodeError(
                        "Failed to construct RGB image from decoded frame".to_string(),
                    )
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    /// Frames at a fixed rate, each filled with its own index.
    struct Counter {
        next: u64,
        count: u64,
        fps: f64,
    }

    impl FrameSource for Counter {
        fn advance(&mut self) -> Result<Option<f64>, ReelError> {
            if self.next >= self.count {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some((self.next - 1) as f64 / self.fps))
        }

        fn current_image(&mut self) -> Result<DynamicImage, ReelError> {
            let value = (self.next - 1) as u8;
            Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, Luma([value]))))
        }
    }

    #[test]
    fn yields_every_stride_th_frame() {
        let source = Counter {
            next: 0,
            count: 12,
            fps: 10.0,
        };
        let mut sampler = FrameSampler::new(source, 5).unwrap();
        let indices: Vec<u64> = sampler
            .by_ref()
            .map(|frame| frame.unwrap().index)
            .collect();

        assert_eq!(indices, vec![0, 5, 10]);
        assert_eq!(sampler.frames_decoded(), 12);
    }

    #[test]
    fn timestamps_come_from_the_source() {
        let source = Counter {
            next: 0,
            count: 7,
            fps: 4.0,
        };
        let frames: Vec<SampledFrame> = FrameSampler::new(source, 3)
            .unwrap()
            .map(Result::unwrap)
            .collect();

        let times: Vec<f64> = frames.iter().map(|frame| frame.timestamp).collect();
        assert_eq!(times, vec![0.0, 0.75, 1.5]);
        assert_eq!(frames[1].image.to_luma8().get_pixel(0, 0)[0], 3);
    }

    #[test]
    fn frames_without_a_usable_timestamp_have_no_position() {
        let time_base = Rational::new(1, 12_800);
        assert_eq!(frame_position(Some(25_600), time_base, 0.0), Some(2.0));
        assert_eq!(frame_position(Some(25_600), time_base, 0.5), Some(1.5));
        assert_eq!(frame_position(None, time_base, 0.0), None);
        assert_eq!(frame_position(Some(25_600), Rational::new(0, 1), 0.0), None);
    }

    #[test]
    fn zero_stride_is_rejected() {
        let source = Counter {
            next: 0,
            count: 1,
            fps: 1.0,
        };
        assert!(FrameSampler::new(source, 0).is_err());
    }
}
