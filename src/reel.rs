//! Highlight reel output.
//!
//! [`ReelWriter`] is one encoding session: an H.264 (`yuv420p`) video
//! stream and, when the source has audio, an AAC stream, muxed into a
//! container chosen from the output extension. Clips are appended in order.
//! Every decoded frame, video or audio, lands at
//! `offset + (t - window.start)` on the reel, where `t` is its source time.
//! Audio is trimmed to the window sample by sample and queued in an
//! [`AudioTimeline`], which re-cuts it into encoder-sized frames without
//! ever drifting from those positions.

use std::path::{Path, PathBuf};

use ffmpeg_next::{
    ChannelLayout, Dictionary, Packet, Rational,
    codec::{Id, context::Context as CodecContext, flag::Flags as CodecFlags},
    encoder::{Audio as AudioEncoder, Video as VideoEncoder},
    format::{Flags as FormatFlags, Pixel, Sample, context::Output, sample::Type as SampleType},
    frame::{Audio as AudioFrame, Video as VideoFrame},
    software::{
        resampling::Context as ResamplingContext,
        scaling::{Context as ScalingContext, Flags as ScalingFlags},
    },
};

use crate::conversion;
use crate::error::ReelError;

/// The written highlight video.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightReel {
    /// Where the reel was written.
    pub path: PathBuf,
    /// Number of clips concatenated.
    pub clips: usize,
    /// Sum of the planned window durations, in seconds.
    pub planned_duration: f64,
    /// Duration actually written, in seconds.
    pub written_duration: f64,
}

const VIDEO_PRESET: &str = "veryfast";
const VIDEO_CRF: &str = "23";
const AUDIO_BIT_RATE: usize = 128_000;
/// Samples per AAC frame when the encoder does not report a fixed size.
const DEFAULT_AUDIO_FRAME_SIZE: usize = 1024;
const FALLBACK_TIME_BASE: Rational = Rational(1, 90_000);

/// Video parameters the reel is encoded with.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VideoSettings {
    pub width: u32,
    pub height: u32,
    /// Source stream time base; reused for the output timeline.
    pub time_base: Rational,
    pub frame_rate: Option<Rational>,
}

/// Where one clip's source range `[start, end)` lands on the reel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ClipPlacement {
    /// Reel time of `start`, in seconds.
    pub offset: f64,
    pub start: f64,
    pub end: f64,
}

impl ClipPlacement {
    /// Reel time of source time `source_seconds`.
    pub(crate) fn reel_seconds(&self, source_seconds: f64) -> f64 {
        self.offset + (source_seconds - self.start)
    }
}

/// Audio parameters the reel is encoded with.
#[derive(Clone, Copy)]
pub(crate) struct AudioSettings {
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
}

struct VideoTrack {
    encoder: VideoEncoder,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
    scaler: Option<ScalingContext>,
    converted: VideoFrame,
    last_pts: Option<i64>,
    frame_seconds: f64,
    end_seconds: f64,
}

struct AudioTrack {
    encoder: AudioEncoder,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    format: Sample,
    channel_layout: ChannelLayout,
    sample_rate: u32,
    resampler: Option<ResamplingContext>,
    resampled: AudioFrame,
    timeline: AudioTimeline,
}

/// One open output file receiving clips.
pub(crate) struct ReelWriter {
    output: Output,
    path: PathBuf,
    video: VideoTrack,
    audio: Option<AudioTrack>,
}

impl ReelWriter {
    /// Open `path`, add the streams and write the container header.
    pub(crate) fn create(
        path: &Path,
        video: VideoSettings,
        audio: Option<AudioSettings>,
    ) -> Result<Self, ReelError> {
        let output_error = |reason: String| ReelError::OutputWrite {
            path: path.to_path_buf(),
            reason,
        };

        let mut output = ffmpeg_next::format::output(&path)
            .map_err(|error| output_error(format!("cannot open output: {error}")))?;
        let needs_global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);

        let video_track = open_video_track(&mut output, video, needs_global_header)?;
        let audio_track = match audio {
            Some(settings) => Some(open_audio_track(&mut output, settings, needs_global_header)?),
            None => None,
        };

        output
            .write_header()
            .map_err(|error| output_error(format!("cannot write header: {error}")))?;

        // The muxer may pick its own stream time bases in write_header.
        let mut writer = Self {
            output,
            path: path.to_path_buf(),
            video: video_track,
            audio: audio_track,
        };
        writer.video.stream_time_base = writer.stream_time_base(writer.video.stream_index);
        if let Some(index) = writer.audio.as_ref().map(|track| track.stream_index) {
            let time_base = writer.stream_time_base(index);
            if let Some(track) = writer.audio.as_mut() {
                track.stream_time_base = time_base;
            }
        }

        log::debug!(
            "Opened reel output {} ({}x{}, audio={})",
            writer.path.display(),
            writer.video.width,
            writer.video.height,
            writer.audio.is_some()
        );
        Ok(writer)
    }

    fn stream_time_base(&self, index: usize) -> Rational {
        self.output
            .stream(index)
            .map(|stream| stream.time_base())
            .filter(|time_base| conversion::is_usable_time_base(*time_base))
            .unwrap_or(FALLBACK_TIME_BASE)
    }

    /// Encode one decoded video frame at `reel_seconds` on the output timeline.
    pub(crate) fn write_video(
        &mut self,
        frame: &VideoFrame,
        reel_seconds: f64,
    ) -> Result<(), ReelError> {
        self.video.write(&mut self.output, frame, reel_seconds)
    }

    /// Encode the part of a decoded audio frame starting at source time
    /// `source_seconds` that falls inside `clip`. No-op for video-only reels.
    pub(crate) fn write_audio(
        &mut self,
        frame: &AudioFrame,
        source_seconds: f64,
        clip: &ClipPlacement,
    ) -> Result<(), ReelError> {
        match self.audio.as_mut() {
            Some(audio) => audio.write(&mut self.output, frame, source_seconds, clip),
            None => Ok(()),
        }
    }

    /// `true` when the reel carries an audio stream.
    pub(crate) fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Flush both encoders, write the trailer and return the written
    /// duration in seconds.
    pub(crate) fn finish(mut self) -> Result<f64, ReelError> {
        self.video
            .encoder
            .send_eof()
            .map_err(|error| ReelError::VideoEncodeError(format!("send_eof failed: {error}")))?;
        self.video.drain(&mut self.output)?;

        let mut audio_seconds = 0.0;
        if let Some(audio) = self.audio.as_mut() {
            audio.encode_queued(&mut self.output, true)?;
            audio.encoder.send_eof().map_err(|error| {
                ReelError::AudioEncodeError(format!("send_eof failed: {error}"))
            })?;
            audio.drain(&mut self.output)?;
            audio_seconds = audio.timeline.written_seconds();
        }

        self.output.write_trailer().map_err(|error| ReelError::OutputWrite {
            path: self.path.clone(),
            reason: format!("cannot write trailer: {error}"),
        })?;

        let written = self.video.end_seconds.max(audio_seconds);
        log::debug!("Finished reel output {} ({written:.3}s)", self.path.display());
        Ok(written)
    }
}

fn open_video_track(
    output: &mut Output,
    settings: VideoSettings,
    needs_global_header: bool,
) -> Result<VideoTrack, ReelError> {
    let codec = ffmpeg_next::encoder::find(Id::H264)
        .ok_or_else(|| ReelError::VideoEncodeError("H.264 encoder not available".to_string()))?;

    let mut encoder = CodecContext::new()
        .encoder()
        .video()
        .map_err(|error| ReelError::VideoEncodeError(format!("cannot create encoder: {error}")))?;

    // yuv420p needs even dimensions.
    let width = (settings.width & !1).max(2);
    let height = (settings.height & !1).max(2);
    let time_base = if conversion::is_usable_time_base(settings.time_base) {
        settings.time_base
    } else {
        FALLBACK_TIME_BASE
    };

    encoder.set_width(width);
    encoder.set_height(height);
    encoder.set_format(Pixel::YUV420P);
    encoder.set_time_base(time_base);
    encoder.set_frame_rate(settings.frame_rate);
    if needs_global_header {
        encoder.set_flags(CodecFlags::GLOBAL_HEADER);
    }

    let mut options = Dictionary::new();
    options.set("preset", VIDEO_PRESET);
    options.set("crf", VIDEO_CRF);
    let encoder = encoder
        .open_as_with(codec, options)
        .map_err(|error| ReelError::VideoEncodeError(format!("cannot open encoder: {error}")))?;

    let mut stream = output.add_stream(codec)?;
    stream.set_parameters(&encoder);
    stream.set_time_base(time_base);

    let frame_seconds = settings
        .frame_rate
        .filter(|rate| rate.numerator() > 0 && rate.denominator() > 0)
        .map_or(
            1.0 / crate::metadata::FALLBACK_FRAMES_PER_SECOND,
            |rate| rate.denominator() as f64 / rate.numerator() as f64,
        );

    Ok(VideoTrack {
        encoder,
        stream_index: stream.index(),
        encoder_time_base: time_base,
        stream_time_base: time_base,
        width,
        height,
        scaler: None,
        converted: VideoFrame::empty(),
        last_pts: None,
        frame_seconds,
        end_seconds: 0.0,
    })
}

fn open_audio_track(
    output: &mut Output,
    settings: AudioSettings,
    needs_global_header: bool,
) -> Result<AudioTrack, ReelError> {
    let codec = ffmpeg_next::encoder::find(Id::AAC)
        .ok_or_else(|| ReelError::AudioEncodeError("AAC encoder not available".to_string()))?;
    let format = codec
        .audio()
        .ok()
        .and_then(|audio_codec| audio_codec.formats())
        .and_then(|mut formats| formats.next())
        .unwrap_or(Sample::F32(SampleType::Planar));
    let time_base = Rational(1, settings.sample_rate as i32);

    let mut encoder = CodecContext::new()
        .encoder()
        .audio()
        .map_err(|error| ReelError::AudioEncodeError(error.to_string()))?;
    encoder.set_rate(settings.sample_rate as i32);
    encoder.set_channel_layout(settings.channel_layout);
    encoder.set_format(format);
    encoder.set_time_base(time_base);
    encoder.set_bit_rate(AUDIO_BIT_RATE);
    if needs_global_header {
        encoder.set_flags(CodecFlags::GLOBAL_HEADER);
    }

    let encoder = encoder
        .open_as(codec)
        .map_err(|error| ReelError::AudioEncodeError(error.to_string()))?;
    let frame_size = match encoder.frame_size() as usize {
        0 => DEFAULT_AUDIO_FRAME_SIZE,
        size => size,
    };

    let mut stream = output.add_stream(codec)?;
    stream.set_parameters(&encoder);
    stream.set_time_base(time_base);

    Ok(AudioTrack {
        stream_index: stream.index(),
        encoder,
        encoder_time_base: time_base,
        stream_time_base: time_base,
        format,
        channel_layout: settings.channel_layout,
        sample_rate: settings.sample_rate,
        resampler: None,
        resampled: AudioFrame::empty(),
        timeline: AudioTimeline::new(
            plane_layout(format, settings.channel_layout.channels()),
            settings.sample_rate,
            frame_size,
        ),
    })
}

/// Plane count and bytes per sample per plane for a sample format.
fn plane_layout(format: Sample, channels: i32) -> (usize, usize) {
    let channels = channels.max(1) as usize;
    if format.is_planar() {
        (channels, format.bytes())
    } else {
        (1, format.bytes() * channels)
    }
}

impl VideoTrack {
    fn write(
        &mut self,
        output: &mut Output,
        frame: &VideoFrame,
        reel_seconds: f64,
    ) -> Result<(), ReelError> {
        let stale = match &self.scaler {
            Some(scaler) => {
                scaler.input().format != frame.format()
                    || scaler.input().width != frame.width()
                    || scaler.input().height != frame.height()
            }
            None => true,
        };
        if stale {
            self.scaler = Some(
                ScalingContext::get(
                    frame.format(),
                    frame.width(),
                    frame.height(),
                    Pixel::YUV420P,
                    self.width,
                    self.height,
                    ScalingFlags::BILINEAR,
                )
                .map_err(|error| {
                    ReelError::VideoEncodeError(format!("cannot create scaler: {error}"))
                })?,
            );
        }
        if let Some(scaler) = self.scaler.as_mut() {
            scaler
                .run(frame, &mut self.converted)
                .map_err(|error| ReelError::VideoEncodeError(format!("scaling failed: {error}")))?;
        }

        // Output timestamps must strictly increase.
        let mut pts = conversion::seconds_to_pts(reel_seconds.max(0.0), self.encoder_time_base);
        if let Some(last) = self.last_pts
            && pts <= last
        {
            pts = last + 1;
        }
        self.last_pts = Some(pts);
        self.end_seconds = self.end_seconds.max(
            conversion::pts_to_seconds(pts, self.encoder_time_base) + self.frame_seconds,
        );

        self.converted.set_pts(Some(pts));
        self.encoder
            .send_frame(&self.converted)
            .map_err(|error| ReelError::VideoEncodeError(format!("send_frame failed: {error}")))?;
        self.drain(output)
    }

    fn drain(&mut self, output: &mut Output) -> Result<(), ReelError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(output)
                .map_err(|error| ReelError::VideoEncodeError(format!("write failed: {error}")))?;
        }
        Ok(())
    }
}

impl AudioTrack {
    fn write(
        &mut self,
        output: &mut Output,
        frame: &AudioFrame,
        source_seconds: f64,
        clip: &ClipPlacement,
    ) -> Result<(), ReelError> {
        let stale = match &self.resampler {
            Some(resampler) => {
                resampler.input().format != frame.format()
                    || resampler.input().rate != frame.rate()
            }
            None => true,
        };
        if stale {
            self.resampler = Some(
                ResamplingContext::get(
                    frame.format(),
                    frame.channel_layout(),
                    frame.rate(),
                    self.format,
                    self.channel_layout,
                    self.sample_rate,
                )
                .map_err(|error| ReelError::AudioEncodeError(error.to_string()))?,
            );
        }
        if let Some(resampler) = self.resampler.as_mut() {
            resampler
                .run(frame, &mut self.resampled)
                .map_err(|error| ReelError::AudioEncodeError(error.to_string()))?;
        }

        let samples = self.resampled.samples();
        let (plane_count, plane_bytes) = self.timeline.layout();
        let planes: Vec<&[u8]> = (0..plane_count)
            .map(|plane| &self.resampled.data(plane)[..samples * plane_bytes])
            .collect();
        self.timeline.queue(&planes, samples, source_seconds, clip);

        self.encode_queued(output, false)
    }

    /// Encode every whole frame queued; with `pad`, also the remainder
    /// padded with silence.
    fn encode_queued(&mut self, output: &mut Output, pad: bool) -> Result<(), ReelError> {
        let frame_size = self.timeline.frame_size();
        while let Some((pts, planes)) = self.timeline.next_frame(pad) {
            let mut frame = AudioFrame::new(self.format, frame_size, self.channel_layout);
            frame.set_rate(self.sample_rate);
            for (index, plane) in planes.iter().enumerate() {
                frame.data_mut(index)[..plane.len()].copy_from_slice(plane);
            }
            frame.set_pts(Some(pts));

            self.encoder
                .send_frame(&frame)
                .map_err(|error| ReelError::AudioEncodeError(error.to_string()))?;
            self.drain(output)?;
        }
        Ok(())
    }

    fn drain(&mut self, output: &mut Output) -> Result<(), ReelError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(output)
                .map_err(|error| ReelError::AudioEncodeError(error.to_string()))?;
        }
        Ok(())
    }
}

/// Byte FIFO of audio samples, one queue per plane.
///
/// AAC takes fixed-size frames while decoders hand out whatever they
/// decoded, so samples are queued here and re-cut.
#[derive(Debug, Clone)]
pub(crate) struct SampleFifo {
    queues: Vec<Vec<u8>>,
    bytes_per_sample: usize,
}

impl SampleFifo {
    /// `layout` is (plane count, bytes per sample in each plane).
    pub(crate) fn new(layout: (usize, usize)) -> Self {
        let (planes, bytes_per_sample) = layout;
        Self {
            queues: vec![Vec::new(); planes.max(1)],
            bytes_per_sample: bytes_per_sample.max(1),
        }
    }

    pub(crate) fn layout(&self) -> (usize, usize) {
        (self.queues.len(), self.bytes_per_sample)
    }

    /// Samples queued.
    pub(crate) fn len(&self) -> usize {
        self.queues[0].len() / self.bytes_per_sample
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `samples` samples; each plane slice must hold at least that many.
    pub(crate) fn push(&mut self, planes: &[&[u8]], samples: usize) {
        let bytes = samples * self.bytes_per_sample;
        for (queue, plane) in self.queues.iter_mut().zip(planes) {
            queue.extend_from_slice(&plane[..bytes]);
        }
    }

    /// Append `samples` samples of silence.
    pub(crate) fn push_silence(&mut self, samples: usize) {
        let bytes = samples * self.bytes_per_sample;
        for queue in &mut self.queues {
            queue.resize(queue.len() + bytes, 0);
        }
    }

    /// Take exactly `samples` samples, or `None` if fewer are queued.
    pub(crate) fn pop(&mut self, samples: usize) -> Option<Vec<Vec<u8>>> {
        if samples == 0 || self.len() < samples {
            return None;
        }
        let bytes = samples * self.bytes_per_sample;
        Some(
            self.queues
                .iter_mut()
                .map(|queue| queue.drain(..bytes).collect())
                .collect(),
        )
    }

    /// Take everything queued, zero-filled to `samples` samples.
    pub(crate) fn pop_padded(&mut self, samples: usize) -> Vec<Vec<u8>> {
        let bytes = samples.max(self.len()) * self.bytes_per_sample;
        self.queues
            .iter_mut()
            .map(|queue| {
                let mut plane: Vec<u8> = std::mem::take(queue);
                plane.resize(bytes, 0);
                plane
            })
            .collect()
    }
}

/// Tolerated disagreement, in samples, between where audio arrives and
/// where the queue already ends before silence is inserted or samples are
/// dropped.
const AUDIO_SLACK_SAMPLES: i64 = 2;

/// Fraction of a sample ignored when trimming to a window edge.
const SAMPLE_EPSILON: f64 = 1e-6;

/// Audio queued on the reel's sample clock.
///
/// Samples are placed where their source time maps to on the reel; gaps
/// are filled with silence and overlaps dropped. Frames leave in
/// encoder-sized chunks whose pts is the reel sample index of their first
/// sample, so leftovers carry into the next clip unchanged.
#[derive(Debug, Clone)]
pub(crate) struct AudioTimeline {
    fifo: SampleFifo,
    sample_rate: u32,
    frame_size: usize,
    /// Reel sample index of the first queued sample.
    head: i64,
}

impl AudioTimeline {
    pub(crate) fn new(layout: (usize, usize), sample_rate: u32, frame_size: usize) -> Self {
        Self {
            fifo: SampleFifo::new(layout),
            sample_rate: sample_rate.max(1),
            frame_size: frame_size.max(1),
            head: 0,
        }
    }

    pub(crate) fn layout(&self) -> (usize, usize) {
        self.fifo.layout()
    }

    pub(crate) fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Queue the samples of a chunk starting at `source_seconds` that lie
    /// in `clip`'s `[start, end)`.
    pub(crate) fn queue(
        &mut self,
        planes: &[&[u8]],
        samples: usize,
        source_seconds: f64,
        clip: &ClipPlacement,
    ) {
        let rate = self.sample_rate as f64;
        let sample_at = |seconds: f64| {
            ((seconds - source_seconds) * rate - SAMPLE_EPSILON)
                .ceil()
                .clamp(0.0, samples as f64) as usize
        };
        let first = sample_at(clip.start);
        let last = sample_at(clip.end);
        if last <= first {
            return;
        }

        let position = (clip.reel_seconds(source_seconds) * rate).round() as i64 + first as i64;
        let tail = self.head + self.fifo.len() as i64;
        let mut from = first;
        match position - tail {
            gap if gap > AUDIO_SLACK_SAMPLES => self.fifo.push_silence(gap as usize),
            gap if gap < -AUDIO_SLACK_SAMPLES => from += gap.unsigned_abs() as usize,
            _ => {}
        }
        if from >= last {
            return;
        }

        let (_, bytes_per_sample) = self.fifo.layout();
        let kept: Vec<&[u8]> = planes
            .iter()
            .map(|plane| &plane[from * bytes_per_sample..last * bytes_per_sample])
            .collect();
        self.fifo.push(&kept, last - from);
    }

    /// Next whole frame and its pts; with `pad`, the remainder zero-filled.
    pub(crate) fn next_frame(&mut self, pad: bool) -> Option<(i64, Vec<Vec<u8>>)> {
        let planes = match self.fifo.pop(self.frame_size) {
            Some(planes) => planes,
            None if pad && !self.fifo.is_empty() => self.fifo.pop_padded(self.frame_size),
            None => return None,
        };
        let pts = self.head;
        self.head += self.frame_size as i64;
        Some((pts, planes))
    }

    /// Reel time up to which frames have been handed out.
    pub(crate) fn written_seconds(&self) -> f64 {
        self.head as f64 / self.sample_rate as f64
    }
}
