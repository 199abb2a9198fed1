//! Clip extraction and concatenation.
//!
//! [`ClipExtractor`] cuts each planned window out of a [`VideoSource`] and
//! appends it to one [`ReelWriter`]. For every window it seeks to the
//! window start, decodes video and audio and keeps what lies in
//! `[start, end)`: whole video frames by timestamp, audio down to the
//! sample. Both are re-based so each clip begins where the previous one
//! ended.

use std::path::Path;

use ffmpeg_next::{
    Error as FfmpegError, Packet, Rational,
    codec::context::Context as CodecContext,
    decoder::{Audio as AudioDecoder, Video as VideoDecoder},
    frame::{Audio as AudioFrame, Video as VideoFrame},
};

use crate::{
    config::ReelOptions,
    conversion,
    error::ReelError,
    progress::{ProgressTracker, ReelPhase},
    reel::{AudioSettings, ClipPlacement, HighlightReel, ReelWriter, VideoSettings},
    source::VideoSource,
    window::ClipWindow,
};

/// Audio read past a window's end once its video is complete.
const AUDIO_GRACE_SECONDS: f64 = 1.0;

struct AudioInput {
    decoder: AudioDecoder,
    stream_index: usize,
    time_base: Rational,
}

/// Cuts windows from one source into one reel.
pub(crate) struct ClipExtractor<'a> {
    source: &'a mut VideoSource,
    video_decoder: VideoDecoder,
    video_stream_index: usize,
    video_time_base: Rational,
    audio: Option<AudioInput>,
    start_seconds: f64,
    video_frame: VideoFrame,
    audio_frame: AudioFrame,
}

/// Per-window read state.
#[derive(Debug, Default)]
struct WindowProgress {
    video_done: bool,
    audio_done: bool,
    frames_written: u64,
}

impl<'a> ClipExtractor<'a> {
    pub(crate) fn new(source: &'a mut VideoSource) -> Result<Self, ReelError> {
        let video_stream_index = source.metadata.video.stream_index;
        let stream = source
            .input_context
            .stream(video_stream_index)
            .ok_or(ReelError::NoVideoStream)?;
        let video_time_base = stream.time_base();
        let video_decoder = CodecContext::from_parameters(stream.parameters())?
            .decoder()
            .video()
            .map_err(|error| ReelError::VideoDecodeError(error.to_string()))?;

        let audio = match source.metadata.audio.as_ref().map(|audio| audio.stream_index) {
            Some(index) => match source.input_context.stream(index) {
                Some(stream) => {
                    let time_base = stream.time_base();
                    match CodecContext::from_parameters(stream.parameters())
                        .and_then(|context| context.decoder().audio())
                    {
                        Ok(decoder) => Some(AudioInput {
                            decoder,
                            stream_index: index,
                            time_base,
                        }),
                        Err(error) => {
                            log::warn!("Cutting without audio; decoder failed: {error}");
                            None
                        }
                    }
                }
                None => None,
            },
            None => None,
        };

        Ok(Self {
            start_seconds: source.metadata.video.start_seconds,
            source,
            video_decoder,
            video_stream_index,
            video_time_base,
            audio,
            video_frame: VideoFrame::empty(),
            audio_frame: AudioFrame::empty(),
        })
    }

    fn video_settings(&self) -> VideoSettings {
        let frame_rate = self
            .source
            .input_context
            .stream(self.video_stream_index)
            .map(|stream| stream.avg_frame_rate())
            .filter(|rate| rate.numerator() > 0 && rate.denominator() > 0);
        VideoSettings {
            width: self.video_decoder.width(),
            height: self.video_decoder.height(),
            time_base: self.video_time_base,
            frame_rate,
        }
    }

    fn audio_settings(&self) -> Option<AudioSettings> {
        self.audio.as_ref().map(|audio| AudioSettings {
            sample_rate: audio.decoder.rate(),
            channel_layout: audio.decoder.channel_layout(),
        })
    }

    /// Write `windows`, in order, to `path`.
    ///
    /// `windows` must not be empty. Cancellation is checked before each clip.
    pub(crate) fn write_reel(
        mut self,
        windows: &[ClipWindow],
        path: &Path,
        options: &ReelOptions,
    ) -> Result<HighlightReel, ReelError> {
        let mut writer = ReelWriter::create(path, self.video_settings(), self.audio_settings())?;
        let mut tracker = ProgressTracker::new(
            options.progress.clone(),
            ReelPhase::Extracting,
            Some(windows.len() as u64),
            1,
        );

        let mut offset = 0.0;
        for (clip, window) in windows.iter().enumerate() {
            if options.is_cancelled() {
                return Err(ReelError::Cancelled);
            }
            log::debug!(
                "Cutting clip {}/{}: {:.3}s..{:.3}s at reel offset {offset:.3}s",
                clip + 1,
                windows.len(),
                window.start,
                window.end
            );

            let placement = ClipPlacement {
                offset,
                start: window.start,
                end: window.end,
            };
            let frames = self.cut_window(&placement, &mut writer)?;
            if frames == 0 {
                log::warn!(
                    "Clip {}..{} produced no video frames",
                    window.start,
                    window.end
                );
            }

            offset += window.duration();
            tracker.advance(Some(std::time::Duration::from_secs_f64(window.end.max(0.0))));
        }
        tracker.finish();

        let written_duration = writer.finish()?;
        Ok(HighlightReel {
            path: path.to_path_buf(),
            clips: windows.len(),
            planned_duration: offset,
            written_duration,
        })
    }

    /// Append one window; returns the number of video frames written.
    fn cut_window(
        &mut self,
        window: &ClipPlacement,
        writer: &mut ReelWriter,
    ) -> Result<u64, ReelError> {
        let seek_target = conversion::seconds_to_seek_timestamp(window.start + self.start_seconds);
        self.source.input_context.seek(seek_target, ..seek_target)?;
        self.video_decoder.flush();
        if let Some(audio) = self.audio.as_mut() {
            audio.decoder.flush();
        }

        let mut state = WindowProgress {
            audio_done: self.audio.is_none() || !writer.has_audio(),
            ..WindowProgress::default()
        };

        while !(state.video_done && state.audio_done) {
            let mut packet = Packet::empty();
            match packet.read(&mut self.source.input_context) {
                Ok(()) => {}
                Err(FfmpegError::Eof) => {
                    self.drain_at_eof(window, writer, &mut state)?;
                    break;
                }
                Err(error) => {
                    log::debug!("Non-fatal read error while cutting: {error}");
                    continue;
                }
            }

            if packet.stream() == self.video_stream_index {
                if state.video_done {
                    continue;
                }
                send_or_skip(self.video_decoder.send_packet(&packet), ReelError::VideoDecodeError)?;
                self.receive_video(window, writer, &mut state)?;
            } else if let Some(audio) = self.audio.as_ref()
                && packet.stream() == audio.stream_index
            {
                if state.audio_done {
                    continue;
                }
                if state.video_done
                    && let Some(pts) = packet.pts()
                    && conversion::pts_to_seconds(pts, audio.time_base) - self.start_seconds
                        > window.end + AUDIO_GRACE_SECONDS
                {
                    state.audio_done = true;
                    continue;
                }
                if let Some(audio) = self.audio.as_mut() {
                    send_or_skip(audio.decoder.send_packet(&packet), ReelError::AudioDecodeError)?;
                }
                self.receive_audio(window, writer, &mut state)?;
            }
        }

        Ok(state.frames_written)
    }

    fn receive_video(
        &mut self,
        window: &ClipPlacement,
        writer: &mut ReelWriter,
        state: &mut WindowProgress,
    ) -> Result<(), ReelError> {
        while self.video_decoder.receive_frame(&mut self.video_frame).is_ok() {
            let Some(pts) = self.video_frame.timestamp().or_else(|| self.video_frame.pts()) else {
                continue;
            };
            let t = conversion::pts_to_seconds(pts, self.video_time_base) - self.start_seconds;
            if t >= window.end {
                state.video_done = true;
                continue;
            }
            if t < window.start || state.video_done {
                continue;
            }
            writer.write_video(&self.video_frame, window.reel_seconds(t))?;
            state.frames_written += 1;
        }
        Ok(())
    }

    /// Audio frames straddling a window edge are trimmed by the writer.
    fn receive_audio(
        &mut self,
        window: &ClipPlacement,
        writer: &mut ReelWriter,
        state: &mut WindowProgress,
    ) -> Result<(), ReelError> {
        let Some(audio) = self.audio.as_mut() else {
            return Ok(());
        };
        while audio.decoder.receive_frame(&mut self.audio_frame).is_ok() {
            let Some(pts) = self.audio_frame.timestamp().or_else(|| self.audio_frame.pts()) else {
                continue;
            };
            let t = conversion::pts_to_seconds(pts, audio.time_base) - self.start_seconds;
            if t >= window.end {
                state.audio_done = true;
                continue;
            }
            if state.audio_done {
                continue;
            }
            writer.write_audio(&self.audio_frame, t, window)?;
        }
        Ok(())
    }

    /// End of file inside a window: flush whatever the decoders still hold.
    fn drain_at_eof(
        &mut self,
        window: &ClipPlacement,
        writer: &mut ReelWriter,
        state: &mut WindowProgress,
    ) -> Result<(), ReelError> {
        if !state.video_done {
            self.video_decoder
                .send_eof()
                .map_err(|error| ReelError::VideoDecodeError(error.to_string()))?;
            self.receive_video(window, writer, state)?;
        }
        if !state.audio_done {
            if let Some(audio) = self.audio.as_mut() {
                audio
                    .decoder
                    .send_eof()
                    .map_err(|error| ReelError::AudioDecodeError(error.to_string()))?;
            }
            self.receive_audio(window, writer, state)?;
        }
        Ok(())
    }
}

/// Corrupt packets are skipped; anything else is fatal.
fn send_or_skip(
    result: Result<(), FfmpegError>,
    to_error: fn(String) -> ReelError,
) -> Result<(), ReelError> {
    match result {
        Ok(()) | Err(FfmpegError::InvalidData) => Ok(()),
        Err(error) => Err(to_error(error.to_string())),
    }
}
