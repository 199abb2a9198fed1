//! Internal helpers for timestamps and pixel buffers.

use ffmpeg_next::{Rational, frame::Video as VideoFrame};

/// Copy plane 0 of a packed video frame into a tightly-packed buffer.
///
/// `bytes_per_pixel` is 1 for GRAY8 and 3 for RGB24.
pub(crate) fn frame_to_buffer(
    video_frame: &VideoFrame,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Vec<u8> {
    let stride = video_frame.stride(0);
    let row_len = width as usize * bytes_per_pixel;
    let data = video_frame.data(0);

    if stride == row_len {
        data[..row_len * height as usize].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_len * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            buffer.extend_from_slice(&data[start..start + row_len]);
        }
        buffer
    }
}

/// Rescale a stream timestamp to seconds.
pub(crate) fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

/// Rescale seconds to a timestamp in `time_base`, rounding to nearest.
pub(crate) fn seconds_to_pts(seconds: f64, time_base: Rational) -> i64 {
    (seconds * time_base.denominator() as f64 / time_base.numerator() as f64).round() as i64
}

/// Seconds to a container-level seek target in `AV_TIME_BASE` (microseconds).
pub(crate) fn seconds_to_seek_timestamp(seconds: f64) -> i64 {
    (seconds.max(0.0) * 1_000_000.0) as i64
}

/// `true` when a time base can be used for rescaling.
pub(crate) fn is_usable_time_base(time_base: Rational) -> bool {
    time_base.numerator() > 0 && time_base.denominator() > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_round_trip_in_ninety_khz() {
        let time_base = Rational::new(1, 90_000);
        assert_eq!(seconds_to_pts(2.0, time_base), 180_000);
        assert!((pts_to_seconds(45_000, time_base) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn seek_targets_are_microseconds_and_never_negative() {
        assert_eq!(seconds_to_seek_timestamp(1.5), 1_500_000);
        assert_eq!(seconds_to_seek_timestamp(-3.0), 0);
    }

    #[test]
    fn zero_time_base_is_rejected() {
        assert!(!is_usable_time_base(Rational::new(0, 1)));
        assert!(is_usable_time_base(Rational::new(1001, 30_000)));
    }
}
