//! Clip window planning.
//!
//! Turns accepted event timestamps into `[start, end)` windows around each
//! event, clamped to the source duration.

use crate::detector::DetectionEvent;
use crate::error::ReelError;

/// Treatment of windows that overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WindowMerge {
    /// Keep one window per event, even when they overlap. Overlapping
    /// footage then appears twice in the reel.
    #[default]
    Keep,
    /// Merge overlapping or touching windows into their union.
    Union,
}

/// Time range cut from the source for one event (or, with
/// [`WindowMerge::Union`], for a run of events).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipWindow {
    /// Inclusive start in seconds.
    pub start: f64,
    /// Exclusive end in seconds.
    pub end: f64,
    /// Index of the first event this window covers.
    pub event_index: usize,
}

impl ClipWindow {
    /// Window length in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Expand events into clip windows.
///
/// Each event `t` (first clamped into `[0, duration]`) becomes
/// `[max(0, t - pre), min(duration, t + post)]`. Windows keep event order.
///
/// # Errors
///
/// [`ReelError::UnknownDuration`] when `duration` is `None`, zero or not
/// finite and there is at least one event.
/// [`ReelError::InvalidConfiguration`] for negative or non-finite margins.
///
/// # Example
///
/// ```
/// use killreel::{DetectionEvent, MatchScore, WindowMerge, plan_windows};
///
/// let score = MatchScore { score: 0.9, location: (0, 0) };
/// let events = [
///     DetectionEvent { timestamp: 0.5, score },
///     DetectionEvent { timestamp: 8.0, score },
/// ];
/// let windows = plan_windows(&events, Some(9.0), 2.0, 2.0, WindowMerge::Keep)?;
/// assert_eq!((windows[0].start, windows[0].end), (0.0, 2.5));
/// assert_eq!((windows[1].start, windows[1].end), (6.0, 9.0));
/// # Ok::<(), killreel::ReelError>(())
/// ```
pub fn plan_windows(
    events: &[DetectionEvent],
    duration: Option<f64>,
    pre_margin: f64,
    post_margin: f64,
    merge: WindowMerge,
) -> Result<Vec<ClipWindow>, ReelError> {
    if !(pre_margin.is_finite()
        && pre_margin >= 0.0
        && post_margin.is_finite()
        && post_margin >= 0.0)
    {
        return Err(ReelError::InvalidConfiguration(format!(
            "margins must be finite and non-negative (pre {pre_margin}, post {post_margin})"
        )));
    }
    if events.is_empty() {
        return Ok(Vec::new());
    }

    let duration = duration
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
        .ok_or(ReelError::UnknownDuration)?;

    let windows = events.iter().enumerate().map(|(event_index, event)| {
        let t = event.timestamp.clamp(0.0, duration);
        ClipWindow {
            start: (t - pre_margin).max(0.0),
            end: (t + post_margin).min(duration),
            event_index,
        }
    });

    let planned: Vec<ClipWindow> = match merge {
        WindowMerge::Keep => windows.collect(),
        WindowMerge::Union => {
            let mut merged: Vec<ClipWindow> = Vec::with_capacity(events.len());
            for window in windows {
                match merged.last_mut() {
                    Some(last) if window.start <= last.end => {
                        last.end = last.end.max(window.end);
                    }
                    _ => merged.push(window),
                }
            }
            merged
        }
    };

    for window in &planned {
        log::debug!(
            "Planned window for event {}: {:.3}s..{:.3}s",
            window.event_index,
            window.start,
            window.end
        );
    }
    Ok(planned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchScore;

    fn events(times: &[f64]) -> Vec<DetectionEvent> {
        times
            .iter()
            .map(|&timestamp| DetectionEvent {
                timestamp,
                score: MatchScore {
                    score: 1.0,
                    location: (0, 0),
                },
            })
            .collect()
    }

    fn bounds(windows: &[ClipWindow]) -> Vec<(f64, f64)> {
        windows.iter().map(|w| (w.start, w.end)).collect()
    }

    #[test]
    fn windows_surround_each_event() {
        let windows =
            plan_windows(&events(&[2.0, 8.0]), Some(10.0), 1.0, 1.0, WindowMerge::Keep).unwrap();
        assert_eq!(bounds(&windows), vec![(1.0, 3.0), (7.0, 9.0)]);
        assert_eq!(windows[1].event_index, 1);
    }

    #[test]
    fn windows_are_clamped_to_the_source() {
        let windows =
            plan_windows(&events(&[0.5, 9.5]), Some(10.0), 2.0, 2.0, WindowMerge::Keep).unwrap();
        assert_eq!(bounds(&windows), vec![(0.0, 2.5), (7.5, 10.0)]);
    }

    #[test]
    fn events_past_the_end_are_clamped_first() {
        let windows =
            plan_windows(&events(&[12.0]), Some(10.0), 1.0, 1.0, WindowMerge::Keep).unwrap();
        assert_eq!(bounds(&windows), vec![(9.0, 10.0)]);
    }

    #[test]
    fn overlapping_windows_are_kept_by_default() {
        let windows =
            plan_windows(&events(&[2.0, 4.0]), Some(10.0), 2.0, 2.0, WindowMerge::Keep).unwrap();
        assert_eq!(bounds(&windows), vec![(0.0, 4.0), (2.0, 6.0)]);
    }

    #[test]
    fn union_merges_overlapping_and_touching_windows() {
        let windows = plan_windows(
            &events(&[2.0, 4.0, 13.0]),
            Some(20.0),
            2.0,
            2.0,
            WindowMerge::Union,
        )
        .unwrap();
        assert_eq!(bounds(&windows), vec![(0.0, 6.0), (11.0, 15.0)]);
        assert_eq!(windows[1].event_index, 2);

        // (0, 4) and (4, 8) touch.
        let windows =
            plan_windows(&events(&[2.0, 6.0]), Some(20.0), 2.0, 2.0, WindowMerge::Union).unwrap();
        assert_eq!(bounds(&windows), vec![(0.0, 8.0)]);
    }

    #[test]
    fn unknown_duration_is_an_error() {
        let result = plan_windows(&events(&[1.0]), None, 1.0, 1.0, WindowMerge::Keep);
        assert!(matches!(result, Err(ReelError::UnknownDuration)));

        let result = plan_windows(&events(&[1.0]), Some(0.0), 1.0, 1.0, WindowMerge::Keep);
        assert!(matches!(result, Err(ReelError::UnknownDuration)));
    }

    #[test]
    fn no_events_need_no_duration() {
        let windows = plan_windows(&[], None, 1.0, 1.0, WindowMerge::Keep).unwrap();
        assert!(windows.is_empty());
    }

    #[test]
    fn negative_margin_is_rejected() {
        let result = plan_windows(&events(&[1.0]), Some(5.0), -1.0, 1.0, WindowMerge::Keep);
        assert!(matches!(result, Err(ReelError::InvalidConfiguration(_))));
    }
}
