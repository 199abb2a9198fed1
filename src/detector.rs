//! Threshold and cooldown over per-frame match scores.
//!
//! [`EventDetector`] is the scan's state machine. Its only state is the
//! timestamp of the last accepted event. A sampled frame becomes a
//! [`DetectionEvent`] iff its score reaches the threshold and it lies more
//! than the cooldown after the previous event. Because the rule is applied
//! at insertion, accepted timestamps are strictly increasing and pairwise
//! further apart than the cooldown.

use crate::error::MatchError;
use crate::matcher::MatchScore;

/// An accepted occurrence of the template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionEvent {
    /// Source time in seconds.
    pub timestamp: f64,
    /// Match that triggered the event.
    pub score: MatchScore,
}

/// What the detector decided for one sampled frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Score reached the threshold outside the cooldown; a new event.
    Accepted(MatchScore),
    /// Score reached the threshold but the previous event is too recent.
    CoolingDown(MatchScore),
    /// Score stayed below the threshold.
    BelowThreshold(MatchScore),
    /// Matching failed for this frame; treated as no match.
    MatchFailed(MatchError),
}

impl FrameOutcome {
    /// `true` only for [`FrameOutcome::Accepted`].
    pub fn is_accepted(&self) -> bool {
        matches!(self, FrameOutcome::Accepted(_))
    }
}

/// Debouncing event detector.
///
/// # Example
///
/// ```
/// use killreel::{EventDetector, MatchScore};
///
/// let hit = MatchScore { score: 0.9, location: (10, 10) };
/// let mut detector = EventDetector::new(0.8, 3.0);
/// assert!(detector.observe(2.0, Ok(hit)).is_accepted());
/// assert!(!detector.observe(2.5, Ok(hit)).is_accepted());
/// assert!(detector.observe(8.0, Ok(hit)).is_accepted());
///
/// let times: Vec<f64> = detector.finish().iter().map(|e| e.timestamp).collect();
/// assert_eq!(times, vec![2.0, 8.0]);
/// ```
#[derive(Debug, Clone)]
pub struct EventDetector {
    threshold: f32,
    cooldown_seconds: f64,
    last_accepted: Option<f64>,
    events: Vec<DetectionEvent>,
    match_failures: u64,
}

impl EventDetector {
    /// Create a detector with no accepted events.
    pub fn new(threshold: f32, cooldown_seconds: f64) -> Self {
        Self {
            threshold,
            cooldown_seconds,
            last_accepted: None,
            events: Vec::new(),
            match_failures: 0,
        }
    }

    /// Apply the transition rule to one sampled frame.
    pub fn observe(
        &mut self,
        timestamp: f64,
        matched: Result<MatchScore, MatchError>,
    ) -> FrameOutcome {
        let score = match matched {
            Ok(score) => score,
            Err(error) => {
                self.match_failures += 1;
                log::debug!("No match at {timestamp:.3}s: {error}");
                return FrameOutcome::MatchFailed(error);
            }
        };

        if score.score < self.threshold {
            return FrameOutcome::BelowThreshold(score);
        }

        let clear_of_cooldown = self
            .last_accepted
            .is_none_or(|last| timestamp - last > self.cooldown_seconds);
        if !clear_of_cooldown {
            return FrameOutcome::CoolingDown(score);
        }

        log::info!(
            "Found template at {timestamp:.3}s (score {:.2}, at {:?})",
            score.score,
            score.location
        );
        self.last_accepted = Some(timestamp);
        self.events.push(DetectionEvent { timestamp, score });
        FrameOutcome::Accepted(score)
    }

    /// Events accepted so far, in order.
    pub fn events(&self) -> &[DetectionEvent] {
        &self.events
    }

    /// Frames whose matching failed.
    pub fn match_failures(&self) -> u64 {
        self.match_failures
    }

    /// End the scan and take the final event list.
    pub fn finish(self) -> Vec<DetectionEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(score: f32) -> Result<MatchScore, MatchError> {
        Ok(MatchScore {
            score,
            location: (0, 0),
        })
    }

    #[test]
    fn below_threshold_is_not_accepted() {
        let mut detector = EventDetector::new(0.8, 3.0);
        assert!(matches!(
            detector.observe(1.0, scored(0.79)),
            FrameOutcome::BelowThreshold(_)
        ));
        assert!(detector.events().is_empty());
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut detector = EventDetector::new(0.8, 3.0);
        assert!(detector.observe(1.0, scored(0.8)).is_accepted());
    }

    #[test]
    fn cooldown_collapses_consecutive_hits() {
        let mut detector = EventDetector::new(0.7, 3.0);
        let outcomes: Vec<bool> = [2.0, 2.1, 2.5, 4.9, 5.0, 5.01]
            .iter()
            .map(|&t| detector.observe(t, scored(0.95)).is_accepted())
            .collect();

        // 5.0 - 2.0 is exactly the cooldown, which is not enough.
        assert_eq!(outcomes, vec![true, false, false, false, false, true]);
    }

    #[test]
    fn cooldown_is_measured_from_last_accepted_event() {
        let mut detector = EventDetector::new(0.7, 3.0);
        for t in [0.0, 1.0, 2.0, 3.0, 3.5, 4.0, 6.0, 7.0] {
            detector.observe(t, scored(0.9));
        }
        let times: Vec<f64> = detector.finish().iter().map(|e| e.timestamp).collect();
        assert_eq!(times, vec![0.0, 3.5, 7.0]);
    }

    #[test]
    fn match_errors_count_as_no_match() {
        let mut detector = EventDetector::new(0.7, 3.0);
        let outcome = detector.observe(1.0, Err(MatchError::EmptyFrame));
        assert_eq!(outcome, FrameOutcome::MatchFailed(MatchError::EmptyFrame));
        assert!(detector.observe(1.5, scored(0.9)).is_accepted());
        assert_eq!(detector.match_failures(), 1);
    }

    #[test]
    fn non_increasing_timestamps_are_never_accepted_twice() {
        let mut detector = EventDetector::new(0.7, 0.0);
        assert!(detector.observe(5.0, scored(0.9)).is_accepted());
        assert!(!detector.observe(5.0, scored(0.9)).is_accepted());
        assert!(!detector.observe(4.0, scored(0.9)).is_accepted());
    }
}
