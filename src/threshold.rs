//! Threshold crossing detection with hysteresis and smoothing.
//!
//! The detector fires when the smoothed signal passes the threshold level,
//! then stays quiet until the signal retreats past the re-arm level (half
//! the threshold). The hysteresis band suppresses chatter around the level;
//! the moving average suppresses single-sample noise spikes.
//!
//! Detection is fully deterministic: the same sample sequence with the same
//! configuration always produces the same crossings.

use std::collections::VecDeque;

/// Stateful crossing detector for one virtual device.
#[derive(Debug)]
pub struct ThresholdDetector {
    upper: i32,
    lower: i32,
    avg_count: usize,
    window: VecDeque<i16>,
    window_sum: i64,
    armed: bool,
}

impl ThresholdDetector {
    /// Creates a detector for the given threshold level.
    ///
    /// A non-negative level fires on upward crossings, a negative level on
    /// downward crossings; the re-arm level is half the threshold in both
    /// cases. `avg_count` is the smoothing window in samples (1 disables
    /// smoothing).
    pub fn new(level: i32, avg_count: usize) -> Self {
        Self {
            upper: level,
            lower: level / 2,
            avg_count: avg_count.max(1),
            window: VecDeque::new(),
            window_sum: 0,
            armed: true,
        }
    }

    /// The hysteresis pair in effect, as recorded into spike trains.
    pub fn threshold_pair(&self) -> (i16, i16) {
        (
            self.upper.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
            self.lower.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
        )
    }

    /// Feeds one raw sample; returns `true` on a crossing.
    pub fn process(&mut self, sample: i16) -> bool {
        self.window.push_back(sample);
        self.window_sum += i64::from(sample);
        if self.window.len() > self.avg_count {
            if let Some(old) = self.window.pop_front() {
                self.window_sum -= i64::from(old);
            }
        }
        let avg = self.window_sum / self.window.len() as i64;

        if self.upper >= 0 {
            if self.armed && avg > i64::from(self.upper) {
                self.armed = false;
                return true;
            }
            if !self.armed && avg < i64::from(self.lower) {
                self.armed = true;
            }
        } else {
            if self.armed && avg < i64::from(self.upper) {
                self.armed = false;
                return true;
            }
            if !self.armed && avg > i64::from(self.lower) {
                self.armed = true;
            }
        }
        false
    }

    /// Feeds a slice of samples; returns the indices that crossed.
    pub fn process_slice(&mut self, samples: &[i16]) -> Vec<usize> {
        samples
            .iter()
            .enumerate()
            .filter_map(|(i, &s)| self.process(s).then_some(i))
            .collect()
    }
}
