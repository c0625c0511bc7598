//! Configuration for the acquisition manager.

use std::time::Duration;

/// Sample rate used when no transport has reported one yet.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Threshold level assigned to freshly discovered virtual devices.
pub const DEFAULT_THRESHOLD: i32 = 100;

/// Configuration for [`RecordingManager`](crate::RecordingManager).
///
/// Use [`AcquireConfig::default()`] for sensible defaults, or customize as
/// needed.
///
/// # Example
///
/// ```
/// use spikestream::AcquireConfig;
/// use std::time::Duration;
///
/// let config = AcquireConfig {
///     history_window: Duration::from_secs(30),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct AcquireConfig {
    /// Sample rate assumed before a transport is active.
    ///
    /// Live transports override this with their native rate at mode entry.
    /// Default: 44100 Hz
    pub sample_rate: u32,

    /// How much sample history each hardware channel retains.
    ///
    /// Older samples are silently overwritten; reads past the window return
    /// zeros. Default: 60 seconds
    pub history_window: Duration,

    /// Smoothing window (in samples) applied before threshold detection.
    ///
    /// 1 disables smoothing. Default: 1
    pub thresh_avg_count: usize,

    /// Maximum number of trigger timestamps kept in the rolling log.
    ///
    /// Default: 100
    pub trigger_log_capacity: usize,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            history_window: Duration::from_secs(60),
            thresh_avg_count: 1,
            trigger_log_capacity: 100,
        }
    }
}

impl AcquireConfig {
    /// Ring capacity in samples for one channel at the given rate.
    pub(crate) fn buffer_capacity(&self, sample_rate: u32) -> usize {
        (f64::from(sample_rate) * self.history_window.as_secs_f64()).max(1.0) as usize
    }
}
