//! Deterministic scripted transport for testing without hardware.

use std::collections::VecDeque;

use super::{DeviceDescriptor, SampleChunk, TransportDriver, TransportHandle};
use crate::TransportError;

/// A mock transport that serves pre-scripted samples.
///
/// This allows exercising the full acquisition path without actual
/// hardware, making it suitable for CI environments. Samples are queued per
/// channel ahead of time and handed out by `pull` in order, so a given
/// script always produces the same timeline.
///
/// # Example
///
/// ```
/// use spikestream::{MockDriver, TransportDriver};
///
/// let mut mock = MockDriver::new(10_000, 1);
///
/// // Queue 100ms of silence followed by a 440Hz tone
/// mock.generate_silence(100);
/// mock.generate_sine(440.0, 100);
///
/// let handle = mock.open(0).unwrap();
/// let chunk = mock.pull(handle, 500).unwrap();
/// assert_eq!(chunk.frame_count(), 500);
/// ```
pub struct MockDriver {
    sample_rate: u32,
    channels: u16,
    pending: Vec<VecDeque<i16>>,
    open: bool,
    fail_open: bool,
}

impl MockDriver {
    /// Creates a mock transport with the given format, exposing one device.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            pending: vec![VecDeque::new(); channels.max(1) as usize],
            open: false,
            fail_open: false,
        }
    }

    /// Makes every subsequent `open` fail, for error-path tests.
    pub fn fail_next_open(&mut self) {
        self.fail_open = true;
    }

    /// Queues silence on every channel for the given duration.
    pub fn generate_silence(&mut self, duration_ms: u64) {
        let frames = self.frames_for_duration(duration_ms);
        for ch in &mut self.pending {
            ch.extend(std::iter::repeat(0i16).take(frames));
        }
    }

    /// Queues a sine wave at the given frequency on every channel.
    pub fn generate_sine(&mut self, frequency: f64, duration_ms: u64) {
        let frames = self.frames_for_duration(duration_ms);
        let sample_rate = f64::from(self.sample_rate);

        for i in 0..frames {
            let t = i as f64 / sample_rate;
            let value = (2.0 * std::f64::consts::PI * frequency * t).sin();
            let sample = (value * 32767.0) as i16;
            for ch in &mut self.pending {
                ch.push_back(sample);
            }
        }
    }

    /// Queues deterministic white noise on every channel.
    pub fn generate_noise(&mut self, duration_ms: u64, amplitude: f64) {
        let frames = self.frames_for_duration(duration_ms);
        let amplitude = (amplitude * 32767.0) as i16;

        // LCG keeps the "random" script reproducible run to run.
        let mut seed: u32 = 12345;
        for _ in 0..frames {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let random = ((seed >> 16) as i32 - 32768) as i16;
            let sample = (i32::from(random) * i32::from(amplitude) / 32767) as i16;
            for ch in &mut self.pending {
                ch.push_back(sample);
            }
        }
    }

    /// Queues raw samples on every channel.
    pub fn add_samples(&mut self, samples: &[i16]) {
        for ch in &mut self.pending {
            ch.extend(samples.iter().copied());
        }
    }

    /// Queues raw samples on a single channel.
    ///
    /// Channels with uneven backlogs deliver short chunks; `pull` hands out
    /// whole frames only.
    pub fn add_channel_samples(&mut self, channel: usize, samples: &[i16]) {
        self.pending[channel].extend(samples.iter().copied());
    }

    /// Frames currently queued on the emptiest channel.
    pub fn queued_frames(&self) -> usize {
        self.pending.iter().map(VecDeque::len).min().unwrap_or(0)
    }

    fn frames_for_duration(&self, duration_ms: u64) -> usize {
        (u64::from(self.sample_rate) * duration_ms / 1000) as usize
    }
}

impl TransportDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn devices(&self) -> Vec<DeviceDescriptor> {
        vec![DeviceDescriptor {
            id: 0,
            name: "mock device".to_string(),
            channels: self.channels,
            bytes_per_sample: 2,
        }]
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open(&mut self, device_id: usize) -> Result<TransportHandle, TransportError> {
        if device_id != 0 {
            return Err(TransportError::NoSuchDevice { device_id });
        }
        if self.fail_open {
            self.fail_open = false;
            return Err(TransportError::open_failed("scripted failure"));
        }
        self.open = true;
        Ok(TransportHandle::from_raw(1))
    }

    fn pull(
        &mut self,
        handle: TransportHandle,
        max_frames: usize,
    ) -> Result<SampleChunk, TransportError> {
        if !self.open {
            return Err(TransportError::StaleHandle(handle.raw()));
        }

        let frames = self.queued_frames().min(max_frames);
        let channels = self
            .pending
            .iter_mut()
            .map(|ch| ch.drain(..frames).collect())
            .collect();
        Ok(SampleChunk::new(channels))
    }

    fn close(&mut self, _handle: TransportHandle) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_silence() {
        let mut mock = MockDriver::new(16_000, 1);
        mock.generate_silence(100);

        assert_eq!(mock.queued_frames(), 1600);
        let handle = mock.open(0).unwrap();
        let chunk = mock.pull(handle, 1600).unwrap();
        assert!(chunk.channel(0).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_mock_sine_has_both_signs() {
        let mut mock = MockDriver::new(16_000, 1);
        mock.generate_sine(440.0, 100);

        let handle = mock.open(0).unwrap();
        let chunk = mock.pull(handle, 1600).unwrap();
        assert!(chunk.channel(0).iter().any(|&s| s > 0));
        assert!(chunk.channel(0).iter().any(|&s| s < 0));
    }

    #[test]
    fn test_mock_short_tick() {
        let mut mock = MockDriver::new(16_000, 1);
        mock.add_samples(&[1, 2, 3]);

        let handle = mock.open(0).unwrap();
        let chunk = mock.pull(handle, 100).unwrap();
        assert_eq!(chunk.frame_count(), 3);

        let chunk = mock.pull(handle, 100).unwrap();
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_mock_per_channel_scripts() {
        let mut mock = MockDriver::new(16_000, 2);
        mock.add_channel_samples(0, &[1, 2]);
        mock.add_channel_samples(1, &[10, 20, 30]);

        let handle = mock.open(0).unwrap();
        let chunk = mock.pull(handle, 100).unwrap();
        // Whole frames only: limited by the shorter channel.
        assert_eq!(chunk.frame_count(), 2);
        assert_eq!(chunk.channel(1), &[10, 20]);
    }

    #[test]
    fn test_mock_open_failure() {
        let mut mock = MockDriver::new(16_000, 1);
        mock.fail_next_open();
        assert!(mock.open(0).is_err());
        // The failure is one-shot.
        assert!(mock.open(0).is_ok());
    }

    #[test]
    fn test_mock_unknown_device() {
        let mut mock = MockDriver::new(16_000, 1);
        assert!(matches!(
            mock.open(3),
            Err(TransportError::NoSuchDevice { device_id: 3 })
        ));
    }

    #[test]
    fn test_mock_pull_before_open() {
        let mut mock = MockDriver::new(16_000, 1);
        let err = mock.pull(TransportHandle::from_raw(1), 10);
        assert!(matches!(err, Err(TransportError::StaleHandle(1))));
    }

    #[test]
    fn test_mock_noise_is_deterministic() {
        let mut a = MockDriver::new(16_000, 1);
        let mut b = MockDriver::new(16_000, 1);
        a.generate_noise(50, 0.5);
        b.generate_noise(50, 0.5);

        let ha = a.open(0).unwrap();
        let hb = b.open(0).unwrap();
        let ca = a.pull(ha, 800).unwrap();
        let cb = b.pull(hb, 800).unwrap();
        assert_eq!(ca.channel(0), cb.channel(0));
    }
}
