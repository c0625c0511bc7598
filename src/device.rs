//! Physical device records and their arena.
//!
//! A [`Device`] owns everything tied to one open hardware resource: the
//! transport handle, one [`SampleBuffer`] per hardware channel, the
//! reference count from the virtual-device registry, and the rolling
//! DC-bias accumulator. Devices are created on the first reference and torn
//! down synchronously when the last reference is dropped.

use std::collections::HashMap;

use crate::buffer::SampleBuffer;
use crate::transport::{SampleChunk, TransportHandle};

/// One open physical device.
#[derive(Debug)]
pub struct Device {
    pub(crate) handle: TransportHandle,
    pub(crate) sample_buffers: Vec<SampleBuffer>,
    pub(crate) ref_count: u32,
    dc_bias_sum: Vec<i64>,
    dc_bias_num: i64,
    dc_decay_limit: i64,
    channels: u16,
    #[allow(dead_code)] // surfaced through recording_devices(), kept for mixed-width boards
    bytes_per_sample: u8,
}

impl Device {
    /// Creates a device whose buffers start writing at `start_pos`.
    ///
    /// `buffer_capacity` is per channel; `dc_decay_limit` bounds the DC
    /// accumulator (the sums and count are halved past it).
    pub fn new(
        handle: TransportHandle,
        channels: u16,
        bytes_per_sample: u8,
        start_pos: i64,
        buffer_capacity: usize,
        dc_decay_limit: i64,
    ) -> Self {
        let channels = channels.max(1);
        Self {
            handle,
            sample_buffers: (0..channels)
                .map(|_| SampleBuffer::new(start_pos, buffer_capacity))
                .collect(),
            ref_count: 0,
            dc_bias_sum: vec![0; channels as usize],
            // Starts at 1 so the mean is defined before any samples arrive.
            dc_bias_num: 1,
            dc_decay_limit: dc_decay_limit.max(1),
            channels,
            bytes_per_sample,
        }
    }

    /// Returns `true` while any virtual device references this one.
    pub fn needed(&self) -> bool {
        self.ref_count > 0
    }

    /// The channel's ring buffer.
    pub fn buffer(&self, channel: usize) -> &SampleBuffer {
        &self.sample_buffers[channel]
    }

    /// Rolling DC bias for one channel.
    pub fn dc_bias(&self, channel: usize) -> i16 {
        (self.dc_bias_sum[channel] / self.dc_bias_num) as i16
    }

    /// Appends a pulled chunk to the channel buffers and folds it into the
    /// DC accumulator. Returns the number of frames appended.
    pub fn append_chunk(&mut self, chunk: &SampleChunk) -> usize {
        let frames = chunk.frame_count();
        if frames == 0 {
            return 0;
        }

        for (ch, samples) in chunk.iter().enumerate().take(self.channels as usize) {
            self.sample_buffers[ch].add_data(samples);
            self.dc_bias_sum[ch] += samples.iter().map(|&s| i64::from(s)).sum::<i64>();
        }
        self.dc_bias_num += frames as i64;

        if self.dc_bias_num > self.dc_decay_limit {
            // Exponential forgetting keeps the mean adaptive without
            // unbounded accumulation.
            self.dc_bias_num /= 2;
            for sum in &mut self.dc_bias_sum {
                *sum /= 2;
            }
        }

        frames
    }
}

/// Storage for open devices, keyed by physical device id.
///
/// Virtual devices store the id, never a reference, so device teardown can
/// never leave a dangling borrow.
#[derive(Debug, Default)]
pub struct DeviceArena {
    devices: HashMap<usize, Device>,
}

impl DeviceArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// The device for `id`, if open.
    pub fn get(&self, id: usize) -> Option<&Device> {
        self.devices.get(&id)
    }

    /// Mutable access to the device for `id`.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Device> {
        self.devices.get_mut(&id)
    }

    /// Inserts a freshly opened device.
    pub fn insert(&mut self, id: usize, device: Device) {
        debug_assert!(!self.devices.contains_key(&id));
        self.devices.insert(id, device);
    }

    /// Removes and returns the device for `id`.
    pub fn remove(&mut self, id: usize) -> Option<Device> {
        self.devices.remove(&id)
    }

    /// Iterates over `(id, device)` pairs mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Device)> {
        self.devices.iter_mut().map(|(&id, d)| (id, d))
    }

    /// Drains every device, handing each to `close` for handle release.
    pub fn drain_with(&mut self, mut close: impl FnMut(Device)) {
        for (_, device) in self.devices.drain() {
            close(device);
        }
    }

    /// Number of open devices.
    #[allow(dead_code)] // used in tests and by debug displays
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` when no device is open.
    #[allow(dead_code)] // used in tests and by debug displays
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_device() -> Device {
        Device::new(TransportHandle::from_raw(1), 2, 2, 0, 64, 1000)
    }

    #[test]
    fn test_append_fills_buffers() {
        let mut device = test_device();
        let chunk = SampleChunk::new(vec![vec![1, 2, 3], vec![10, 20, 30]]);

        assert_eq!(device.append_chunk(&chunk), 3);
        assert_eq!(device.buffer(0).pos(), 3);
        assert_eq!(device.buffer(1).sample_at(1), 20);
    }

    #[test]
    fn test_dc_bias_tracks_offset() {
        let mut device = test_device();
        // Constant +100 offset on channel 0, zero-mean on channel 1.
        let chunk = SampleChunk::new(vec![vec![100; 500], vec![0; 500]]);
        device.append_chunk(&chunk);

        // num = 501 (starts at 1), sum = 50_000.
        assert_eq!(device.dc_bias(0), (50_000 / 501) as i16);
        assert_eq!(device.dc_bias(1), 0);
    }

    #[test]
    fn test_dc_bias_decay_bounds_count() {
        let mut device = Device::new(TransportHandle::from_raw(1), 1, 2, 0, 64, 100);
        for _ in 0..10 {
            let chunk = SampleChunk::new(vec![vec![50; 60]]);
            device.append_chunk(&chunk);
        }
        // The count halves whenever it passes the limit, so the bias stays
        // close to the true offset instead of freezing.
        let bias = device.dc_bias(0);
        assert!((45..=50).contains(&bias), "bias drifted to {bias}");
    }

    #[test]
    fn test_empty_chunk_is_ignored() {
        let mut device = test_device();
        assert_eq!(device.append_chunk(&SampleChunk::empty(2)), 0);
        assert_eq!(device.buffer(0).pos(), 0);
    }

    #[test]
    fn test_arena_insert_remove() {
        let mut arena = DeviceArena::new();
        assert!(arena.is_empty());

        arena.insert(3, test_device());
        assert_eq!(arena.len(), 1);
        assert!(arena.get(3).is_some());
        assert!(arena.get(0).is_none());

        let removed = arena.remove(3).unwrap();
        assert_eq!(removed.handle, TransportHandle::from_raw(1));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_arena_drain_closes_all() {
        let mut arena = DeviceArena::new();
        arena.insert(0, test_device());
        arena.insert(1, test_device());

        let mut closed = 0;
        arena.drain_with(|_| closed += 1);
        assert_eq!(closed, 2);
        assert!(arena.is_empty());
    }
}
