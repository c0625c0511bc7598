//! Transport abstraction between the acquisition core and signal sources.
//!
//! A [`TransportDriver`] is any source of raw samples: a sound-card input,
//! a serial-port microcontroller stream, a HID-USB acquisition board, or a
//! test double. The core pulls from the active driver once per tick; drivers
//! never push.
//!
//! The crate ships three implementations:
//!
//! - [`AudioDriver`]: live capture from a CPAL input device
//! - [`FilePlayback`]: WAV playback driven by external seeking
//! - [`MockDriver`]: deterministic scripted source for tests
//!
//! Serial and HID drivers live outside this crate; they implement
//! [`TransportDriver`] and are handed to
//! [`RecordingManager::init_serial`](crate::RecordingManager::init_serial) /
//! [`init_hid`](crate::RecordingManager::init_hid) at mode entry.

mod audio;
mod chunk;
mod file;
mod mock;

pub use audio::{list_input_devices, AudioDriver};
pub use chunk::SampleChunk;
pub use file::FilePlayback;
pub use mock::MockDriver;

use crate::TransportError;

/// Opaque per-device handle returned by [`TransportDriver::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle(pub(crate) u32);

impl TransportHandle {
    /// Creates a handle from a raw id. Drivers assign these as they like;
    /// the core only stores and returns them.
    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// The raw id.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Description of one physical device exposed by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Device id within this transport's topology.
    pub id: usize,
    /// Human-readable name (port, board, or sound-card name).
    pub name: String,
    /// Number of hardware channels.
    pub channels: u16,
    /// Native sample width in bytes (1 for 8-bit boards, 2 for 16-bit).
    pub bytes_per_sample: u8,
}

/// A pull-based source of raw samples.
///
/// # Contract
///
/// - `open` acquires the hardware resource for one device and must fail
///   fast; it is called on the first reference to the device, not at mode
///   entry.
/// - `pull` returns up to `max_frames` frames per channel. Returning fewer
///   is a short tick and must not be reported as an error. `pull` must not
///   block on hardware.
/// - `close` releases the resource; it is called synchronously when the
///   last reference to the device is dropped, and must be safe to call with
///   a handle that already failed.
pub trait TransportDriver {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// The devices this transport currently exposes.
    fn devices(&self) -> Vec<DeviceDescriptor>;

    /// Native sample rate of this transport in Hz.
    fn sample_rate(&self) -> u32;

    /// Acquires the hardware resource for `device_id`.
    fn open(&mut self, device_id: usize) -> Result<TransportHandle, TransportError>;

    /// Pulls up to `max_frames` frames per channel from an open device.
    fn pull(
        &mut self,
        handle: TransportHandle,
        max_frames: usize,
    ) -> Result<SampleChunk, TransportError>;

    /// Releases the resource behind `handle`.
    fn close(&mut self, handle: TransportHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_raw_roundtrip() {
        let handle = TransportHandle::from_raw(42);
        assert_eq!(handle.raw(), 42);
        assert_eq!(handle, TransportHandle::from_raw(42));
    }

    #[test]
    fn test_descriptor_equality() {
        let a = DeviceDescriptor {
            id: 0,
            name: "board".to_string(),
            channels: 2,
            bytes_per_sample: 2,
        };
        assert_eq!(a, a.clone());
    }
}
