//! Error types for spikestream.
//!
//! Errors are split into two surfaces:
//! - **Manager errors** ([`AcquireError`]): returned by [`RecordingManager`]
//!   calls - failed mode entry, unknown virtual devices, bad configuration
//! - **Driver errors** ([`TransportError`]): returned by [`TransportDriver`]
//!   implementations and mapped into [`AcquireError`] at the mode boundary
//!
//! Ring-buffer overwrite of unread history is *not* an error - it is the
//! designed behavior of the fixed-capacity store. A transport delivering
//! fewer samples than requested is a short tick, also not an error.
//!
//! [`RecordingManager`]: crate::RecordingManager
//! [`TransportDriver`]: crate::TransportDriver

/// Fatal errors returned from the acquisition manager.
///
/// A failed mode entry always leaves the manager in `Idle` with all
/// refcounts at zero; a failed query or mutator leaves state unchanged.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// A virtual device index outside the registry was passed.
    #[error("unknown virtual device index: {index}")]
    InvalidVirtualDevice {
        /// The index that wasn't found.
        index: usize,
    },

    /// The backing physical device could not be opened.
    #[error("device {device_id} could not be opened: {reason}")]
    DeviceOpenFailed {
        /// Physical device id within the active topology.
        device_id: usize,
        /// Why the open failed.
        reason: String,
    },

    /// A transport driver reported no devices during the mode handshake.
    #[error("transport '{transport}' reported no devices")]
    NoDevices {
        /// Name of the transport that failed the handshake.
        transport: String,
    },

    /// The requested sample rate is invalid (zero).
    #[error("invalid sample rate: {requested}")]
    InvalidSampleRate {
        /// The rejected rate.
        requested: u32,
    },

    /// The call is only valid in file playback mode.
    #[error("operation requires file mode")]
    NotInFileMode,

    /// A recorded file could not be loaded.
    #[error("failed to load {path}: {reason}")]
    FileLoadFailed {
        /// Path of the file that failed to load.
        path: String,
        /// Why the load failed.
        reason: String,
    },

    /// Metadata could not be decoded.
    #[error("metadata decode failed: {0}")]
    MetadataDecode(String),

    /// An error from the underlying audio backend (CPAL).
    #[error("audio backend error: {0}")]
    BackendError(String),
}

/// Errors reported by a [`TransportDriver`](crate::TransportDriver).
///
/// These stay inside the driver seam; the manager maps `open` failures to
/// [`AcquireError::DeviceOpenFailed`] and treats `pull` failures as an
/// empty tick after logging.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The requested physical device id does not exist in this transport.
    #[error("no such device: {device_id}")]
    NoSuchDevice {
        /// The device id that wasn't found.
        device_id: usize,
    },

    /// The hardware or OS resource could not be acquired.
    #[error("open failed: {reason}")]
    OpenFailed {
        /// Description of the failure.
        reason: String,
    },

    /// A pull was issued against a handle that is not open.
    #[error("handle {0} is not open")]
    StaleHandle(u32),

    /// The underlying stream died and cannot deliver more samples.
    #[error("stream lost: {reason}")]
    StreamLost {
        /// Description of the failure.
        reason: String,
    },

    /// File I/O error in the playback transport.
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not in a format the playback transport understands.
    #[error("bad file format: {reason}")]
    BadFormat {
        /// What was wrong with the file.
        reason: String,
    },
}

impl TransportError {
    /// Creates an open failure with the given reason.
    pub fn open_failed(reason: impl Into<String>) -> Self {
        Self::OpenFailed {
            reason: reason.into(),
        }
    }

    /// Creates a bad-format error with the given reason.
    pub fn bad_format(reason: impl Into<String>) -> Self {
        Self::BadFormat {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_error_display() {
        let err = AcquireError::InvalidVirtualDevice { index: 7 };
        assert_eq!(err.to_string(), "unknown virtual device index: 7");
    }

    #[test]
    fn test_device_open_failed_display() {
        let err = AcquireError::DeviceOpenFailed {
            device_id: 0,
            reason: "port busy".to_string(),
        };
        assert_eq!(err.to_string(), "device 0 could not be opened: port busy");
    }

    #[test]
    fn test_transport_error_helpers() {
        let err = TransportError::open_failed("no permission");
        assert_eq!(err.to_string(), "open failed: no permission");

        let err = TransportError::bad_format("missing RIFF header");
        assert_eq!(err.to_string(), "bad file format: missing RIFF header");
    }

    #[test]
    fn test_transport_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TransportError = io.into();
        assert!(err.to_string().contains("gone"));
    }
}
