//! # spikestream
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Acquisition-and-buffering core for neural-signal recording instruments.
//!
//! `spikestream` multiplexes several physical signal transports - sound-card
//! input, serial-port microcontroller streams, HID-USB acquisition boards,
//! and pre-recorded files - into a uniform set of virtual devices sharing
//! one continuously advancing sample timeline, with ring-buffered history,
//! threshold-based event detection, and envelope queries for waveform
//! rendering.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spikestream::{ManagerEvent, RecordingManager};
//!
//! let mut manager = RecordingManager::new();
//! manager.on_event(|e| tracing::info!(?e, "acquisition event"));
//!
//! // Capture from the default sound-card input
//! manager.init_live_audio()?;
//! manager.inc_ref(0)?;                 // reference channel 0
//! manager.set_selected_vdevice(0)?;
//! manager.set_thresh_mode(true);
//!
//! loop {
//!     manager.advance(20);             // once per 20ms scheduling tick
//!     let envelope = manager.get_samples_envelope(0, manager.pos() - 4410, 441, 10)?;
//!     // hand envelope to the waveform renderer...
//! }
//! ```
//!
//! ## Architecture
//!
//! Data flows one direction per tick:
//!
//! - **Transport callback**: a high-priority producer (e.g. the CPAL audio
//!   callback) pushes raw samples into a lock-free SPSC ring and never blocks
//! - **Dispatcher**: [`RecordingManager::advance`] pulls from the active
//!   transport, appends to per-channel [`SampleBuffer`]s, advances the shared
//!   position clock, and runs threshold detection
//! - **Query side**: `get_data` and the envelope queries read the buffered
//!   history without participating in the tick
//!
//! Serial and HID drivers live outside this crate and plug in through the
//! [`TransportDriver`] trait.

#![warn(missing_docs)]
// Signal code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod buffer;
mod config;
mod device;
mod error;
mod event;
#[cfg(feature = "firmware-update")]
pub mod firmware;
mod manager;
mod metadata;
mod threshold;
pub mod transport;

pub use buffer::SampleBuffer;
pub use config::{AcquireConfig, DEFAULT_SAMPLE_RATE, DEFAULT_THRESHOLD};
pub use error::{AcquireError, TransportError};
pub use event::{event_callback, EventCallback, ManagerEvent};
pub use manager::{RecordingManager, VirtualDevice, INVALID_VIRTUAL_DEVICE_INDEX};
pub use metadata::{ChannelEntry, Marker, MetadataChunk, SpikeTrain};
pub use threshold::ThresholdDetector;
pub use transport::{
    list_input_devices, AudioDriver, DeviceDescriptor, FilePlayback, MockDriver, SampleChunk,
    TransportDriver, TransportHandle,
};

// Re-export firmware types when the capability is enabled
#[cfg(feature = "firmware-update")]
pub use firmware::{FirmwareImage, FirmwareSource, UpdateStage};
