//! Annotation ledgers and the metadata interchange chunk.
//!
//! [`MetadataChunk`] is the contract with the file collaborator: everything
//! needed to reproduce virtual-device, threshold, marker, and spike-train
//! state after a save/reload cycle. The round trip must be lossless - a
//! reloaded file yields bit-identical markers, threshold pairs, and spike
//! timestamps.

use serde::{Deserialize, Serialize};

use crate::AcquireError;

/// A user- or protocol-inserted annotation on the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    /// Annotation label.
    pub label: String,
    /// Absolute sample position.
    pub position: i64,
}

/// An ordered log of detected spike timestamps plus the threshold pair that
/// produced them.
///
/// Created from a virtual device's live threshold state; the engine appends
/// to it while acquisition runs; it persists until explicitly removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpikeTrain {
    /// Absolute sample positions of detected spikes, in order.
    pub spikes: Vec<i64>,
    /// Upper (firing) threshold at detection time.
    pub upper_thresh: i16,
    /// Lower (re-arm) threshold at detection time.
    pub lower_thresh: i16,
    /// Display color index.
    pub color: i32,
    /// Virtual device this train was created from.
    pub source: usize,
}

/// Per-virtual-device configuration carried through the metadata chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    /// Display name.
    pub name: String,
    /// Threshold level.
    pub threshold: i32,
    /// Display range bound.
    pub bound: i32,
    /// Whether the channel was enabled.
    pub enabled: bool,
}

/// Snapshot of the state a saved recording must reproduce on reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataChunk {
    /// Sample rate of the recording.
    pub sample_rate: u32,
    /// One entry per virtual device, in registry order.
    pub channels: Vec<ChannelEntry>,
    /// Marker ledger.
    pub markers: Vec<Marker>,
    /// Spike-train ledger.
    pub spike_trains: Vec<SpikeTrain>,
}

impl MetadataChunk {
    /// Serializes the chunk to the JSON interchange form.
    pub fn to_json(&self) -> String {
        // Serialization of plain owned data cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses a chunk from its JSON interchange form.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::MetadataDecode`] on malformed input.
    pub fn from_json(json: &str) -> Result<Self, AcquireError> {
        serde_json::from_str(json).map_err(|e| AcquireError::MetadataDecode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk() -> MetadataChunk {
        MetadataChunk {
            sample_rate: 10_000,
            channels: vec![
                ChannelEntry {
                    name: "Channel 1".to_string(),
                    threshold: 100,
                    bound: 0,
                    enabled: true,
                },
                ChannelEntry {
                    name: "Channel 2".to_string(),
                    threshold: -60,
                    bound: 2,
                    enabled: false,
                },
            ],
            markers: vec![
                Marker {
                    label: "stim on".to_string(),
                    position: 1234,
                },
                Marker {
                    label: "stim off".to_string(),
                    position: 9876,
                },
            ],
            spike_trains: vec![SpikeTrain {
                spikes: vec![100, 220, 355],
                upper_thresh: 120,
                lower_thresh: 60,
                color: 1,
                source: 0,
            }],
        }
    }

    #[test]
    fn test_json_round_trip_is_lossless() {
        let chunk = sample_chunk();
        let reloaded = MetadataChunk::from_json(&chunk.to_json()).unwrap();
        assert_eq!(chunk, reloaded);
    }

    #[test]
    fn test_spike_timestamps_bit_identical() {
        let chunk = sample_chunk();
        let reloaded = MetadataChunk::from_json(&chunk.to_json()).unwrap();
        assert_eq!(reloaded.spike_trains[0].spikes, vec![100, 220, 355]);
        assert_eq!(reloaded.spike_trains[0].upper_thresh, 120);
        assert_eq!(reloaded.spike_trains[0].lower_thresh, 60);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            MetadataChunk::from_json("not json"),
            Err(AcquireError::MetadataDecode(_))
        ));
    }
}
