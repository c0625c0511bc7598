//! Per-channel sample payload returned by transport pulls.

/// A discrete batch of samples pulled from a transport, one vector per
/// hardware channel.
///
/// All channels carry the same number of frames; [`SampleChunk::new`]
/// truncates to the shortest channel so a ragged pull from a driver can
/// never desynchronize the channel buffers.
///
/// # Example
///
/// ```
/// use spikestream::SampleChunk;
///
/// let chunk = SampleChunk::new(vec![vec![1, 2, 3], vec![4, 5, 6]]);
/// assert_eq!(chunk.frame_count(), 3);
/// assert_eq!(chunk.channel_count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SampleChunk {
    channels: Vec<Vec<i16>>,
}

impl SampleChunk {
    /// Creates a chunk from per-channel sample vectors.
    ///
    /// Channels longer than the shortest one are truncated.
    pub fn new(mut channels: Vec<Vec<i16>>) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for ch in &mut channels {
            ch.truncate(frames);
        }
        Self { channels }
    }

    /// Creates an empty chunk with the given channel count.
    pub fn empty(channel_count: usize) -> Self {
        Self {
            channels: vec![Vec::new(); channel_count],
        }
    }

    /// Builds a chunk by deinterleaving frame-ordered samples.
    ///
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(samples: &[i16], channel_count: usize) -> Self {
        if channel_count == 0 {
            return Self::default();
        }
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (ch, &sample) in frame.iter().enumerate() {
                channels[ch].push(sample);
            }
        }
        Self { channels }
    }

    /// Number of frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples for one channel.
    pub fn channel(&self, index: usize) -> &[i16] {
        &self.channels[index]
    }

    /// Iterates over the per-channel sample slices.
    pub fn iter(&self) -> impl Iterator<Item = &[i16]> {
        self.channels.iter().map(Vec::as_slice)
    }

    /// Returns `true` if the chunk holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }
}
