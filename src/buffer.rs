//! Position-addressed ring storage for one hardware channel.
//!
//! A [`SampleBuffer`] keeps the most recent `capacity` samples of a channel,
//! addressed by absolute sample position on the shared acquisition timeline.
//! Appends silently overwrite the oldest data once the buffer is full; reads
//! outside the retained window return zeros, never garbage.

/// Fixed-capacity circular store of signed 16-bit samples.
///
/// The buffer tracks `head`, the absolute position of the next write. The
/// retained window is `[head - filled, head)`.
#[derive(Debug)]
pub struct SampleBuffer {
    data: Vec<i16>,
    head: i64,
    filled: usize,
}

impl SampleBuffer {
    /// Creates a buffer whose first write lands at absolute position `start`.
    pub fn new(start: i64, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: vec![0; capacity],
            head: start,
            filled: 0,
        }
    }

    /// Absolute position of the next write (one past the newest sample).
    pub fn pos(&self) -> i64 {
        self.head
    }

    /// Number of valid samples currently retained.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Capacity in samples.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Absolute position of the oldest retained sample.
    pub fn retained_start(&self) -> i64 {
        self.head - self.filled as i64
    }

    /// Appends samples at the head, overwriting the oldest data on wrap.
    pub fn add_data(&mut self, samples: &[i16]) {
        let cap = self.data.len();

        // Only the last `cap` samples of an oversized append survive.
        let tail = if samples.len() > cap {
            &samples[samples.len() - cap..]
        } else {
            samples
        };

        let mut idx = (self.head as u64 % cap as u64) as usize;
        // Skipped-over samples still advance the head.
        idx = (idx + (samples.len() - tail.len())) % cap;

        let first = tail.len().min(cap - idx);
        self.data[idx..idx + first].copy_from_slice(&tail[..first]);
        if first < tail.len() {
            self.data[..tail.len() - first].copy_from_slice(&tail[first..]);
        }

        self.head += samples.len() as i64;
        self.filled = (self.filled + samples.len()).min(cap);
    }

    /// Copies `out.len()` samples starting at absolute `offset` into `out`.
    ///
    /// Positions outside the retained window are filled with zero. Never
    /// blocks and never allocates.
    pub fn read_into(&self, offset: i64, out: &mut [i16]) {
        out.fill(0);
        if out.is_empty() {
            return;
        }

        let start = self.retained_start().max(offset);
        let end = self.head.min(offset + out.len() as i64);
        if start >= end {
            return;
        }

        let cap = self.data.len();
        let mut src = (start as u64 % cap as u64) as usize;
        let mut dst = (start - offset) as usize;
        let mut remaining = (end - start) as usize;
        while remaining > 0 {
            let run = remaining.min(cap - src);
            out[dst..dst + run].copy_from_slice(&self.data[src..src + run]);
            src = (src + run) % cap;
            dst += run;
            remaining -= run;
        }
    }

    /// Sample at absolute position `pos`, or zero outside the window.
    pub fn sample_at(&self, pos: i64) -> i16 {
        if pos < self.retained_start() || pos >= self.head {
            return 0;
        }
        let cap = self.data.len();
        self.data[(pos as u64 % cap as u64) as usize]
    }

    /// Per-group `(min, max)` over `skip` consecutive raw samples.
    ///
    /// Produces `len` groups starting at absolute `offset`. Positions outside
    /// the retained window contribute zero, so groups past the end of history
    /// come back as `(0, 0)` rather than failing.
    pub fn envelope(&self, offset: i64, len: usize, skip: usize) -> Vec<(i16, i16)> {
        let skip = skip.max(1);
        let mut groups = Vec::with_capacity(len);

        for g in 0..len {
            let base = offset + (g * skip) as i64;
            let mut lo = i16::MAX;
            let mut hi = i16::MIN;
            for s in 0..skip {
                let v = self.sample_at(base + s as i64);
                lo = lo.min(v);
                hi = hi.max(v);
            }
            groups.push((lo, hi));
        }

        groups
    }
}
