//! Splits interleaved device buffers into the per-channel slices the ring
//! producer takes. Runs inside the audio callback, so it never allocates
//! after construction.

use tracing::warn;

use super::ring::Producer;

/// Channels a device callback can forward; the rest are written as silence.
pub const MAX_DEVICE_CHANNELS: usize = 8;

pub struct Deinterleaver {
    channels: usize,
    scratch: Vec<Vec<f32>>,
    scratch_len: usize,
}

impl Deinterleaver {
    /// `scratch_len` is the most frames forwarded per ring write.
    pub fn new(channels: usize, scratch_len: usize) -> Self {
        let scratch_len = scratch_len.max(1);
        let kept = channels.min(MAX_DEVICE_CHANNELS);
        if channels > kept {
            warn!(
                "device has {} channels; only the first {} are captured, the rest are silent",
                channels, kept
            );
        }
        Self {
            channels,
            scratch: vec![vec![0.0; scratch_len]; kept],
            scratch_len,
        }
    }

    /// Channels the device delivers but the ring receives as silence.
    pub fn dropped_channels(&self) -> usize {
        self.channels - self.scratch.len()
    }

    /// Forwards one interleaved callback buffer.
    pub fn push(&mut self, data: &[f32], producer: &mut Producer<f32>) {
        if self.channels == 0 {
            return;
        }
        for chunk in data.chunks(self.scratch_len * self.channels) {
            let frames = chunk.len() / self.channels;
            for (frame, samples) in chunk.chunks_exact(self.channels).enumerate() {
                for (buf, sample) in self.scratch.iter_mut().zip(samples) {
                    buf[frame] = *sample;
                }
            }

            let mut slices = [&[][..]; MAX_DEVICE_CHANNELS];
            for (slot, buf) in slices.iter_mut().zip(&self.scratch) {
                *slot = &buf[..frames];
            }
            producer.write(&slices[..self.scratch.len()]);
        }
    }
}
