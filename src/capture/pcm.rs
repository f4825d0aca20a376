use bytes::Bytes;

use super::constants::FRAME_POOL_CAPACITY;

const PCM_POSITIVE_SCALE: f32 = 32_767.0;
const PCM_NEGATIVE_SCALE: f32 = 32_768.0;

/// Maps a float sample to signed 16-bit PCM.
#[inline]
pub fn to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * PCM_NEGATIVE_SCALE) as i16
    } else {
        (s * PCM_POSITIVE_SCALE) as i16
    }
}

/// Wire buffer that returns itself to the converter's pool once the last
/// `Bytes` handle to it is dropped.
struct PooledFrame {
    buf: Vec<u8>,
    pool: flume::Sender<Vec<u8>>,
}

impl AsRef<[u8]> for PooledFrame {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        // A full pool just frees the buffer.
        let _ = self.pool.try_send(std::mem::take(&mut self.buf));
    }
}

/// Interleaves per-channel float buffers and converts them to PCM.
///
/// Scratch buffers are kept between calls and wire buffers are recycled
/// through a bounded pool, so steady-state conversion does not allocate.
pub struct PcmConverter {
    interleaved: Vec<f32>,
    pcm: Vec<i16>,
    frame_len: usize,
    recycle: flume::Sender<Vec<u8>>,
    pool: flume::Receiver<Vec<u8>>,
}

impl PcmConverter {
    pub fn new(channels: usize, frame_samples: usize) -> Self {
        let len = channels * frame_samples;
        let (recycle, pool) = flume::bounded(FRAME_POOL_CAPACITY);
        Self {
            interleaved: Vec::with_capacity(len),
            pcm: Vec::with_capacity(len),
            frame_len: len * 2,
            recycle,
            pool,
        }
    }

    /// Converts one frame. Channels are truncated to the shortest buffer.
    pub fn convert(&mut self, channels: &[Vec<f32>]) -> &[i16] {
        let len = channels.iter().map(Vec::len).min().unwrap_or(0);

        self.interleaved.clear();
        for i in 0..len {
            self.interleaved.extend(channels.iter().map(|c| c[i]));
        }

        self.pcm.clear();
        self.pcm
            .extend(self.interleaved.iter().copied().map(to_pcm16));
        &self.pcm
    }

    pub fn interleaved(&self) -> &[f32] {
        &self.interleaved
    }

    pub fn pcm(&self) -> &[i16] {
        &self.pcm
    }

    /// Little-endian bytes of the last converted frame, written into a
    /// pooled buffer when one is free.
    pub fn frame_bytes(&mut self) -> Bytes {
        let mut buf = self
            .pool
            .try_recv()
            .unwrap_or_else(|_| Vec::with_capacity(self.frame_len));
        buf.clear();
        buf.extend(self.pcm.iter().flat_map(|sample| sample.to_le_bytes()));
        Bytes::from_owner(PooledFrame {
            buf,
            pool: self.recycle.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_map_to_the_i16_range() {
        assert_eq!(to_pcm16(1.0), 32_767);
        assert_eq!(to_pcm16(-1.0), -32_768);
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(3.5), 32_767);
        assert_eq!(to_pcm16(-7.0), -32_768);
    }

    #[test]
    fn output_shape_is_channels_times_length() {
        let mut converter = PcmConverter::new(3, 4);
        let channels = vec![vec![0.1; 4], vec![0.2; 4], vec![0.3; 4]];
        let pcm = converter.convert(&channels).len();
        assert_eq!(pcm, 12);
        assert_eq!(converter.interleaved().len(), 12);
    }

    #[test]
    fn interleaves_sample_by_sample() {
        let mut converter = PcmConverter::new(2, 2);
        converter.convert(&[vec![1.0, 0.0], vec![-1.0, 0.5]]);
        assert_eq!(converter.interleaved(), &[1.0, -1.0, 0.0, 0.5]);
        assert_eq!(converter.pcm(), &[32_767, -32_768, 0, 16_383]);

        let bytes = converter.frame_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &[0xff, 0x7f, 0x00, 0x80]);
    }

    #[test]
    fn dropped_frames_are_reused() {
        let mut converter = PcmConverter::new(1, 4);
        converter.convert(&[vec![0.5; 4]]);

        let first = converter.frame_bytes();
        let address = first.as_ptr();
        drop(first);

        let second = converter.frame_bytes();
        assert_eq!(second.as_ptr(), address);
        assert_eq!(second.len(), 8);

        // Still held downstream, so the next frame needs another buffer.
        let third = converter.frame_bytes();
        assert_ne!(third.as_ptr(), second.as_ptr());
        assert_eq!(third, second);
    }
}
