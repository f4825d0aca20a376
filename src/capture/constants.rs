//! Defaults for the capture pipeline.

/// Capture sample rate (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

pub const DEFAULT_CHANNELS: usize = 2;

/// Frame duration handed to the consumer per wake-up.
pub const DEFAULT_FRAME_MS: u32 = 20;

/// Ring length in samples per channel.
pub const DEFAULT_RING_LENGTH: usize = 8_192;

/// How long the consumer blocks before re-checking the stop flag.
pub const CONSUMER_WAIT_MS: u64 = 100;

/// Converted frames queued between the consumer thread and the sender task.
/// Anything beyond this is dropped.
pub const FRAME_QUEUE_CAPACITY: usize = 16;

/// Frame buffers kept for reuse: the queue plus the frames the sender and
/// the consumer hold at any moment.
pub const FRAME_POOL_CAPACITY: usize = FRAME_QUEUE_CAPACITY + 4;

/// Samples per channel in one frame, e.g. 960 for 20 ms at 48 kHz.
pub const fn frame_samples(sample_rate: u32, frame_ms: u32) -> usize {
    (sample_rate as usize * frame_ms as usize) / 1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twenty_ms_at_48k_is_960_samples() {
        assert_eq!(frame_samples(DEFAULT_SAMPLE_RATE, DEFAULT_FRAME_MS), 960);
        assert_eq!(frame_samples(44_100, 10), 441);
    }
}
