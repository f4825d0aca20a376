//! Audio capture: a lock-free ring fed by the audio device, drained by a
//! worker that frames PCM for the configured transport.

pub mod constants;
pub mod deinterleave;
#[cfg(feature = "device-capture")]
pub mod device;
pub mod pcm;
pub mod pipeline;
pub mod ring;
pub mod sender;

pub use pipeline::CapturePipeline;
pub use ring::{Consumer, Producer};

use crate::{common::errors::CaptureError, configs::CaptureConfig};

/// Whether this build can open an audio input device.
pub const HAS_DEVICE_SOURCE: bool = cfg!(feature = "device-capture");

/// Rejects an enabled capture section when nothing could feed the ring.
pub fn ensure_source(config: &CaptureConfig, device_source: bool) -> Result<(), CaptureError> {
    if config.enabled && !device_source {
        return Err(CaptureError::Config(
            "capture is enabled but this build has no audio source; \
             rebuild with --features device-capture"
                .into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_capture_needs_an_audio_source() {
        let mut config = CaptureConfig::default();
        assert!(ensure_source(&config, false).is_ok());

        config.enabled = true;
        assert!(matches!(
            ensure_source(&config, false),
            Err(CaptureError::Config(message)) if message.contains("device-capture")
        ));
        assert!(ensure_source(&config, true).is_ok());
    }
}
