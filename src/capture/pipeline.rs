//! Consumer side of the capture pipeline.
//!
//! A dedicated thread blocks on the ring, converts each kernel to PCM and
//! hands the bytes to an async task that owns the transport. Setup errors
//! are returned to the caller; nothing here reaches the gateways.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use bytes::Bytes;
use tracing::{debug, error, info};

use super::{
    constants::{CONSUMER_WAIT_MS, FRAME_QUEUE_CAPACITY, frame_samples},
    pcm::PcmConverter,
    ring::{self, Consumer, Producer},
    sender::FrameSender,
};
use crate::{common::errors::CaptureError, configs::capture::CaptureConfig};

pub struct CapturePipeline {
    running: Arc<AtomicBool>,
    consumer: Option<thread::JoinHandle<()>>,
    forwarder: tokio::task::JoinHandle<()>,
}

impl CapturePipeline {
    /// Starts the consumer and the transport, returning the producer half
    /// for the audio source to write into.
    pub async fn start(config: &CaptureConfig) -> Result<(Self, Producer<f32>), CaptureError> {
        let kernel = frame_samples(config.sample_rate, config.frame_ms);
        let (producer, consumer) = ring::channel::<f32>(config.channels, config.ring_length, kernel)?;
        let sender = FrameSender::connect(config).await?;

        let (frames_tx, frames_rx) = flume::bounded::<Bytes>(FRAME_QUEUE_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));

        let running_clone = running.clone();
        let converter = PcmConverter::new(config.channels, kernel);
        let handle = thread::Builder::new()
            .name("capture-consumer".to_string())
            .spawn(move || consume(consumer, converter, frames_tx, running_clone))
            .map_err(|e| CaptureError::Worker(e.to_string()))?;

        let forwarder = tokio::spawn(async move {
            let mut dropped = 0u64;
            while let Ok(frame) = frames_rx.recv_async().await {
                if !sender.send(frame) {
                    dropped += 1;
                }
            }
            debug!("capture forwarder stopped ({} frames dropped)", dropped);
            sender.close().await;
        });

        info!(
            "capture pipeline started: {} Hz, {} channels, {} samples per frame",
            config.sample_rate, config.channels, kernel
        );

        Ok((
            Self {
                running,
                consumer: Some(handle),
                forwarder,
            },
            producer,
        ))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the consumer thread and closes the transport.
    pub async fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.consumer.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
        let _ = (&mut self.forwarder).await;
        info!("capture pipeline stopped");
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

fn consume(
    mut consumer: Consumer<f32>,
    mut converter: PcmConverter,
    frames: flume::Sender<Bytes>,
    running: Arc<AtomicBool>,
) {
    let wait = Duration::from_millis(CONSUMER_WAIT_MS);
    let mut channels = vec![Vec::with_capacity(consumer.kernel_length()); consumer.channels()];

    while running.load(Ordering::Acquire) {
        if !consumer.wait_read(&mut channels, wait) {
            continue;
        }
        converter.convert(&channels);
        match frames.try_send(converter.frame_bytes()) {
            Ok(()) | Err(flume::TrySendError::Full(_)) => {}
            Err(flume::TrySendError::Disconnected(_)) => {
                error!("capture forwarder went away");
                break;
            }
        }
    }
    running.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use tokio::net::UdpSocket;

    use super::*;
    use crate::configs::capture::TransportKind;

    #[tokio::test]
    async fn captured_frames_reach_the_udp_peer_as_pcm() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = CaptureConfig {
            enabled: true,
            transport: TransportKind::Udp,
            port: peer.local_addr().unwrap().port(),
            ..Default::default()
        };

        let (pipeline, mut producer) = CapturePipeline::start(&config).await.unwrap();
        let left = vec![0.5f32; 960];
        let right = vec![-1.0f32; 960];
        producer.write(&[&left, &right]);

        let mut buf = vec![0u8; 8192];
        let n = tokio::time::timeout(Duration::from_secs(5), peer.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 960 * 2 * 2);
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 16_383);
        assert_eq!(i16::from_le_bytes([buf[2], buf[3]]), -32_768);

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn invalid_ring_is_rejected_before_anything_starts() {
        let config = CaptureConfig {
            ring_length: 100,
            ..Default::default()
        };
        assert!(matches!(
            CapturePipeline::start(&config).await,
            Err(CaptureError::Config(_))
        ));
    }
}
