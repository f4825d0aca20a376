//! Input device source backed by `cpal`.
//!
//! The stream lives on its own thread because it is not `Send` on every
//! host. Its callback is the ring producer: a [`Deinterleaver`] splits each
//! buffer into channels allocated up front and never locks.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use super::{deinterleave::Deinterleaver, ring::Producer};
use crate::{common::errors::CaptureError, configs::capture::CaptureConfig};

pub struct DeviceCapture {
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DeviceCapture {
    /// Opens the default input device and starts feeding `producer`.
    pub fn start(config: &CaptureConfig, producer: Producer<f32>) -> Result<Self, CaptureError> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel();

        let channels = config.channels;
        let sample_rate = config.sample_rate;
        let scratch_len = config.ring_length;
        let running_clone = running.clone();

        let thread = thread::Builder::new()
            .name("capture-device".to_string())
            .spawn(move || {
                let stream = match open_stream(channels, sample_rate, scratch_len, producer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                while running_clone.load(Ordering::Acquire) {
                    thread::park_timeout(Duration::from_millis(250));
                }
                drop(stream);
            })
            .map_err(|e| CaptureError::Worker(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                running,
                thread: Some(thread),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::Device("device thread exited".into())),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

impl Drop for DeviceCapture {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_stream(
    channels: usize,
    sample_rate: u32,
    scratch_len: usize,
    mut producer: Producer<f32>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::Device("no input device available".into()))?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let stream_config = cpal::StreamConfig {
        channels: channels as u16,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut deinterleaver = Deinterleaver::new(channels, scratch_len);

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                deinterleaver.push(data, &mut producer);
            },
            |e| error!("capture device error: {}", e),
            None,
        )
        .map_err(|e| CaptureError::Device(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::Device(e.to_string()))?;
    info!("capturing from {} ({} Hz, {} channels)", name, sample_rate, channels);
    Ok(stream)
}
