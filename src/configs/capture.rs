use serde::{Deserialize, Serialize};

use crate::capture::constants::{
    DEFAULT_CHANNELS, DEFAULT_FRAME_MS, DEFAULT_RING_LENGTH, DEFAULT_SAMPLE_RATE,
};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Udp,
    Websocket,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,
    #[serde(default = "default_ring_length")]
    pub ring_length: usize,
    #[serde(default)]
    pub transport: TransportKind,
    /// Localhost port for the `udp` transport.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Signaling peer address for the `websocket` transport.
    pub websocket_url: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            frame_ms: default_frame_ms(),
            ring_length: default_ring_length(),
            transport: TransportKind::default(),
            port: default_port(),
            websocket_url: None,
        }
    }
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_channels() -> usize {
    DEFAULT_CHANNELS
}

fn default_frame_ms() -> u32 {
    DEFAULT_FRAME_MS
}

fn default_ring_length() -> usize {
    DEFAULT_RING_LENGTH
}

fn default_port() -> u16 {
    5_600
}
