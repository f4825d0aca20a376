//! Error taxonomy.
//!
//! Each failure domain has its own enum so the control plane, the voice
//! plane and the audio pipeline never share error paths. Everything is
//! `Clone` so a single in-flight result can be handed to several waiters.

use thiserror::Error;

/// Control / voice gateway session errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway closed with fatal code {code}")]
    FatalClose { code: u16 },

    #[error("unable to resolve gateway: {0}")]
    Description(#[from] RestError),

    #[error("gateway socket error: {0}")]
    Socket(String),

    #[error("gateway task is no longer running")]
    Stopped,

    #[error("failed to encode gateway payload: {0}")]
    Encode(String),
}

/// Errors raised by a `VoiceConnection`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("Unable to join voice channel: gateway not ready")]
    GatewayNotReady,

    #[error("Unable to join voice channel: took longer than {0}ms to get a result")]
    HandshakeTimeout(u64),

    #[error("Unable to join voice channel: voice server has no endpoint")]
    MissingEndpoint,

    #[error("Unable to {action}: no gateway found")]
    NoVoiceGateway { action: &'static str },

    #[error("Unable to {action}: voice gateway not ready")]
    VoiceGatewayNotReady { action: &'static str },

    #[error("voice gateway closed with code {code}")]
    Closed { code: u16 },

    #[error("unsupported encryption modes: {0}")]
    UnsupportedMode(String),

    #[error("IP discovery failed: {0}")]
    Discovery(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Errors returned by the REST collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestError {
    #[error("discord api error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("http error: {0}")]
    Http(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RestError::Decode(e.to_string())
        } else {
            RestError::Http(e.to_string())
        }
    }
}

/// Audio capture pipeline errors. These never reach the gateway retry logic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("invalid capture configuration: {0}")]
    Config(String),

    #[error("capture transport error: {0}")]
    Transport(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("failed to spawn capture worker: {0}")]
    Worker(String),
}

/// WebRTC negotiation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtcError {
    #[error("peer connection error: {0}")]
    Peer(String),

    #[error("signaling error: {0}")]
    Signal(String),

    #[error("invalid session description: {0}")]
    Sdp(String),
}
