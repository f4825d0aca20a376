//! Seams to the WebRTC stack and the native broadcast client.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::common::errors::RtcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description as exchanged with the broadcast client (JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcSessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    NegotiationNeeded,
    /// A locally gathered candidate, serialized as JSON.
    IceCandidate(String),
    IceConnectionState(IceConnectionState),
    Closed,
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<RtcSessionDescription, RtcError>;

    async fn set_local_description(&self, description: RtcSessionDescription)
    -> Result<(), RtcError>;

    async fn set_remote_description(
        &self,
        description: RtcSessionDescription,
    ) -> Result<(), RtcError>;

    async fn add_ice_candidate(&self, candidate: String) -> Result<(), RtcError>;

    fn close(&self);
}

/// Creates one peer connection per attempt, already carrying the capture
/// track.
pub trait PeerFactory: Send + Sync {
    fn create(
        &self,
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), RtcError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastEvent {
    /// A remote candidate, serialized as JSON.
    Candidate(String),
    Closed,
}

/// The native client that receives the media stream.
#[async_trait]
pub trait BroadcastClient: Send + Sync {
    /// Replaces any previous remote peer with a fresh one.
    async fn create(&self) -> Result<mpsc::UnboundedReceiver<BroadcastEvent>, RtcError>;

    /// Sends an offer and returns the answer.
    async fn signal(&self, offer: String) -> Result<String, RtcError>;

    async fn add_candidate(&self, candidate: String) -> Result<(), RtcError>;

    async fn start_stream(&self) -> Result<(), RtcError>;

    async fn close(&self) -> Result<(), RtcError>;
}
