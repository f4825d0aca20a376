//! WebRTC capture stream: retries one peer connection at a time over a
//! caller-provided signalling channel. Not used by the binary; the peer
//! and signalling implementations come from the embedding application.

pub mod connection;
pub mod negotiation;
pub mod peer;
pub mod sdp;
pub mod stream;

#[cfg(test)]
mod testing;

pub use connection::{RtcConnection, RtcConnectionEvent};
pub use peer::{BroadcastClient, BroadcastEvent, PeerConnection, PeerEvent, PeerFactory};
pub use stream::{RtcNotification, RtcStream};
