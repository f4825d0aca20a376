//! The seam between the generic socket and the two gateway families.

use std::{fmt::Debug, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw JSON envelope as it appears on the wire.
///
/// The control gateway numbers dispatches with `s`, the voice gateway (v8)
/// with `seq`; both are folded into [`Frame::sequence`] on decode.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RawFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl RawFrame {
    pub fn command(op: u8, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            seq: None,
            t: None,
        }
    }
}

/// A decoded frame: the sequence number plus the typed event.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<E> {
    pub sequence: Option<u64>,
    pub event: E,
}

/// How an inbound event affects the heartbeat sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatSignal {
    Hello(Duration),
    Ack,
    /// The server asked for a heartbeat right now.
    Request,
    None,
}

pub trait Protocol: Send + Sync + 'static {
    type Event: Clone + Debug + Send + 'static;
    type Command: Debug + Send + Sync + 'static;

    /// Used as a log prefix.
    const NAME: &'static str;

    /// Close code the socket uses when a heartbeat goes unacknowledged.
    const HEARTBEAT_TIMEOUT_CODE: u16;

    fn decode(text: &str) -> serde_json::Result<Frame<Self::Event>>;

    fn encode(command: &Self::Command) -> serde_json::Result<String>;

    fn heartbeat_signal(event: &Self::Event) -> HeartbeatSignal;

    /// Heartbeat payload carrying the last sequence seen on this socket.
    fn heartbeat(sequence: Option<u64>) -> Self::Command;
}
