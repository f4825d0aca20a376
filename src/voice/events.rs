//! Typed voice gateway frames (protocol v8).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::warn;

use super::close_code::VoiceCloseCode;
use crate::gateway::{
    constants::DEFAULT_HEARTBEAT_INTERVAL_MS,
    protocol::{Frame, HeartbeatSignal, Protocol, RawFrame},
};

pub mod op {
    pub const IDENTIFY: u8 = 0;
    pub const SELECT_PROTOCOL: u8 = 1;
    pub const READY: u8 = 2;
    pub const HEARTBEAT: u8 = 3;
    pub const SESSION_DESCRIPTION: u8 = 4;
    pub const SPEAKING: u8 = 5;
    pub const HEARTBEAT_ACK: u8 = 6;
    pub const RESUME: u8 = 7;
    pub const HELLO: u8 = 8;
    pub const RESUMED: u8 = 9;
    pub const CLIENT_DISCONNECT: u8 = 13;
}

/// Encryption modes the native encoder can drive, in order of preference.
pub const SUPPORTED_MODES: [&str; 2] = ["aead_aes256_gcm_rtpsize", "xsalsa20_poly1305"];

/// Speaking flags.
pub const SPEAKING_MICROPHONE: u32 = 1 << 0;
pub const SPEAKING_SOUNDSHARE: u32 = 1 << 1;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VoiceReady {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
}

impl VoiceReady {
    /// First mode offered by the server that the encoder supports.
    pub fn select_mode(&self) -> Option<&'static str> {
        SUPPORTED_MODES
            .into_iter()
            .find(|mode| self.modes.iter().any(|m| m == *mode))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SessionDescription {
    pub mode: String,
    pub secret_key: Vec<u8>,
    #[serde(default)]
    pub audio_codec: Option<String>,
    #[serde(default)]
    pub media_session_id: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Speaking {
    pub speaking: u32,
    #[serde(default)]
    pub delay: u32,
    pub ssrc: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VoiceIdentify {
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VoiceResume {
    pub server_id: String,
    pub session_id: String,
    pub token: String,
    pub seq_ack: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SelectProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SelectProtocol {
    pub protocol: String,
    pub data: SelectProtocolData,
}

impl SelectProtocol {
    pub fn udp(address: String, port: u16, mode: impl Into<String>) -> Self {
        Self {
            protocol: "udp".to_string(),
            data: SelectProtocolData {
                address,
                port,
                mode: mode.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    Ready(VoiceReady),
    SessionDescription(SessionDescription),
    Speaking(Speaking),
    Heartbeat,
    HeartbeatAck,
    Hello { heartbeat_interval: u64 },
    Resumed,
    ClientDisconnect { user_id: Option<String> },
    Unknown { op: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceCommand {
    Identify(VoiceIdentify),
    SelectProtocol(SelectProtocol),
    Heartbeat { nonce: u64, seq_ack: Option<u64> },
    Speaking(Speaking),
    Resume(VoiceResume),
}

impl VoiceCommand {
    pub fn to_raw(&self) -> serde_json::Result<RawFrame> {
        let (code, d) = match self {
            Self::Identify(identify) => (op::IDENTIFY, serde_json::to_value(identify)?),
            Self::SelectProtocol(select) => (op::SELECT_PROTOCOL, serde_json::to_value(select)?),
            Self::Heartbeat { nonce, seq_ack } => match seq_ack {
                Some(seq) => (op::HEARTBEAT, json!({ "t": nonce, "seq_ack": seq })),
                None => (op::HEARTBEAT, json!({ "t": nonce })),
            },
            Self::Speaking(speaking) => (op::SPEAKING, serde_json::to_value(speaking)?),
            Self::Resume(resume) => (op::RESUME, serde_json::to_value(resume)?),
        };
        Ok(RawFrame::command(code, d))
    }
}

impl VoiceEvent {
    pub fn from_raw(raw: RawFrame) -> Self {
        match raw.op {
            op::READY => payload(raw.op, raw.d).map_or(Self::Unknown { op: op::READY }, Self::Ready),
            op::SESSION_DESCRIPTION => payload(raw.op, raw.d).map_or(
                Self::Unknown {
                    op: op::SESSION_DESCRIPTION,
                },
                Self::SessionDescription,
            ),
            op::SPEAKING => {
                payload(raw.op, raw.d).map_or(Self::Unknown { op: op::SPEAKING }, Self::Speaking)
            }
            op::HEARTBEAT => Self::Heartbeat,
            op::HEARTBEAT_ACK => Self::HeartbeatAck,
            op::HELLO => Self::Hello {
                // Voice servers send the interval as a float.
                heartbeat_interval: raw
                    .d
                    .get("heartbeat_interval")
                    .and_then(Value::as_f64)
                    .map(|ms| ms as u64)
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS),
            },
            op::RESUMED => Self::Resumed,
            op::CLIENT_DISCONNECT => Self::ClientDisconnect {
                user_id: raw
                    .d
                    .get("user_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            other => Self::Unknown { op: other },
        }
    }
}

fn payload<T: DeserializeOwned>(code: u8, d: Value) -> Option<T> {
    match serde_json::from_value(d) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("[voice] failed to parse op {} payload: {}", code, e);
            None
        }
    }
}

/// Wire protocol of the voice gateway.
pub struct VoiceProtocol;

impl Protocol for VoiceProtocol {
    type Event = VoiceEvent;
    type Command = VoiceCommand;

    const NAME: &'static str = "voice";
    const HEARTBEAT_TIMEOUT_CODE: u16 = VoiceCloseCode::HeartbeatNotAcknowledged.code();

    fn decode(text: &str) -> serde_json::Result<Frame<VoiceEvent>> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Ok(Frame {
            sequence: raw.seq,
            event: VoiceEvent::from_raw(raw),
        })
    }

    fn encode(command: &VoiceCommand) -> serde_json::Result<String> {
        serde_json::to_string(&command.to_raw()?)
    }

    fn heartbeat_signal(event: &VoiceEvent) -> HeartbeatSignal {
        match event {
            VoiceEvent::Hello { heartbeat_interval } => {
                HeartbeatSignal::Hello(Duration::from_millis(*heartbeat_interval))
            }
            VoiceEvent::HeartbeatAck => HeartbeatSignal::Ack,
            VoiceEvent::Heartbeat => HeartbeatSignal::Request,
            _ => HeartbeatSignal::None,
        }
    }

    fn heartbeat(sequence: Option<u64>) -> VoiceCommand {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        VoiceCommand::Heartbeat {
            nonce,
            seq_ack: sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ready_with_seq() {
        let frame = VoiceProtocol::decode(
            r#"{"op":2,"seq":1,"d":{"ssrc":7,"ip":"1.2.3.4","port":5000,
                "modes":["xsalsa20_poly1305","aead_aes256_gcm_rtpsize"]}}"#,
        )
        .unwrap();
        assert_eq!(frame.sequence, Some(1));
        let VoiceEvent::Ready(ready) = frame.event else {
            panic!("expected ready");
        };
        assert_eq!(ready.ssrc, 7);
        assert_eq!(ready.select_mode(), Some("aead_aes256_gcm_rtpsize"));
    }

    #[test]
    fn mode_selection_rejects_unknown_modes() {
        let ready = VoiceReady {
            ssrc: 1,
            ip: "x".into(),
            port: 1,
            modes: vec!["aead_xchacha20_poly1305_rtpsize".into()],
        };
        assert_eq!(ready.select_mode(), None);
    }

    #[test]
    fn hello_interval_may_be_fractional() {
        let frame = VoiceProtocol::decode(r#"{"op":8,"d":{"heartbeat_interval":13750.5}}"#).unwrap();
        assert_eq!(
            frame.event,
            VoiceEvent::Hello {
                heartbeat_interval: 13_750
            }
        );
    }

    #[test]
    fn heartbeat_carries_seq_ack() {
        let VoiceCommand::Heartbeat { seq_ack, .. } = VoiceProtocol::heartbeat(Some(4)) else {
            panic!("expected heartbeat");
        };
        assert_eq!(seq_ack, Some(4));

        let json = VoiceProtocol::encode(&VoiceCommand::Heartbeat {
            nonce: 10,
            seq_ack: Some(4),
        })
        .unwrap();
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, json!({"op": 3, "d": {"t": 10, "seq_ack": 4}}));
    }

    #[test]
    fn encodes_select_protocol() {
        let json = VoiceProtocol::encode(&VoiceCommand::SelectProtocol(SelectProtocol::udp(
            "203.0.113.1".into(),
            4000,
            "xsalsa20_poly1305",
        )))
        .unwrap();
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["op"], 1);
        assert_eq!(v["d"]["protocol"], "udp");
        assert_eq!(v["d"]["data"]["port"], 4000);
    }
}
