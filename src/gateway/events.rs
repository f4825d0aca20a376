//! Typed control gateway frames.
//!
//! Inbound JSON is decoded exactly once, at the socket boundary, into
//! [`GatewayEvent`]; the session manager only ever matches on the enum.

use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::warn;

use super::{
    close_code::GatewayCloseCode,
    constants::{CLIENT_NAME, DEFAULT_HEARTBEAT_INTERVAL_MS},
    protocol::{Frame, HeartbeatSignal, Protocol, RawFrame},
};
use crate::{
    common::types::{ChannelId, GuildId, UserId},
    rest::models::{BaseGuild, Channel, Guild, UnavailableGuild, User},
};

pub mod op {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const UPDATE_VOICE_STATE: u8 = 4;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Dispatch(DispatchEvent),
    /// The server asks for an immediate heartbeat.
    Heartbeat,
    Reconnect,
    InvalidSession {
        resumable: bool,
    },
    Hello {
        heartbeat_interval: u64,
    },
    HeartbeatAck,
    Unknown {
        op: u8,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Ready(Ready),
    Resumed,
    GuildCreate(Guild),
    GuildUpdate(BaseGuild),
    GuildDelete(UnavailableGuild),
    ChannelCreate(Channel),
    ChannelDelete(Channel),
    VoiceStateUpdate(VoiceState),
    VoiceServerUpdate(VoiceServerUpdate),
    /// Any dispatch this client does not consume, or one that failed to parse.
    Other(String),
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Ready {
    pub user: User,
    pub session_id: String,
    pub resume_gateway_url: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VoiceState {
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    pub user_id: UserId,
    pub session_id: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: GuildId,
    /// `None` while the voice server is being reallocated.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Identify {
    pub token: String,
    pub intents: u64,
    pub properties: IdentifyProperties,
}

impl Identify {
    pub fn new(token: impl Into<String>, intents: u64) -> Self {
        Self {
            token: token.into(),
            intents,
            properties: IdentifyProperties {
                os: std::env::consts::OS.to_string(),
                browser: CLIENT_NAME.to_string(),
                device: CLIENT_NAME.to_string(),
            },
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UpdateVoiceState {
    pub guild_id: GuildId,
    /// `None` leaves the current channel.
    pub channel_id: Option<ChannelId>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl UpdateVoiceState {
    pub fn new(guild_id: GuildId, channel_id: Option<ChannelId>) -> Self {
        Self {
            guild_id,
            channel_id,
            self_mute: false,
            self_deaf: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCommand {
    Heartbeat(Option<u64>),
    Identify(Identify),
    Resume(Resume),
    UpdateVoiceState(UpdateVoiceState),
}

impl GatewayCommand {
    pub fn to_raw(&self) -> serde_json::Result<RawFrame> {
        let (code, d) = match self {
            Self::Heartbeat(seq) => (op::HEARTBEAT, json!(seq)),
            Self::Identify(identify) => (op::IDENTIFY, serde_json::to_value(identify)?),
            Self::Resume(resume) => (op::RESUME, serde_json::to_value(resume)?),
            Self::UpdateVoiceState(update) => {
                (op::UPDATE_VOICE_STATE, serde_json::to_value(update)?)
            }
        };
        Ok(RawFrame::command(code, d))
    }
}

impl GatewayEvent {
    pub fn from_raw(raw: RawFrame) -> Self {
        match raw.op {
            op::DISPATCH => Self::Dispatch(DispatchEvent::from_raw(raw.t, raw.d)),
            op::HEARTBEAT => Self::Heartbeat,
            op::RECONNECT => Self::Reconnect,
            op::INVALID_SESSION => Self::InvalidSession {
                resumable: raw.d.as_bool().unwrap_or(false),
            },
            op::HELLO => Self::Hello {
                heartbeat_interval: raw
                    .d
                    .get("heartbeat_interval")
                    .and_then(Value::as_u64)
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS),
            },
            op::HEARTBEAT_ACK => Self::HeartbeatAck,
            other => Self::Unknown { op: other },
        }
    }
}

impl DispatchEvent {
    fn from_raw(t: Option<String>, d: Value) -> Self {
        let Some(t) = t else {
            return Self::Other(String::new());
        };

        let parsed = match t.as_str() {
            "READY" => payload(&t, d).map(Self::Ready),
            "RESUMED" => Some(Self::Resumed),
            "GUILD_CREATE" => payload(&t, d).map(Self::GuildCreate),
            "GUILD_UPDATE" => payload(&t, d).map(Self::GuildUpdate),
            "GUILD_DELETE" => payload(&t, d).map(Self::GuildDelete),
            "CHANNEL_CREATE" => payload(&t, d).map(Self::ChannelCreate),
            "CHANNEL_DELETE" => payload(&t, d).map(Self::ChannelDelete),
            "VOICE_STATE_UPDATE" => payload(&t, d).map(Self::VoiceStateUpdate),
            "VOICE_SERVER_UPDATE" => payload(&t, d).map(Self::VoiceServerUpdate),
            _ => None,
        };

        parsed.unwrap_or(Self::Other(t))
    }
}

fn payload<T: DeserializeOwned>(t: &str, d: Value) -> Option<T> {
    match serde_json::from_value(d) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("[gateway] failed to parse {} payload: {}", t, e);
            None
        }
    }
}

/// Wire protocol of the control gateway.
pub struct ControlProtocol;

impl Protocol for ControlProtocol {
    type Event = GatewayEvent;
    type Command = GatewayCommand;

    const NAME: &'static str = "gateway";
    const HEARTBEAT_TIMEOUT_CODE: u16 = GatewayCloseCode::HeartbeatNotAcknowledged.code();

    fn decode(text: &str) -> serde_json::Result<Frame<GatewayEvent>> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Ok(Frame {
            sequence: raw.s,
            event: GatewayEvent::from_raw(raw),
        })
    }

    fn encode(command: &GatewayCommand) -> serde_json::Result<String> {
        serde_json::to_string(&command.to_raw()?)
    }

    fn heartbeat_signal(event: &GatewayEvent) -> HeartbeatSignal {
        match event {
            GatewayEvent::Hello { heartbeat_interval } => {
                HeartbeatSignal::Hello(Duration::from_millis(*heartbeat_interval))
            }
            GatewayEvent::HeartbeatAck => HeartbeatSignal::Ack,
            GatewayEvent::Heartbeat => HeartbeatSignal::Request,
            _ => HeartbeatSignal::None,
        }
    }

    fn heartbeat(sequence: Option<u64>) -> GatewayCommand {
        GatewayCommand::Heartbeat(sequence)
    }
}
