use serde::{Deserialize, Serialize};

use crate::common::types::{ChannelId, GuildId, RoleId, UserId};

/// Response of `GET /gateway/bot`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GatewayDescription {
    pub url: String,
}

/// Error body returned by the REST API on non-2xx responses.
#[derive(Deserialize, Debug, Clone)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(from = "u8", into = "u8")]
pub enum OverwriteKind {
    Role,
    Member,
    Unknown(u8),
}

impl From<u8> for OverwriteKind {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Role,
            1 => Self::Member,
            other => Self::Unknown(other),
        }
    }
}

impl From<OverwriteKind> for u8 {
    fn from(kind: OverwriteKind) -> Self {
        match kind {
            OverwriteKind::Role => 0,
            OverwriteKind::Member => 1,
            OverwriteKind::Unknown(v) => v,
        }
    }
}

/// Channel permission overwrite. `allow`/`deny` are decimal bitsets.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Overwrite {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OverwriteKind,
    #[serde(default)]
    pub allow: String,
    #[serde(default)]
    pub deny: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    #[serde(rename = "type")]
    pub kind: u8,
    /// Missing on channels embedded in GUILD_CREATE.
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bitrate: Option<u64>,
    #[serde(default)]
    pub permission_overwrites: Vec<Overwrite>,
}

/// Guild as listed by `GET /users/@me/guilds`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BaseGuild {
    pub id: GuildId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    /// Permissions of the current user in this guild.
    #[serde(default)]
    pub permissions: Option<String>,
}

/// Guild delivered by GUILD_CREATE, including its channels.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Guild {
    pub id: GuildId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UnavailableGuild {
    pub id: GuildId,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GuildMember {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

/// A voice channel the bot may join, trimmed to what callers need.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VoiceChannel {
    pub id: ChannelId,
    pub name: String,
    pub position: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceGuild {
    pub id: GuildId,
    pub name: String,
    /// CDN URL of the guild icon.
    pub icon: String,
    pub voice_channels: Vec<VoiceChannel>,
}
