use serde::{Deserialize, Serialize};

use crate::gateway::constants::{API_URL, DEFAULT_VOICE_CONNECT_TIMEOUT_MS};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DiscordConfig {
    /// Bot token. May be left empty and supplied through `VOXBRIDGE_TOKEN`.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// How long a voice join waits for both voice handshake halves.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Optional channel to join as soon as the gateway is ready.
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_url: default_api_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            guild_id: None,
            channel_id: None,
        }
    }
}

fn default_api_url() -> String {
    API_URL.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_VOICE_CONNECT_TIMEOUT_MS
}
