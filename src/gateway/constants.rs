/// Discord REST / gateway API version.
pub const API_VERSION: u8 = 10;

/// Base URL of the REST API.
pub const API_URL: &str = "https://discord.com/api/v10";

/// CDN used for guild icons.
pub const CDN_URL: &str = "https://cdn.discordapp.com";

/// Discord Voice Gateway version to use in the WebSocket URL.
pub const VOICE_GATEWAY_VERSION: u8 = 8;

/// `GUILDS | GUILD_VOICE_STATES`; nothing else is consumed.
pub const INTENTS: u64 = (1 << 0) | (1 << 7);

/// User agent sent with REST requests.
pub const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/voxbridge/voxbridge, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Name reported in the Identify `properties` block.
pub const CLIENT_NAME: &str = "voxbridge";

/// Fallback heartbeat interval when Hello omits one.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 41_250;

/// Default time a voice join waits for both handshake halves.
pub const DEFAULT_VOICE_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Timeout (ms) allowed for the WS write half to flush a close frame.
pub const WRITE_TASK_SHUTDOWN_MS: u64 = 500;

/// Capacity of the dispatch fan-out channel. Sized for the GUILD_CREATE
/// burst that follows READY on accounts in many guilds.
pub const DISPATCH_CHANNEL_CAPACITY: usize = 4096;

/// Channel types treated as voice channels (GUILD_VOICE, GUILD_STAGE_VOICE).
pub const VOICE_CHANNEL_TYPES: [u8; 2] = [2, 13];
