pub mod client;
pub mod guilds;
pub mod models;
pub mod permissions;

pub use client::{DiscordRest, HttpRest};
pub use guilds::voice_guilds;
