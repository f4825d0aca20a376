use super::constants::VOICE_CHANNEL_TYPES;
use crate::{
    common::types::GuildId,
    rest::{
        guilds::icon_url,
        models::{BaseGuild, Channel, Guild, VoiceChannel, VoiceGuild},
    },
};

/// Guilds seen on the control gateway, kept in arrival order.
#[derive(Debug, Default)]
pub struct GuildCache {
    guilds: Vec<Guild>,
}

impl GuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }

    pub fn get(&self, id: &GuildId) -> Option<&Guild> {
        self.guilds.iter().find(|g| &g.id == id)
    }

    pub fn upsert(&mut self, guild: Guild) {
        match self.guilds.iter_mut().find(|g| g.id == guild.id) {
            Some(existing) => *existing = guild,
            None => self.guilds.push(guild),
        }
    }

    /// Merges name and icon. Unknown guilds are ignored.
    pub fn update(&mut self, update: BaseGuild) -> bool {
        match self.guilds.iter_mut().find(|g| g.id == update.id) {
            Some(existing) => {
                existing.name = update.name;
                existing.icon = update.icon;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &GuildId) -> bool {
        let before = self.guilds.len();
        self.guilds.retain(|g| &g.id != id);
        self.guilds.len() != before
    }

    /// Adds or replaces a voice channel in its owning guild.
    pub fn add_channel(&mut self, channel: Channel) -> bool {
        if !VOICE_CHANNEL_TYPES.contains(&channel.kind) {
            return false;
        }
        let Some(guild) = channel
            .guild_id
            .as_ref()
            .and_then(|id| self.guilds.iter_mut().find(|g| &g.id == id))
        else {
            return false;
        };
        match guild.channels.iter_mut().find(|c| c.id == channel.id) {
            Some(existing) => *existing = channel,
            None => guild.channels.push(channel),
        }
        true
    }

    pub fn remove_channel(&mut self, channel: &Channel) -> bool {
        if !VOICE_CHANNEL_TYPES.contains(&channel.kind) {
            return false;
        }
        let Some(guild) = channel
            .guild_id
            .as_ref()
            .and_then(|id| self.guilds.iter_mut().find(|g| &g.id == id))
        else {
            return false;
        };
        let before = guild.channels.len();
        guild.channels.retain(|c| c.id != channel.id);
        guild.channels.len() != before
    }

    pub fn clear(&mut self) {
        self.guilds.clear();
    }

    /// Voice channels per guild, sorted by position.
    pub fn summary(&self) -> Vec<VoiceGuild> {
        self.guilds
            .iter()
            .map(|guild| {
                let mut voice_channels: Vec<VoiceChannel> = guild
                    .channels
                    .iter()
                    .filter(|c| VOICE_CHANNEL_TYPES.contains(&c.kind))
                    .map(|c| VoiceChannel {
                        id: c.id.clone(),
                        name: c.name.clone().unwrap_or_default(),
                        position: c.position,
                    })
                    .collect();
                voice_channels.sort_by_key(|c| c.position);

                VoiceGuild {
                    id: guild.id.clone(),
                    name: guild.name.clone(),
                    icon: icon_url(&BaseGuild {
                        id: guild.id.clone(),
                        name: String::new(),
                        icon: guild.icon.clone(),
                        permissions: None,
                    }),
                    voice_channels,
                }
            })
            .collect()
    }
}
