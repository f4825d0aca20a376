use futures::future::try_join_all;

use super::{
    client::DiscordRest,
    models::{BaseGuild, VoiceChannel, VoiceGuild},
    permissions::{Permission, has_permission},
};
use crate::{
    common::{errors::RestError, types::UserId},
    gateway::constants::CDN_URL,
};

const REQUIRED: [Permission; 3] = [
    Permission::ViewChannel,
    Permission::Connect,
    Permission::Speak,
];

/// Lists every guild of the current user together with the voice channels
/// the bot can see, connect to and speak in.
pub async fn voice_guilds(
    rest: &dyn DiscordRest,
    user_id: &UserId,
) -> Result<Vec<VoiceGuild>, RestError> {
    let guilds = rest.user_guilds().await?;
    try_join_all(guilds.into_iter().map(|guild| expand(rest, user_id, guild))).await
}

async fn expand(
    rest: &dyn DiscordRest,
    user_id: &UserId,
    guild: BaseGuild,
) -> Result<VoiceGuild, RestError> {
    let member = rest.guild_member(&guild.id, user_id).await?;
    let channels = rest.guild_channels(&guild.id).await?;

    let mut voice_channels: Vec<VoiceChannel> = channels
        .into_iter()
        .filter(|c| c.bitrate.is_some_and(|b| b > 0))
        .filter(|c| {
            REQUIRED
                .iter()
                .all(|p| has_permission(&member, &guild, c, *p))
        })
        .map(|c| VoiceChannel {
            id: c.id,
            name: c.name.unwrap_or_default(),
            position: c.position,
        })
        .collect();
    voice_channels.sort_by_key(|c| c.position);

    Ok(VoiceGuild {
        icon: icon_url(&guild),
        id: guild.id,
        name: guild.name,
        voice_channels,
    })
}

pub fn icon_url(guild: &BaseGuild) -> String {
    format!(
        "{}/icons/{}/{}.webp",
        CDN_URL,
        guild.id,
        guild.icon.as_deref().unwrap_or("null")
    )
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        common::types::GuildId,
        rest::models::{Channel, GatewayDescription, GuildMember, Overwrite, OverwriteKind},
    };

    struct FakeRest;

    const ALL: u64 = (1 << 10) | (1 << 20) | (1 << 21);

    fn voice(id: &str, position: i64, overwrites: Vec<Overwrite>) -> Channel {
        Channel {
            id: id.into(),
            kind: 2,
            guild_id: Some("1".into()),
            position,
            name: Some(format!("vc-{}", id)),
            bitrate: Some(64_000),
            permission_overwrites: overwrites,
        }
    }

    #[async_trait]
    impl DiscordRest for FakeRest {
        async fn gateway_description(&self) -> Result<GatewayDescription, RestError> {
            unreachable!()
        }

        async fn user_guilds(&self) -> Result<Vec<BaseGuild>, RestError> {
            Ok(vec![BaseGuild {
                id: "1".into(),
                name: "Tavern".into(),
                icon: Some("abc".into()),
                permissions: Some(ALL.to_string()),
            }])
        }

        async fn guild_member(
            &self,
            _guild: &GuildId,
            _user: &UserId,
        ) -> Result<GuildMember, RestError> {
            Ok(GuildMember {
                user: None,
                roles: vec![],
            })
        }

        async fn guild_channels(&self, _guild: &GuildId) -> Result<Vec<Channel>, RestError> {
            let mut text = voice("9", 0, vec![]);
            text.kind = 0;
            text.bitrate = None;
            Ok(vec![
                voice("3", 5, vec![]),
                text,
                voice("2", 1, vec![]),
                voice(
                    "4",
                    2,
                    vec![Overwrite {
                        id: "1".into(),
                        kind: OverwriteKind::Role,
                        allow: "0".into(),
                        deny: (1u64 << 21).to_string(),
                    }],
                ),
            ])
        }
    }

    #[tokio::test]
    async fn lists_sorted_speakable_voice_channels() {
        let guilds = voice_guilds(&FakeRest, &UserId::from("7")).await.unwrap();
        assert_eq!(guilds.len(), 1);

        let guild = &guilds[0];
        assert_eq!(guild.icon, "https://cdn.discordapp.com/icons/1/abc.webp");
        let ids: Vec<&str> = guild.voice_channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["2", "3"]);
    }
}
