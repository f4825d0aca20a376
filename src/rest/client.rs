use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::models::{ApiErrorBody, BaseGuild, Channel, GatewayDescription, GuildMember};
use crate::common::{
    errors::RestError,
    http::HttpClient,
    types::{GuildId, UserId},
};

/// The subset of the Discord REST API the gateway and guild listing need.
#[async_trait]
pub trait DiscordRest: Send + Sync {
    async fn gateway_description(&self) -> Result<GatewayDescription, RestError>;

    async fn user_guilds(&self) -> Result<Vec<BaseGuild>, RestError>;

    async fn guild_member(&self, guild: &GuildId, user: &UserId)
    -> Result<GuildMember, RestError>;

    async fn guild_channels(&self, guild: &GuildId) -> Result<Vec<Channel>, RestError>;
}

pub struct HttpRest {
    client: reqwest::Client,
    api_url: String,
}

impl HttpRest {
    pub fn new(token: &str, api_url: impl Into<String>) -> Result<Self, RestError> {
        let client = HttpClient::discord(token)?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        let url = format!("{}{}", self.api_url, path);
        debug!("GET {}", url);

        let res = self.client.get(&url).send().await?;
        let status = res.status();
        let body = res.bytes().await?;

        if !status.is_success() {
            return Err(match serde_json::from_slice::<ApiErrorBody>(&body) {
                Ok(err) => RestError::Api {
                    code: err.code,
                    message: err.message,
                },
                Err(_) => RestError::Http(format!("{} {}", status, url)),
            });
        }

        serde_json::from_slice(&body).map_err(|e| RestError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DiscordRest for HttpRest {
    async fn gateway_description(&self) -> Result<GatewayDescription, RestError> {
        self.get("/gateway/bot").await
    }

    async fn user_guilds(&self) -> Result<Vec<BaseGuild>, RestError> {
        self.get("/users/@me/guilds").await
    }

    async fn guild_member(
        &self,
        guild: &GuildId,
        user: &UserId,
    ) -> Result<GuildMember, RestError> {
        self.get(&format!("/guilds/{}/members/{}", guild, user)).await
    }

    async fn guild_channels(&self, guild: &GuildId) -> Result<Vec<Channel>, RestError> {
        self.get(&format!("/guilds/{}/channels", guild)).await
    }
}
