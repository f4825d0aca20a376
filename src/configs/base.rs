use serde::{Deserialize, Serialize};

use crate::{common::types::AnyResult, configs::*};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn load() -> AnyResult<Self> {
        let config_path = if std::path::Path::new("config.toml").exists() {
            "config.toml"
        } else if std::path::Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            return Err("config.toml or config.default.toml not found".into());
        };

        println!("Loading configuration from: {}", config_path);

        let config_str = std::fs::read_to_string(config_path)?;
        Self::parse(&config_str).map_err(|e| format!("{}: {}", config_path, e).into())
    }

    pub fn parse(config_str: &str) -> AnyResult<Self> {
        if config_str.trim().is_empty() {
            return Err("configuration is empty".into());
        }
        let config: Config = toml::from_str(config_str)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tables_fall_back_to_defaults() {
        let config = Config::parse("[discord]\ntoken = \"abc\"\n").unwrap();
        assert_eq!(config.discord.token, "abc");
        assert_eq!(config.discord.connect_timeout_ms, 5_000);
        assert!(!config.capture.enabled);
        assert_eq!(config.capture.ring_length, 8_192);
        assert_eq!(config.capture.transport, TransportKind::Udp);
        assert!(config.logging.is_none());
    }

    #[test]
    fn capture_table_is_parsed() {
        let config = Config::parse(
            r#"
            [capture]
            enabled = true
            transport = "websocket"
            websocket_url = "ws://127.0.0.1:9001"
            ring_length = 4096

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert!(config.capture.enabled);
        assert_eq!(config.capture.transport, TransportKind::Websocket);
        assert_eq!(config.capture.ring_length, 4096);
        assert_eq!(config.capture.sample_rate, 48_000);
        assert_eq!(
            config.logging.and_then(|l| l.level).as_deref(),
            Some("debug")
        );
    }

    #[test]
    fn empty_configuration_is_rejected() {
        assert!(Config::parse("   \n").is_err());
    }
}
