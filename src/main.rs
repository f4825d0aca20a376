use tracing::{error, info, warn};
use voxbridge::{
    DiscordManager, ManagerEvent,
    capture::{self, CapturePipeline},
    common::{
        banner::{BuildInfo, print_banner},
        logger,
        types::AnyResult,
    },
    configs::{CaptureConfig, Config},
};

struct Capture {
    pipeline: CapturePipeline,
    #[cfg(feature = "device-capture")]
    device: Option<voxbridge::capture::device::DeviceCapture>,
}

impl Capture {
    /// Capture failures leave the bridge running without audio.
    async fn start(config: &CaptureConfig) -> Option<Self> {
        let (pipeline, producer) = match CapturePipeline::start(config).await {
            Ok(started) => started,
            Err(e) => {
                error!("capture pipeline failed to start: {}", e);
                return None;
            }
        };

        #[cfg(feature = "device-capture")]
        let device = match voxbridge::capture::device::DeviceCapture::start(config, producer) {
            Ok(device) => Some(device),
            Err(e) => {
                error!("audio device unavailable, capturing nothing: {}", e);
                None
            }
        };
        // Unreachable once `capture::ensure_source` has passed.
        #[cfg(not(feature = "device-capture"))]
        drop(producer);

        Some(Self {
            pipeline,
            #[cfg(feature = "device-capture")]
            device,
        })
    }

    async fn stop(self) {
        #[cfg(feature = "device-capture")]
        if let Some(device) = self.device {
            device.stop();
        }
        self.pipeline.stop().await;
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;

    let build = BuildInfo::default();
    print_banner(&build);
    logger::init(config.logging.as_ref());
    info!(
        "voxbridge {} ({}@{}, built {}, {})",
        build.version,
        build.branch,
        build.commit_short(),
        build.build_time,
        build.profile
    );

    let token = std::env::var("VOXBRIDGE_TOKEN")
        .ok()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| config.discord.token.clone());

    capture::ensure_source(&config.capture, capture::HAS_DEVICE_SOURCE)?;
    let capture = if config.capture.enabled {
        Capture::start(&config.capture).await
    } else {
        None
    };

    let (manager, mut events) = DiscordManager::new(config.discord.clone());
    manager.connect(&token).await;

    let auto_join = config
        .discord
        .guild_id
        .clone()
        .zip(config.discord.channel_id.clone());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(ManagerEvent::Ready(user)) => {
                    info!("logged in as {} ({})", user.username, user.id);
                    if let Some((guild_id, channel_id)) = auto_join.clone() {
                        let manager = manager.clone();
                        tokio::spawn(async move {
                            manager.join_channel(guild_id.into(), channel_id.into()).await;
                        });
                    }
                }
                Some(ManagerEvent::Guilds(guilds)) => {
                    info!("{} guilds with voice channels available", guilds.len())
                }
                Some(ManagerEvent::ChannelJoined { guild_id, channel_id }) => {
                    info!("[{}] joined channel {}", guild_id, channel_id)
                }
                Some(ManagerEvent::ChannelLeft { guild_id, channel_id }) => {
                    info!("[{}] left channel {:?}", guild_id, channel_id)
                }
                Some(ManagerEvent::VoiceSession(session)) => info!(
                    "[{}] voice session ready: ssrc {}, mode {}, server {}",
                    session.guild_id, session.ssrc, session.mode, session.server
                ),
                Some(ManagerEvent::Message(message)) => info!("{}", message),
                Some(ManagerEvent::Error(message)) => error!("{}", message),
                Some(ManagerEvent::Disconnected) => warn!("disconnected from discord"),
                None => break,
            },
        }
    }

    info!("shutting down");
    manager.disconnect().await;
    if let Some(capture) = capture {
        capture.stop().await;
    }

    Ok(())
}
