//! Top-level coordinator: one control gateway, one voice connection per
//! guild, and a single outbound event stream for whatever drives it.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    common::{
        errors::{GatewayError, VoiceError},
        types::{ChannelId, GuildId},
    },
    configs::discord::DiscordConfig,
    gateway::{ControlGateway, Gateway, GatewayNotification},
    rest::{DiscordRest, HttpRest, models::User, models::VoiceGuild, voice_guilds},
    voice::{
        GatewayConnector, VoiceConnection, VoiceConnector, VoiceNotification,
        connection::VoiceEvents,
        events::{SPEAKING_SOUNDSHARE, SelectProtocol, SessionDescription, Speaking, VoiceReady},
        udp::discover_ip,
    },
};

/// Everything the native encoder needs to start sending audio.
#[derive(Debug, Clone)]
pub struct VoiceSessionInfo {
    pub guild_id: GuildId,
    pub ssrc: u32,
    pub mode: String,
    pub secret_key: Vec<u8>,
    pub server: SocketAddr,
    /// The socket used for IP discovery; its NAT mapping is the one the
    /// voice server now expects traffic from.
    pub socket: Arc<UdpSocket>,
}

#[derive(Debug, Clone)]
pub enum ManagerEvent {
    Ready(User),
    Disconnected,
    Guilds(Vec<VoiceGuild>),
    ChannelJoined {
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    ChannelLeft {
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
    },
    VoiceSession(VoiceSessionInfo),
    Error(String),
    Message(String),
}

struct ControlSession {
    gateway: Gateway,
    pump: JoinHandle<()>,
}

struct UdpSession {
    connection: u64,
    ssrc: u32,
    mode: &'static str,
    server: SocketAddr,
    socket: Arc<UdpSocket>,
}

struct Inner {
    config: DiscordConfig,
    connector: Arc<dyn VoiceConnector>,
    control: Mutex<Option<ControlSession>>,
    connections: DashMap<GuildId, Arc<VoiceConnection>>,
    channels: DashMap<GuildId, ChannelId>,
    udp: DashMap<GuildId, UdpSession>,
    next_connection: AtomicU64,
    events: mpsc::UnboundedSender<ManagerEvent>,
    voice_events: VoiceEvents,
}

#[derive(Clone)]
pub struct DiscordManager {
    inner: Arc<Inner>,
}

impl DiscordManager {
    pub fn new(config: DiscordConfig) -> (Self, mpsc::UnboundedReceiver<ManagerEvent>) {
        Self::with_connector(config, Arc::new(GatewayConnector))
    }

    pub fn with_connector(
        config: DiscordConfig,
        connector: Arc<dyn VoiceConnector>,
    ) -> (Self, mpsc::UnboundedReceiver<ManagerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (voice_events, voice_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            config,
            connector,
            control: Mutex::new(None),
            connections: DashMap::new(),
            channels: DashMap::new(),
            udp: DashMap::new(),
            next_connection: AtomicU64::new(0),
            events,
            voice_events,
        });
        tokio::spawn(voice_pump(Arc::downgrade(&inner), voice_rx));

        (Self { inner }, events_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.control.lock().is_some()
    }

    /// Starts the control gateway with `token`.
    pub async fn connect(&self, token: &str) {
        let inner = &self.inner;
        if token.is_empty() {
            inner.emit(ManagerEvent::Disconnected);
            inner.emit(ManagerEvent::Error(
                "Error connecting to bot: Invalid token".into(),
            ));
            return;
        }
        if self.is_connected() {
            inner.emit(ManagerEvent::Disconnected);
            inner.emit(ManagerEvent::Error(
                "Error connecting to bot: Already connected".into(),
            ));
            return;
        }

        let rest: Arc<dyn DiscordRest> = match HttpRest::new(token, inner.config.api_url.as_str()) {
            Ok(rest) => Arc::new(rest),
            Err(e) => {
                inner.emit(ManagerEvent::Disconnected);
                inner.emit(ManagerEvent::Error(format!("Error connecting to bot: {}", e)));
                return;
            }
        };

        let (gateway, notifications) = Gateway::spawn(token, rest.clone());
        let pump = tokio::spawn(gateway_pump(
            Arc::downgrade(inner),
            gateway.clone(),
            rest,
            notifications,
        ));
        *inner.control.lock() = Some(ControlSession {
            gateway: gateway.clone(),
            pump,
        });

        if let Err(e) = gateway.connect().await {
            error!("discord manager connect error: {}", e);
            inner.emit(ManagerEvent::Disconnected);
            inner.emit(ManagerEvent::Error(format!("Error connecting to bot: {}", e)));
            if let Some(control) = inner.control.lock().take() {
                control.pump.abort();
            }
            gateway.disconnect().await;
        }
    }

    /// Leaves every voice channel and closes the control gateway.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.emit(ManagerEvent::Disconnected);
        inner.emit(ManagerEvent::Guilds(Vec::new()));

        let guilds: Vec<GuildId> = inner.connections.iter().map(|e| e.key().clone()).collect();
        for guild_id in guilds {
            inner.leave(&guild_id, None).await;
        }

        let control = inner.control.lock().take();
        if let Some(control) = control {
            control.pump.abort();
            control.gateway.disconnect().await;
        }
        debug!("discord manager disconnect");
    }

    /// Joins `channel_id`, replacing any voice connection in the same guild.
    pub async fn join_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        let inner = &self.inner;
        let gateway = match inner.gateway() {
            Some(gateway) => gateway,
            None => {
                inner
                    .fail(&guild_id, None, Some(channel_id), "Discord client not ready")
                    .await;
                return;
            }
        };

        if inner.connections.contains_key(&guild_id) {
            debug!("[{}] leaving previous voice channel", guild_id);
            inner.leave(&guild_id, None).await;
        }

        info!("[{}] joining channel {}", guild_id, channel_id);
        let id = inner.next_connection_id();
        let connection = Arc::new(VoiceConnection::new(
            guild_id.clone(),
            id,
            Arc::new(gateway) as Arc<dyn ControlGateway>,
            inner.connector.clone(),
            Duration::from_millis(inner.config.connect_timeout_ms),
            inner.voice_events.clone(),
        ));
        inner
            .connections
            .insert(guild_id.clone(), connection.clone());
        inner.channels.insert(guild_id.clone(), channel_id.clone());

        match connection.connect(Some(channel_id.clone())).await {
            Ok(()) if inner.current(&guild_id, id).is_some() => {
                inner.emit(ManagerEvent::ChannelJoined {
                    guild_id,
                    channel_id,
                })
            }
            Ok(()) => debug!("[{}] join of {} was superseded", guild_id, channel_id),
            Err(e) => inner.fail(&guild_id, Some(id), Some(channel_id), e).await,
        }
    }

    pub async fn leave_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        let inner = &self.inner;
        if inner.gateway().is_none() {
            inner.emit(ManagerEvent::Error(
                "Error leaving channel: Discord client not ready".into(),
            ));
        } else {
            debug!("[{}] leaving channel {}", guild_id, channel_id);
            inner.leave(&guild_id, None).await;
        }
        inner.emit(ManagerEvent::ChannelLeft {
            guild_id,
            channel_id: Some(channel_id),
        });
    }
}

impl Inner {
    fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }

    fn gateway(&self) -> Option<Gateway> {
        self.control.lock().as_ref().map(|c| c.gateway.clone())
    }

    fn next_connection_id(&self) -> u64 {
        self.next_connection.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The guild's connection, if it is still the one tagged `id`.
    fn current(&self, guild_id: &GuildId, id: u64) -> Option<Arc<VoiceConnection>> {
        self.connections
            .get(guild_id)
            .filter(|c| c.id() == id)
            .map(|c| c.clone())
    }

    /// Tears the guild's connection down. With `Some(id)`, only a connection
    /// still tagged `id` is touched.
    async fn leave(&self, guild_id: &GuildId, connection: Option<u64>) {
        let removed = match connection {
            Some(id) => self.connections.remove_if(guild_id, |_, c| c.id() == id),
            None => self.connections.remove(guild_id),
        };
        if connection.is_some() && removed.is_none() {
            return;
        }
        self.channels.remove(guild_id);
        self.udp.remove(guild_id);
        if let Some((_, connection)) = removed {
            connection.disconnect().await;
        }
    }

    /// Reports a voice failure and tears the guild's connection down.
    /// Failures of a connection that was already replaced are dropped.
    async fn fail(
        &self,
        guild_id: &GuildId,
        connection: Option<u64>,
        channel_id: Option<ChannelId>,
        error: impl std::fmt::Display,
    ) {
        if let Some(id) = connection {
            if self.current(guild_id, id).is_none() {
                debug!(
                    "[{}] ignoring error of replaced connection {}: {}",
                    guild_id, id, error
                );
                return;
            }
        }
        error!("[{}] discord manager channel error: {}", guild_id, error);
        let channel_id = channel_id.or_else(|| self.channels.get(guild_id).map(|c| c.clone()));
        self.emit(ManagerEvent::ChannelLeft {
            guild_id: guild_id.clone(),
            channel_id,
        });
        self.emit(ManagerEvent::Error(format!("Voice channel error: {}", error)));
        self.leave(guild_id, connection).await;
    }

    /// Picks a mode, announces speaking, discovers our external address and
    /// selects the UDP protocol.
    async fn on_voice_ready(
        &self,
        guild_id: &GuildId,
        connection: &VoiceConnection,
        ready: VoiceReady,
    ) -> Result<(), VoiceError> {
        let mode = ready
            .select_mode()
            .ok_or_else(|| VoiceError::UnsupportedMode(ready.modes.join(", ")))?;

        connection
            .update_speaking(Speaking {
                speaking: SPEAKING_SOUNDSHARE,
                delay: 0,
                ssrc: ready.ssrc,
            })
            .await?;

        let server = tokio::net::lookup_host((ready.ip.as_str(), ready.port))
            .await
            .map_err(|e| VoiceError::Discovery(e.to_string()))?
            .next()
            .ok_or_else(|| VoiceError::Discovery(format!("unable to resolve {}", ready.ip)))?;
        let bind = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| VoiceError::Discovery(e.to_string()))?;

        let external = discover_ip(&socket, server, ready.ssrc).await?;
        debug!(
            "[{}] discovered external address {}:{}",
            guild_id, external.ip, external.port
        );

        if self.current(guild_id, connection.id()).is_none() {
            debug!("[{}] connection replaced during ip discovery", guild_id);
            return Ok(());
        }
        self.udp.insert(
            guild_id.clone(),
            UdpSession {
                connection: connection.id(),
                ssrc: ready.ssrc,
                mode,
                server,
                socket: Arc::new(socket),
            },
        );
        connection
            .select_protocol(SelectProtocol::udp(external.ip, external.port, mode))
            .await
    }

    fn on_session(
        &self,
        guild_id: &GuildId,
        connection: u64,
        session: SessionDescription,
    ) -> Result<VoiceSessionInfo, VoiceError> {
        let udp = self
            .udp
            .get(guild_id)
            .filter(|udp| udp.connection == connection)
            .ok_or(VoiceError::NoVoiceGateway {
                action: "start session",
            })?;
        if session.mode != udp.mode {
            warn!(
                "[{}] server chose mode {} instead of {}",
                guild_id, session.mode, udp.mode
            );
        }
        Ok(VoiceSessionInfo {
            guild_id: guild_id.clone(),
            ssrc: udp.ssrc,
            mode: session.mode,
            secret_key: session.secret_key,
            server: udp.server,
            socket: udp.socket.clone(),
        })
    }
}

async fn gateway_pump(
    inner: Weak<Inner>,
    gateway: Gateway,
    rest: Arc<dyn DiscordRest>,
    mut notifications: mpsc::UnboundedReceiver<GatewayNotification>,
) {
    while let Some(notification) = notifications.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match notification {
            GatewayNotification::Ready(user) => {
                debug!("discord manager ready as {}", user.username);
                inner.emit(ManagerEvent::Ready(user));
                inner.emit(ManagerEvent::Message("Connected".into()));
            }
            GatewayNotification::Resumed => {
                let Some(user) = gateway.user() else {
                    continue;
                };
                match voice_guilds(&*rest, &user.id).await {
                    Ok(guilds) => inner.emit(ManagerEvent::Guilds(guilds)),
                    Err(e) => warn!("unable to refresh guilds after resume: {}", e),
                }
            }
            GatewayNotification::Guilds(guilds) => inner.emit(ManagerEvent::Guilds(guilds)),
            GatewayNotification::Error(e) => {
                error!("discord manager gateway error: {}", e);
                // Anything else is still being retried by the gateway.
                if matches!(e, GatewayError::FatalClose { .. }) {
                    inner.emit(ManagerEvent::Disconnected);
                }
                inner.emit(ManagerEvent::Error(format!("Discord error: {}", e)));
            }
            GatewayNotification::State(state) => debug!("gateway state {:?}", state),
        }
    }
}

async fn voice_pump(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<(GuildId, u64, VoiceNotification)>,
) {
    while let Some((guild_id, id, notification)) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let Some(connection) = inner.current(&guild_id, id) else {
            debug!(
                "[{}] dropping notification of replaced connection {}",
                guild_id, id
            );
            continue;
        };
        match notification {
            VoiceNotification::Ready(ready) => {
                tokio::spawn(async move {
                    if let Err(e) = inner.on_voice_ready(&guild_id, &connection, ready).await {
                        inner.fail(&guild_id, Some(id), None, e).await;
                    }
                });
            }
            VoiceNotification::Session(session) => match inner.on_session(&guild_id, id, session) {
                Ok(info) => {
                    info!("[{}] voice session ready (mode {})", guild_id, info.mode);
                    inner.emit(ManagerEvent::VoiceSession(info));
                }
                Err(e) => inner.fail(&guild_id, Some(id), None, e).await,
            },
            VoiceNotification::Error(e) => inner.fail(&guild_id, Some(id), None, e).await,
            VoiceNotification::Resumed => debug!("[{}] voice session resumed", guild_id),
            VoiceNotification::State(state) => debug!("[{}] voice state {:?}", guild_id, state),
        }
    }
}
