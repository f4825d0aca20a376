//! Per-call voice gateway session.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::{
    close_code::{self, VoiceCloseCode},
    events::{
        SessionDescription, VoiceCommand, VoiceEvent, VoiceIdentify, VoiceProtocol, VoiceReady,
        VoiceResume,
    },
};
use crate::{
    common::{
        errors::{GatewayError, VoiceError},
        types::{ConnectionState, GuildId, UserId},
    },
    gateway::{
        constants::VOICE_GATEWAY_VERSION,
        session::{CloseOutcome, SessionState},
        socket::{GatewaySocket, SocketEvent, SocketId},
    },
};

/// Everything needed to open a voice gateway, assembled once both halves of
/// the voice handshake have arrived on the control gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceGatewayDescription {
    pub token: String,
    pub guild_id: GuildId,
    pub endpoint: String,
    pub session_id: String,
    pub user_id: UserId,
}

/// `wss://{endpoint}/?v=8`, unless the endpoint already names a scheme.
pub fn voice_url(endpoint: &str) -> String {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.to_string()
    } else {
        format!("wss://{}/?v={}", endpoint, VOICE_GATEWAY_VERSION)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceNotification {
    State(ConnectionState),
    Ready(VoiceReady),
    Session(SessionDescription),
    Resumed,
    Error(VoiceError),
}

/// An open voice session, as seen by its owning `VoiceConnection`.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    fn connection_state(&self) -> ConnectionState;

    async fn send(&self, command: VoiceCommand) -> Result<(), VoiceError>;

    async fn disconnect(&self);
}

/// Opens voice sessions; lets tests observe how many get created.
pub trait VoiceConnector: Send + Sync {
    fn open(
        &self,
        description: VoiceGatewayDescription,
    ) -> (
        Arc<dyn VoiceSession>,
        mpsc::UnboundedReceiver<VoiceNotification>,
    );
}

/// Connector backed by real [`VoiceGateway`]s.
pub struct GatewayConnector;

impl VoiceConnector for GatewayConnector {
    fn open(
        &self,
        description: VoiceGatewayDescription,
    ) -> (
        Arc<dyn VoiceSession>,
        mpsc::UnboundedReceiver<VoiceNotification>,
    ) {
        let (gateway, notifications) = VoiceGateway::spawn(description);
        (Arc::new(gateway), notifications)
    }
}

enum Request {
    Send(VoiceCommand, oneshot::Sender<Result<(), VoiceError>>),
    Disconnect(oneshot::Sender<()>),
    Retry { generation: u64 },
}

#[derive(Clone)]
pub struct VoiceGateway {
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<ConnectionState>,
}

impl VoiceGateway {
    /// Spawns the session actor and starts connecting immediately.
    pub fn spawn(
        description: VoiceGatewayDescription,
    ) -> (Self, mpsc::UnboundedReceiver<VoiceNotification>) {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (notifications, notifications_rx) = mpsc::unbounded_channel();
        let (socket_events, socket_rx) = mpsc::unbounded_channel();

        let mut actor = VoiceGatewayActor {
            description,
            session: SessionState::new(),
            socket: None,
            socket_events,
            requests: requests.downgrade(),
            state: state_tx,
            notifications,
        };
        actor.connect();
        tokio::spawn(actor.run(requests_rx, socket_rx));

        (Self { requests, state }, notifications_rx)
    }
}

#[async_trait]
impl VoiceSession for VoiceGateway {
    fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn send(&self, command: VoiceCommand) -> Result<(), VoiceError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Send(command, tx))
            .map_err(|_| GatewayError::Stopped)?;
        rx.await.map_err(|_| GatewayError::Stopped)?
    }

    async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(Request::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

struct VoiceGatewayActor {
    description: VoiceGatewayDescription,
    session: SessionState,
    socket: Option<GatewaySocket<VoiceProtocol>>,
    socket_events: mpsc::UnboundedSender<(SocketId, SocketEvent<VoiceEvent>)>,
    requests: mpsc::WeakUnboundedSender<Request>,
    state: watch::Sender<ConnectionState>,
    notifications: mpsc::UnboundedSender<VoiceNotification>,
}

impl VoiceGatewayActor {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut socket_rx: mpsc::UnboundedReceiver<(SocketId, SocketEvent<VoiceEvent>)>,
    ) {
        loop {
            tokio::select! {
                req = requests.recv() => match req {
                    Some(req) => self.handle_request(req),
                    None => break,
                },
                Some((id, event)) = socket_rx.recv() => self.handle_socket(id, event),
            }
        }

        if let Some(socket) = self.socket.take() {
            socket.close(VoiceCloseCode::NormalClosure.code());
        }
        debug!("[{}] voice gateway task stopped", self.description.guild_id);
    }

    fn handle_request(&mut self, req: Request) {
        match req {
            Request::Send(command, reply) => {
                let res = match &self.socket {
                    Some(socket) => socket.send(command).map_err(VoiceError::from),
                    None => Err(VoiceError::VoiceGatewayNotReady { action: "send" }),
                };
                let _ = reply.send(res);
            }
            Request::Disconnect(reply) => {
                if let Some(socket) = self.socket.take() {
                    debug!("[{}] voice gateway manual disconnect", self.description.guild_id);
                    socket.close(VoiceCloseCode::NormalClosure.code());
                }
                self.session.disconnect();
                self.set_state(ConnectionState::Disconnected);
                let _ = reply.send(());
            }
            Request::Retry { generation } => {
                if self.session.should_retry(generation, self.socket.is_some()) {
                    info!(
                        "[{}] voice gateway reconnecting (attempt {})",
                        self.description.guild_id,
                        self.session.retries()
                    );
                    self.connect();
                } else {
                    debug!("[{}] voice gateway reconnect ignored", self.description.guild_id);
                }
            }
        }
    }

    fn connect(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.close(VoiceCloseCode::Reconnecting.code());
        }
        let id = self.session.begin_socket();
        self.set_state(ConnectionState::Connecting);
        let url = voice_url(&self.description.endpoint);
        self.socket = Some(GatewaySocket::open(id, url, self.socket_events.clone()));
    }

    fn handle_socket(&mut self, id: SocketId, event: SocketEvent<VoiceEvent>) {
        if !self.session.is_current(id) || self.socket.is_none() {
            return;
        }

        match event {
            SocketEvent::Open => {
                if self.session.can_resume() {
                    let resume = VoiceResume {
                        server_id: self.description.guild_id.to_string(),
                        session_id: self.description.session_id.clone(),
                        token: self.description.token.clone(),
                        seq_ack: self.session.sequence().unwrap_or_default(),
                    };
                    debug!("[{}] voice gateway resuming", self.description.guild_id);
                    self.send(VoiceCommand::Resume(resume));
                }
            }
            SocketEvent::Frame(frame) => {
                self.session.observe(frame.sequence);
                self.handle_event(frame.event);
            }
            SocketEvent::Close(code) => {
                self.socket = None;
                self.handle_close(code);
            }
        }
    }

    fn handle_event(&mut self, event: VoiceEvent) {
        match event {
            VoiceEvent::Hello { .. } => {
                if self.session.on_hello() {
                    let identify = VoiceIdentify {
                        server_id: self.description.guild_id.to_string(),
                        user_id: self.description.user_id.to_string(),
                        session_id: self.description.session_id.clone(),
                        token: self.description.token.clone(),
                    };
                    debug!("[{}] voice gateway identifying", self.description.guild_id);
                    self.send(VoiceCommand::Identify(identify));
                }
            }
            VoiceEvent::Ready(ready) => {
                info!(
                    "[{}] voice gateway ready (ssrc {}, {}:{})",
                    self.description.guild_id, ready.ssrc, ready.ip, ready.port
                );
                self.session.establish(self.description.session_id.clone());
                self.session.mark_ready();
                self.set_state(ConnectionState::Ready);
                self.notify(VoiceNotification::Ready(ready));
            }
            VoiceEvent::Resumed => {
                info!("[{}] voice gateway resumed", self.description.guild_id);
                self.session.mark_ready();
                self.set_state(ConnectionState::Ready);
                self.notify(VoiceNotification::Resumed);
            }
            VoiceEvent::SessionDescription(session) => {
                debug!(
                    "[{}] voice session description received (mode {})",
                    self.description.guild_id, session.mode
                );
                self.notify(VoiceNotification::Session(session));
            }
            VoiceEvent::ClientDisconnect { user_id } => {
                debug!(
                    "[{}] client disconnected: {:?}",
                    self.description.guild_id, user_id
                );
            }
            VoiceEvent::Speaking(_)
            | VoiceEvent::Heartbeat
            | VoiceEvent::HeartbeatAck
            | VoiceEvent::Unknown { .. } => {}
        }
    }

    fn handle_close(&mut self, code: u16) {
        let action = close_code::classify(code);
        info!(
            "[{}] voice gateway closed with code {} ({:?})",
            self.description.guild_id, code, action
        );

        match self.session.on_close(action) {
            CloseOutcome::Retry { after, generation } => {
                debug!(
                    "[{}] voice gateway reconnecting in {:?}",
                    self.description.guild_id, after
                );
                let requests = self.requests.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    if let Some(requests) = requests.upgrade() {
                        let _ = requests.send(Request::Retry { generation });
                    }
                });
            }
            CloseOutcome::Fatal => {
                warn!(
                    "[{}] voice gateway closed with fatal code {}",
                    self.description.guild_id, code
                );
                self.notify(VoiceNotification::Error(VoiceError::Closed { code }));
            }
            CloseOutcome::Ignore => {}
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn send(&self, command: VoiceCommand) {
        if let Some(socket) = &self.socket {
            if let Err(e) = socket.send(command) {
                warn!("[{}] {}", self.description.guild_id, e);
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state.borrow() != state {
            self.state.send_replace(state);
            self.notify(VoiceNotification::State(state));
        }
    }

    fn notify(&self, notification: VoiceNotification) {
        let _ = self.notifications.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_becomes_a_versioned_wss_url() {
        assert_eq!(
            voice_url("c-ams01.discord.media:443"),
            "wss://c-ams01.discord.media:443/?v=8"
        );
        assert_eq!(voice_url("ws://127.0.0.1:9000"), "ws://127.0.0.1:9000");
    }
}
