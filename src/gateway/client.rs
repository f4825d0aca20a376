//! The control gateway session manager.
//!
//! [`Gateway`] is a cheap handle to an actor task that owns the socket, the
//! session state and every retry timer. Dispatch events fan out on a
//! broadcast channel; lifecycle changes go to a notification channel.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::{
    close_code::{self, CloseAction, GatewayCloseCode},
    constants::{API_VERSION, DISPATCH_CHANNEL_CAPACITY, INTENTS},
    events::{ControlProtocol, DispatchEvent, GatewayCommand, GatewayEvent, Identify, Resume},
    guilds::GuildCache,
    session::{CloseOutcome, SessionState},
    socket::{GatewaySocket, SocketEvent, SocketId},
};
use crate::{
    common::{
        errors::GatewayError,
        types::{ConnectionState, UserId},
    },
    rest::{
        DiscordRest,
        models::{GatewayDescription, User, VoiceGuild},
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayNotification {
    State(ConnectionState),
    Ready(User),
    Resumed,
    Guilds(Vec<VoiceGuild>),
    Error(GatewayError),
}

/// What a voice connection needs from the control gateway.
#[async_trait]
pub trait ControlGateway: Send + Sync {
    fn connection_state(&self) -> ConnectionState;

    fn user_id(&self) -> Option<UserId>;

    fn subscribe(&self) -> broadcast::Receiver<DispatchEvent>;

    async fn send(&self, command: GatewayCommand) -> Result<(), GatewayError>;
}

enum Request {
    Connect(oneshot::Sender<Result<(), GatewayError>>),
    Disconnect(oneshot::Sender<()>),
    Send(GatewayCommand, oneshot::Sender<Result<(), GatewayError>>),
    Guilds(oneshot::Sender<Vec<VoiceGuild>>),
    Retry { generation: u64 },
}

#[derive(Clone)]
pub struct Gateway {
    requests: mpsc::UnboundedSender<Request>,
    dispatch: broadcast::Sender<DispatchEvent>,
    state: watch::Receiver<ConnectionState>,
    user: Arc<RwLock<Option<User>>>,
}

impl Gateway {
    /// Spawns the session actor. Nothing connects until [`Gateway::connect`].
    pub fn spawn(
        token: impl Into<String>,
        rest: Arc<dyn DiscordRest>,
    ) -> (Self, mpsc::UnboundedReceiver<GatewayNotification>) {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (dispatch, _) = broadcast::channel(DISPATCH_CHANNEL_CAPACITY);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (notifications, notifications_rx) = mpsc::unbounded_channel();
        let (socket_events, socket_rx) = mpsc::unbounded_channel();
        let user = Arc::new(RwLock::new(None));

        let actor = GatewayActor {
            token: token.into(),
            rest,
            description: None,
            resume_url: None,
            session: SessionState::new(),
            socket: None,
            socket_events,
            requests: requests.downgrade(),
            dispatch: dispatch.clone(),
            state: state_tx,
            user: user.clone(),
            guilds: GuildCache::new(),
            notifications,
        };
        tokio::spawn(actor.run(requests_rx, socket_rx));

        (
            Self {
                requests,
                dispatch,
                state,
                user,
            },
            notifications_rx,
        )
    }

    /// Opens a new socket, replacing the current one.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Connect(tx))
            .map_err(|_| GatewayError::Stopped)?;
        rx.await.map_err(|_| GatewayError::Stopped)?
    }

    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(Request::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn guilds(&self) -> Vec<VoiceGuild> {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(Request::Guilds(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn user(&self) -> Option<User> {
        self.user.read().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

#[async_trait]
impl ControlGateway for Gateway {
    fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn user_id(&self) -> Option<UserId> {
        self.user.read().as_ref().map(|u| u.id.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.dispatch.subscribe()
    }

    async fn send(&self, command: GatewayCommand) -> Result<(), GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Send(command, tx))
            .map_err(|_| GatewayError::Stopped)?;
        rx.await.map_err(|_| GatewayError::Stopped)?
    }
}

struct GatewayActor {
    token: String,
    rest: Arc<dyn DiscordRest>,
    description: Option<GatewayDescription>,
    resume_url: Option<String>,
    session: SessionState,
    socket: Option<GatewaySocket<ControlProtocol>>,
    socket_events: mpsc::UnboundedSender<(SocketId, SocketEvent<GatewayEvent>)>,
    requests: mpsc::WeakUnboundedSender<Request>,
    dispatch: broadcast::Sender<DispatchEvent>,
    state: watch::Sender<ConnectionState>,
    user: Arc<RwLock<Option<User>>>,
    guilds: GuildCache,
    notifications: mpsc::UnboundedSender<GatewayNotification>,
}

impl GatewayActor {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut socket_rx: mpsc::UnboundedReceiver<(SocketId, SocketEvent<GatewayEvent>)>,
    ) {
        loop {
            tokio::select! {
                req = requests.recv() => match req {
                    Some(req) => self.handle_request(req).await,
                    None => break,
                },
                Some((id, event)) = socket_rx.recv() => self.handle_socket(id, event).await,
            }
        }

        if let Some(socket) = self.socket.take() {
            socket.close(GatewayCloseCode::NormalClosure.code());
        }
        debug!("[gateway] session task stopped");
    }

    async fn handle_request(&mut self, req: Request) {
        match req {
            Request::Connect(reply) => {
                let res = self.connect().await;
                let _ = reply.send(res);
            }
            Request::Disconnect(reply) => {
                self.disconnect();
                let _ = reply.send(());
            }
            Request::Send(command, reply) => {
                let res = match &self.socket {
                    Some(socket) => socket.send(command),
                    None => Err(GatewayError::Socket("gateway is not connected".into())),
                };
                let _ = reply.send(res);
            }
            Request::Guilds(reply) => {
                let _ = reply.send(self.guilds.summary());
            }
            Request::Retry { generation } => {
                if self.session.should_retry(generation, self.socket.is_some()) {
                    info!("[gateway] reconnecting (attempt {})", self.session.retries());
                    self.reconnect().await;
                } else {
                    debug!("[gateway] reconnect ignored");
                }
            }
        }
    }

    async fn connect(&mut self) -> Result<(), GatewayError> {
        if let Some(socket) = self.socket.take() {
            socket.close(GatewayCloseCode::Reconnecting.code());
        }

        let url = match &self.resume_url {
            Some(url) => url.clone(),
            None => {
                if self.description.is_none() {
                    match self.rest.gateway_description().await {
                        Ok(description) => self.description = Some(description),
                        Err(e) => {
                            self.set_state(ConnectionState::Disconnected);
                            return Err(e.into());
                        }
                    }
                }
                self.description
                    .as_ref()
                    .map(|d| d.url.clone())
                    .unwrap_or_default()
            }
        };

        let id = self.session.begin_socket();
        self.set_state(ConnectionState::Connecting);
        let url = format!("{}/?v={}&encoding=json", url.trim_end_matches('/'), API_VERSION);
        self.socket = Some(GatewaySocket::open(id, url, self.socket_events.clone()));
        Ok(())
    }

    /// Connects from inside the actor; a failure is reported and retried.
    async fn reconnect(&mut self) {
        if let Err(e) = self.connect().await {
            error!("[gateway] reconnect failed: {}", e);
            self.notify(GatewayNotification::Error(e));
            let outcome = self.session.on_close(CloseAction::Resume);
            self.schedule(outcome);
        }
    }

    fn disconnect(&mut self) {
        if let Some(socket) = self.socket.take() {
            debug!("[gateway] manual disconnect");
            socket.close(GatewayCloseCode::NormalClosure.code());
        }
        // A normal closure ends the session server-side.
        self.session.disconnect();
        self.session.clear();
        self.resume_url = None;
        self.guilds.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    async fn handle_socket(&mut self, id: SocketId, event: SocketEvent<GatewayEvent>) {
        if !self.session.is_current(id) || self.socket.is_none() {
            debug!("[gateway] ignoring event from stale socket {}", id);
            return;
        }

        match event {
            SocketEvent::Open => {
                if self.session.can_resume() {
                    let resume = Resume {
                        token: self.token.clone(),
                        session_id: self.session.session_id().unwrap_or_default().to_string(),
                        seq: self.session.sequence().unwrap_or_default(),
                    };
                    debug!("[gateway] resuming session {} at {}", resume.session_id, resume.seq);
                    self.send(GatewayCommand::Resume(resume));
                }
            }
            SocketEvent::Frame(frame) => {
                self.session.observe(frame.sequence);
                self.handle_event(frame.event).await;
            }
            SocketEvent::Close(code) => {
                self.socket = None;
                self.handle_close(code);
            }
        }
    }

    async fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Hello { .. } => {
                if self.session.on_hello() {
                    debug!("[gateway] identifying");
                    self.send(GatewayCommand::Identify(Identify::new(&self.token, INTENTS)));
                }
            }
            GatewayEvent::Dispatch(dispatch) => {
                self.handle_dispatch(&dispatch);
                let _ = self.dispatch.send(dispatch);
            }
            GatewayEvent::Reconnect => {
                info!("[gateway] server requested a reconnect");
                self.reconnect().await;
            }
            GatewayEvent::InvalidSession { resumable } => {
                warn!("[gateway] invalid session (resumable: {})", resumable);
                if !resumable {
                    self.session.clear();
                    self.resume_url = None;
                }
                self.reconnect().await;
            }
            GatewayEvent::Heartbeat | GatewayEvent::HeartbeatAck => {}
            GatewayEvent::Unknown { op } => debug!("[gateway] unhandled opcode {}", op),
        }
    }

    fn handle_dispatch(&mut self, dispatch: &DispatchEvent) {
        match dispatch {
            DispatchEvent::Ready(ready) => {
                info!(
                    "[gateway] ready as {} ({})",
                    ready.user.username, ready.user.id
                );
                self.session.establish(ready.session_id.clone());
                self.resume_url = Some(ready.resume_gateway_url.clone());
                *self.user.write() = Some(ready.user.clone());
                self.session.mark_ready();
                self.set_state(ConnectionState::Ready);
                self.notify(GatewayNotification::Ready(ready.user.clone()));
            }
            DispatchEvent::Resumed => {
                info!("[gateway] session resumed");
                self.session.mark_ready();
                self.set_state(ConnectionState::Ready);
                self.notify(GatewayNotification::Resumed);
            }
            DispatchEvent::GuildCreate(guild) => {
                self.guilds.upsert(guild.clone());
                self.notify_guilds();
            }
            DispatchEvent::GuildUpdate(guild) => {
                if self.guilds.update(guild.clone()) {
                    self.notify_guilds();
                }
            }
            DispatchEvent::GuildDelete(guild) => {
                if self.guilds.remove(&guild.id) {
                    self.notify_guilds();
                }
            }
            DispatchEvent::ChannelCreate(channel) => {
                if self.guilds.add_channel(channel.clone()) {
                    self.notify_guilds();
                }
            }
            DispatchEvent::ChannelDelete(channel) => {
                if self.guilds.remove_channel(channel) {
                    self.notify_guilds();
                }
            }
            DispatchEvent::VoiceStateUpdate(_)
            | DispatchEvent::VoiceServerUpdate(_)
            | DispatchEvent::Other(_) => {}
        }
    }

    fn handle_close(&mut self, code: u16) {
        let action = close_code::classify(code);
        info!("[gateway] socket closed with code {} ({:?})", code, action);

        let outcome = self.session.on_close(action);
        self.set_state(ConnectionState::Disconnected);
        if outcome == CloseOutcome::Fatal {
            self.resume_url = None;
            *self.user.write() = None;
            self.notify(GatewayNotification::Error(GatewayError::FatalClose { code }));
        }
        self.schedule(outcome);
    }

    fn schedule(&self, outcome: CloseOutcome) {
        let CloseOutcome::Retry { after, generation } = outcome else {
            return;
        };
        debug!("[gateway] reconnecting in {:?}", after);
        let requests = self.requests.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(requests) = requests.upgrade() {
                let _ = requests.send(Request::Retry { generation });
            }
        });
    }

    fn send(&self, command: GatewayCommand) {
        if let Some(socket) = &self.socket {
            if let Err(e) = socket.send(command) {
                warn!("[gateway] {}", e);
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if *self.state.borrow() != state {
            self.state.send_replace(state);
            self.notify(GatewayNotification::State(state));
        }
    }

    fn notify(&self, notification: GatewayNotification) {
        let _ = self.notifications.send(notification);
    }

    fn notify_guilds(&self) {
        self.notify(GatewayNotification::Guilds(self.guilds.summary()));
    }
}
