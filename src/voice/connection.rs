//! Per-guild voice orchestration.
//!
//! Joining a channel is a two-part handshake on the control gateway: after
//! the voice-state update is sent, both a VOICE_STATE_UPDATE for the local
//! user and a VOICE_SERVER_UPDATE for the guild must arrive (in any order)
//! before the voice gateway can be opened.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::{
    events::{SelectProtocol, Speaking, VoiceCommand},
    gateway::{VoiceConnector, VoiceGatewayDescription, VoiceNotification, VoiceSession},
};
use crate::{
    common::{
        errors::{GatewayError, VoiceError},
        types::{ChannelId, ConnectionState, GuildId},
    },
    gateway::{
        client::ControlGateway,
        events::{DispatchEvent, GatewayCommand, UpdateVoiceState, VoiceServerUpdate, VoiceState},
    },
};

type PendingConnect = Shared<BoxFuture<'static, Result<(), VoiceError>>>;

/// Voice notifications tagged with the guild and the id of the
/// [`VoiceConnection`] whose session produced them.
pub type VoiceEvents = mpsc::UnboundedSender<(GuildId, u64, VoiceNotification)>;

#[derive(Default)]
struct Inner {
    pending: Option<PendingConnect>,
    voice: Option<Arc<dyn VoiceSession>>,
    /// Bumped whenever `voice` is replaced or taken; a session's
    /// notifications are forwarded only while it is still current.
    session: u64,
    /// A voice-state update joining a channel was sent and not yet undone.
    joined: bool,
}

impl Inner {
    fn take_voice(&mut self) -> Option<Arc<dyn VoiceSession>> {
        self.session += 1;
        self.voice.take()
    }
}

pub struct VoiceConnection {
    guild_id: GuildId,
    id: u64,
    gateway: Arc<dyn ControlGateway>,
    connector: Arc<dyn VoiceConnector>,
    timeout: Duration,
    events: VoiceEvents,
    inner: Arc<Mutex<Inner>>,
}

impl VoiceConnection {
    pub fn new(
        guild_id: GuildId,
        id: u64,
        gateway: Arc<dyn ControlGateway>,
        connector: Arc<dyn VoiceConnector>,
        timeout: Duration,
        events: VoiceEvents,
    ) -> Self {
        Self {
            guild_id,
            id,
            gateway,
            connector,
            timeout,
            events,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    /// Tag carried by every notification this connection forwards.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Joins `channel_id`, or leaves with `None`.
    ///
    /// While an attempt is in flight every caller gets that attempt's result.
    pub async fn connect(&self, channel_id: Option<ChannelId>) -> Result<(), VoiceError> {
        let pending = {
            let mut inner = self.inner.lock();
            if let Some(pending) = inner.pending.clone() {
                pending
            } else {
                if self.gateway.connection_state() != ConnectionState::Ready {
                    return Err(VoiceError::GatewayNotReady);
                }
                let task = tokio::spawn(handshake(Handshake {
                    guild_id: self.guild_id.clone(),
                    connection: self.id,
                    channel_id,
                    gateway: self.gateway.clone(),
                    connector: self.connector.clone(),
                    timeout: self.timeout,
                    events: self.events.clone(),
                    inner: self.inner.clone(),
                }));
                let pending = task
                    .map(|res| res.unwrap_or(Err(VoiceError::Gateway(GatewayError::Stopped))))
                    .boxed()
                    .shared();
                inner.pending = Some(pending.clone());
                pending
            }
        };
        pending.await
    }

    /// Leaves the voice channel. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let pending = self.inner.lock().pending.clone();
        if let Some(pending) = pending {
            let _ = pending.await;
        }

        let (voice, joined) = {
            let mut inner = self.inner.lock();
            (inner.take_voice(), std::mem::take(&mut inner.joined))
        };

        if let Some(voice) = voice {
            voice.disconnect().await;
        }

        if joined && self.gateway.connection_state() == ConnectionState::Ready {
            debug!("[{}] leaving voice channel", self.guild_id);
            let leave = UpdateVoiceState::new(self.guild_id.clone(), None);
            if let Err(e) = self
                .gateway
                .send(GatewayCommand::UpdateVoiceState(leave))
                .await
            {
                warn!("[{}] failed to leave voice channel: {}", self.guild_id, e);
            }
        }
    }

    pub async fn select_protocol(&self, data: SelectProtocol) -> Result<(), VoiceError> {
        let voice = self.ready_voice("select protocol")?;
        voice.send(VoiceCommand::SelectProtocol(data)).await
    }

    pub async fn update_speaking(&self, data: Speaking) -> Result<(), VoiceError> {
        let voice = self.ready_voice("update speaking")?;
        voice.send(VoiceCommand::Speaking(data)).await
    }

    pub fn voice_state(&self) -> ConnectionState {
        self.inner
            .lock()
            .voice
            .as_ref()
            .map_or(ConnectionState::Disconnected, |v| v.connection_state())
    }

    fn ready_voice(&self, action: &'static str) -> Result<Arc<dyn VoiceSession>, VoiceError> {
        let inner = self.inner.lock();
        let voice = inner
            .voice
            .as_ref()
            .ok_or(VoiceError::NoVoiceGateway { action })?;
        if voice.connection_state() != ConnectionState::Ready {
            return Err(VoiceError::VoiceGatewayNotReady { action });
        }
        Ok(voice.clone())
    }
}

struct Handshake {
    guild_id: GuildId,
    connection: u64,
    channel_id: Option<ChannelId>,
    gateway: Arc<dyn ControlGateway>,
    connector: Arc<dyn VoiceConnector>,
    timeout: Duration,
    events: VoiceEvents,
    inner: Arc<Mutex<Inner>>,
}

async fn handshake(h: Handshake) -> Result<(), VoiceError> {
    let res = run_handshake(&h).await;
    h.inner.lock().pending = None;
    res
}

async fn run_handshake(h: &Handshake) -> Result<(), VoiceError> {
    let user_id = h.gateway.user_id().ok_or(VoiceError::GatewayNotReady)?;

    // Last write wins: the previous voice session ends before the new
    // voice-state update moves us, even if this handshake then fails.
    let previous = h.inner.lock().take_voice();
    if let Some(previous) = previous {
        debug!("[{}] closing previous voice session", h.guild_id);
        previous.disconnect().await;
    }

    // Subscribe first so neither reply can slip past.
    let mut dispatch = h.gateway.subscribe();

    debug!(
        "[{}] requesting voice state for channel {:?}",
        h.guild_id, h.channel_id
    );
    h.gateway
        .send(GatewayCommand::UpdateVoiceState(UpdateVoiceState::new(
            h.guild_id.clone(),
            h.channel_id.clone(),
        )))
        .await?;
    h.inner.lock().joined = h.channel_id.is_some();

    let wait = async {
        let mut state: Option<VoiceState> = None;
        let mut server: Option<VoiceServerUpdate> = None;
        loop {
            match dispatch.recv().await {
                Ok(DispatchEvent::VoiceStateUpdate(update))
                    if update.user_id == user_id
                        && update.guild_id.as_ref().is_none_or(|g| *g == h.guild_id) =>
                {
                    state = Some(update);
                }
                Ok(DispatchEvent::VoiceServerUpdate(update)) if update.guild_id == h.guild_id => {
                    server = Some(update);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[{}] voice handshake skipped {} dispatches", h.guild_id, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(VoiceError::Gateway(GatewayError::Stopped));
                }
            }
            match (state.take(), server.take()) {
                (Some(state), Some(server)) => return Ok((state, server)),
                (s, v) => {
                    state = s;
                    server = v;
                }
            }
        }
    };

    let (state, server) = match tokio::time::timeout(h.timeout, wait).await {
        Ok(res) => res?,
        Err(_) => {
            warn!("[{}] voice handshake timed out", h.guild_id);
            return Err(VoiceError::HandshakeTimeout(h.timeout.as_millis() as u64));
        }
    };
    let endpoint = server.endpoint.ok_or(VoiceError::MissingEndpoint)?;

    let description = VoiceGatewayDescription {
        token: server.token,
        guild_id: h.guild_id.clone(),
        endpoint,
        session_id: state.session_id,
        user_id,
    };

    info!(
        "[{}] opening voice gateway at {}",
        h.guild_id, description.endpoint
    );
    let (voice, notifications) = h.connector.open(description);
    let session = {
        let mut inner = h.inner.lock();
        if let Some(stale) = inner.take_voice() {
            tokio::spawn(async move { stale.disconnect().await });
        }
        inner.voice = Some(voice);
        inner.session
    };

    tokio::spawn(forward(
        h.guild_id.clone(),
        h.connection,
        session,
        Arc::downgrade(&h.inner),
        notifications,
        h.events.clone(),
    ));

    Ok(())
}

/// Relays one voice session's notifications until it stops being current.
async fn forward(
    guild_id: GuildId,
    connection: u64,
    session: u64,
    inner: Weak<Mutex<Inner>>,
    mut notifications: mpsc::UnboundedReceiver<VoiceNotification>,
    events: VoiceEvents,
) {
    while let Some(notification) = notifications.recv().await {
        let Some(state) = inner.upgrade() else {
            break;
        };
        if state.lock().session != session {
            debug!(
                "[{}] voice session {} replaced, dropping its notifications",
                guild_id, session
            );
            break;
        }
        if events.send((guild_id.clone(), connection, notification)).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::{Notify, watch};

    use super::*;
    use crate::common::types::UserId;

    struct FakeGateway {
        state: ConnectionState,
        dispatch: broadcast::Sender<DispatchEvent>,
        sent: Mutex<Vec<GatewayCommand>>,
        sent_notify: Notify,
    }

    impl FakeGateway {
        fn new(state: ConnectionState) -> Arc<Self> {
            let (dispatch, _) = broadcast::channel(16);
            Arc::new(Self {
                state,
                dispatch,
                sent: Mutex::new(Vec::new()),
                sent_notify: Notify::new(),
            })
        }

        fn emit(&self, event: DispatchEvent) {
            let _ = self.dispatch.send(event);
        }

        fn sent(&self) -> Vec<GatewayCommand> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl ControlGateway for FakeGateway {
        fn connection_state(&self) -> ConnectionState {
            self.state
        }

        fn user_id(&self) -> Option<UserId> {
            Some("7".into())
        }

        fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
            self.dispatch.subscribe()
        }

        async fn send(&self, command: GatewayCommand) -> Result<(), GatewayError> {
            self.sent.lock().push(command);
            self.sent_notify.notify_one();
            Ok(())
        }
    }

    struct FakeSession {
        state: watch::Sender<ConnectionState>,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl VoiceSession for FakeSession {
        fn connection_state(&self) -> ConnectionState {
            *self.state.borrow()
        }

        async fn send(&self, _command: VoiceCommand) -> Result<(), VoiceError> {
            Ok(())
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            self.state.send_replace(ConnectionState::Disconnected);
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        opened: Mutex<Vec<VoiceGatewayDescription>>,
        sessions: Mutex<Vec<Arc<FakeSession>>>,
        notifiers: Mutex<Vec<mpsc::UnboundedSender<VoiceNotification>>>,
    }

    impl VoiceConnector for FakeConnector {
        fn open(
            &self,
            description: VoiceGatewayDescription,
        ) -> (
            Arc<dyn VoiceSession>,
            mpsc::UnboundedReceiver<VoiceNotification>,
        ) {
            self.opened.lock().push(description);
            let (state, _) = watch::channel(ConnectionState::Ready);
            let session = Arc::new(FakeSession {
                state,
                disconnects: AtomicUsize::new(0),
            });
            self.sessions.lock().push(session.clone());
            let (tx, rx) = mpsc::unbounded_channel();
            self.notifiers.lock().push(tx);
            (session, rx)
        }
    }

    type Forwarded = mpsc::UnboundedReceiver<(GuildId, u64, VoiceNotification)>;

    fn connection_with_events(
        gateway: Arc<FakeGateway>,
        connector: Arc<FakeConnector>,
    ) -> (VoiceConnection, Forwarded) {
        let (events, rx) = mpsc::unbounded_channel();
        let conn = VoiceConnection::new(
            "1".into(),
            3,
            gateway,
            connector,
            Duration::from_millis(5_000),
            events,
        );
        (conn, rx)
    }

    fn connection(gateway: Arc<FakeGateway>, connector: Arc<FakeConnector>) -> VoiceConnection {
        connection_with_events(gateway, connector).0
    }

    async fn join(conn: &Arc<VoiceConnection>, gateway: &FakeGateway) {
        let task = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect(Some("2".into())).await }
        });
        gateway.sent_notify.notified().await;
        gateway.emit(state_update("7"));
        gateway.emit(server_update("1"));
        task.await.unwrap().unwrap();
    }

    fn state_update(user: &str) -> DispatchEvent {
        DispatchEvent::VoiceStateUpdate(VoiceState {
            guild_id: Some("1".into()),
            channel_id: Some("2".into()),
            user_id: user.into(),
            session_id: "voice-session".into(),
        })
    }

    fn server_update(guild: &str) -> DispatchEvent {
        DispatchEvent::VoiceServerUpdate(VoiceServerUpdate {
            token: "voice-token".into(),
            guild_id: guild.into(),
            endpoint: Some("voice.example:443".into()),
        })
    }

    #[tokio::test]
    async fn requires_a_ready_gateway() {
        let gateway = FakeGateway::new(ConnectionState::Connecting);
        let connector = Arc::new(FakeConnector::default());
        let conn = connection(gateway.clone(), connector);

        assert_eq!(
            conn.connect(Some("2".into())).await,
            Err(VoiceError::GatewayNotReady)
        );
        assert!(gateway.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_a_server_update() {
        let gateway = FakeGateway::new(ConnectionState::Ready);
        let connector = Arc::new(FakeConnector::default());
        let conn = Arc::new(connection(gateway.clone(), connector.clone()));

        let task = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect(Some("2".into())).await }
        });
        gateway.sent_notify.notified().await;
        gateway.emit(state_update("7"));

        assert_eq!(task.await.unwrap(), Err(VoiceError::HandshakeTimeout(5_000)));
        assert!(connector.opened.lock().is_empty());
    }

    #[tokio::test]
    async fn opens_one_voice_gateway_in_either_order() {
        for server_first in [false, true] {
            let gateway = FakeGateway::new(ConnectionState::Ready);
            let connector = Arc::new(FakeConnector::default());
            let conn = Arc::new(connection(gateway.clone(), connector.clone()));

            let task = tokio::spawn({
                let conn = conn.clone();
                async move { conn.connect(Some("2".into())).await }
            });
            gateway.sent_notify.notified().await;

            // Noise that must be filtered out.
            gateway.emit(state_update("8"));
            gateway.emit(server_update("99"));
            if server_first {
                gateway.emit(server_update("1"));
                gateway.emit(state_update("7"));
            } else {
                gateway.emit(state_update("7"));
                gateway.emit(server_update("1"));
            }

            assert_eq!(task.await.unwrap(), Ok(()));
            let opened = connector.opened.lock().clone();
            assert_eq!(opened.len(), 1);
            assert_eq!(opened[0].session_id, "voice-session");
            assert_eq!(opened[0].token, "voice-token");
            assert_eq!(opened[0].endpoint, "voice.example:443");
            assert_eq!(opened[0].user_id, UserId::from("7"));
        }
    }

    #[tokio::test]
    async fn concurrent_connects_share_one_attempt() {
        let gateway = FakeGateway::new(ConnectionState::Ready);
        let connector = Arc::new(FakeConnector::default());
        let conn = Arc::new(connection(gateway.clone(), connector.clone()));

        let first = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect(Some("2".into())).await }
        });
        gateway.sent_notify.notified().await;
        let second = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect(Some("2".into())).await }
        });
        tokio::task::yield_now().await;

        gateway.emit(state_update("7"));
        gateway.emit(server_update("1"));

        assert_eq!(first.await.unwrap(), Ok(()));
        assert_eq!(second.await.unwrap(), Ok(()));
        assert_eq!(gateway.sent().len(), 1);
        assert_eq!(connector.opened.lock().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let gateway = FakeGateway::new(ConnectionState::Ready);
        let connector = Arc::new(FakeConnector::default());
        let conn = Arc::new(connection(gateway.clone(), connector.clone()));

        let task = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect(Some("2".into())).await }
        });
        gateway.sent_notify.notified().await;
        gateway.emit(state_update("7"));
        gateway.emit(server_update("1"));
        task.await.unwrap().unwrap();

        conn.disconnect().await;
        conn.disconnect().await;

        let sent = gateway.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1],
            GatewayCommand::UpdateVoiceState(UpdateVoiceState::new("1".into(), None))
        );
        let sessions = connector.sessions.lock().clone();
        assert_eq!(sessions[0].disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rejoin_still_closes_the_previous_session() {
        let gateway = FakeGateway::new(ConnectionState::Ready);
        let connector = Arc::new(FakeConnector::default());
        let conn = Arc::new(connection(gateway.clone(), connector.clone()));
        join(&conn, &gateway).await;

        let task = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect(Some("5".into())).await }
        });
        gateway.sent_notify.notified().await;
        let first = connector.sessions.lock()[0].clone();
        assert_eq!(first.disconnects.load(Ordering::SeqCst), 1);

        assert_eq!(task.await.unwrap(), Err(VoiceError::HandshakeTimeout(5_000)));
        assert_eq!(connector.opened.lock().len(), 1);
        assert_eq!(conn.voice_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn only_the_current_session_is_forwarded() {
        let gateway = FakeGateway::new(ConnectionState::Ready);
        let connector = Arc::new(FakeConnector::default());
        let (conn, mut forwarded) = connection_with_events(gateway.clone(), connector.clone());
        let conn = Arc::new(conn);

        join(&conn, &gateway).await;
        join(&conn, &gateway).await;

        let notifiers = connector.notifiers.lock().clone();
        notifiers[0].send(VoiceNotification::Resumed).unwrap();
        notifiers[1]
            .send(VoiceNotification::State(ConnectionState::Ready))
            .unwrap();

        assert_eq!(
            forwarded.recv().await,
            Some((
                GuildId::from("1"),
                3,
                VoiceNotification::State(ConnectionState::Ready)
            ))
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(forwarded.try_recv().is_err());
    }

    #[tokio::test]
    async fn handshake_survives_a_lagged_subscription() {
        let gateway = FakeGateway::new(ConnectionState::Ready);
        let connector = Arc::new(FakeConnector::default());
        let conn = Arc::new(connection(gateway.clone(), connector.clone()));

        let task = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect(Some("2".into())).await }
        });
        gateway.sent_notify.notified().await;

        // A burst larger than the fake's buffer of 16 overflows the receiver.
        for _ in 0..40 {
            gateway.emit(DispatchEvent::Other("GUILD_CREATE".into()));
        }
        gateway.emit(state_update("7"));
        gateway.emit(server_update("1"));

        assert_eq!(task.await.unwrap(), Ok(()));
        assert_eq!(connector.opened.lock().len(), 1);
    }

    #[tokio::test]
    async fn guarded_operations_fail_fast() {
        let gateway = FakeGateway::new(ConnectionState::Ready);
        let connector = Arc::new(FakeConnector::default());
        let conn = connection(gateway, connector);

        let speaking = Speaking {
            speaking: 1,
            delay: 0,
            ssrc: 1,
        };
        assert_eq!(
            conn.update_speaking(speaking).await,
            Err(VoiceError::NoVoiceGateway {
                action: "update speaking"
            })
        );
    }
}
