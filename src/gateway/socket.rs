//! One physical WebSocket connection.
//!
//! The socket owns the connection and the heartbeat and nothing else. It
//! reports `Open`, every decoded `Frame` and exactly one final `Close` to
//! its owner, tagged with its id so the owner can ignore superseded sockets.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::{sync::mpsc, time::Instant};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode};
use tracing::{debug, warn};

use super::{
    constants::WRITE_TASK_SHUTDOWN_MS,
    heartbeat::{Beat, Heartbeat},
    protocol::{Frame, HeartbeatSignal, Protocol},
};
use crate::common::errors::GatewayError;

pub type SocketId = u64;

/// Standard close codes the socket produces itself.
pub const NORMAL_CLOSURE: u16 = 1000;
pub const NO_STATUS_RECEIVED: u16 = 1005;
pub const ABNORMAL_CLOSURE: u16 = 1006;

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

#[derive(Debug)]
pub enum SocketEvent<E> {
    Open,
    Frame(Frame<E>),
    Close(u16),
}

pub type SocketEvents<E> = mpsc::UnboundedSender<(SocketId, SocketEvent<E>)>;

enum Outbound<C> {
    Command(C),
    Close(u16),
}

pub struct GatewaySocket<P: Protocol> {
    id: SocketId,
    outbound: mpsc::UnboundedSender<Outbound<P::Command>>,
    state: Arc<AtomicU8>,
}

impl<P: Protocol> GatewaySocket<P> {
    /// Starts connecting to `url` in the background.
    pub fn open(id: SocketId, url: String, events: SocketEvents<P::Event>) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(CONNECTING));

        tokio::spawn(run::<P>(id, url, outbound_rx, state.clone(), events));

        Self {
            id,
            outbound,
            state,
        }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    pub fn send(&self, command: P::Command) -> Result<(), GatewayError> {
        if !self.is_open() {
            return Err(GatewayError::Socket(format!(
                "{} socket {} is not open",
                P::NAME,
                self.id
            )));
        }
        self.outbound
            .send(Outbound::Command(command))
            .map_err(|_| GatewayError::Stopped)
    }

    /// Closes the socket with `code`. No-op unless connecting or open.
    pub fn close(&self, code: u16) {
        let closable = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s == CONNECTING || s == OPEN).then_some(CLOSING)
            })
            .is_ok();
        if closable {
            let _ = self.outbound.send(Outbound::Close(code));
        }
    }
}

async fn run<P: Protocol>(
    id: SocketId,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound<P::Command>>,
    state: Arc<AtomicU8>,
    events: SocketEvents<P::Event>,
) {
    debug!("[{}] socket {} connecting to {}", P::NAME, id, url);

    let ws = tokio::select! {
        res = tokio_tungstenite::connect_async(url.as_str()) => match res {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!("[{}] socket {} failed to connect: {}", P::NAME, id, e);
                state.store(CLOSED, Ordering::Release);
                let _ = events.send((id, SocketEvent::Close(ABNORMAL_CLOSURE)));
                return;
            }
        },
        code = close_requested(&mut outbound) => {
            state.store(CLOSED, Ordering::Release);
            let _ = events.send((id, SocketEvent::Close(code)));
            return;
        }
    };

    let _ = state.compare_exchange(CONNECTING, OPEN, Ordering::AcqRel, Ordering::Acquire);
    let _ = events.send((id, SocketEvent::Open));

    let (mut write, mut read) = ws.split();
    let mut heartbeat = Heartbeat::new();
    let mut sequence: Option<u64> = None;

    let code = loop {
        let deadline = heartbeat
            .deadline()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

        tokio::select! {
            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("[{}] socket {} read error: {}", P::NAME, id, e);
                        break ABNORMAL_CLOSURE;
                    }
                    None => {
                        debug!("[{}] socket {} stream ended", P::NAME, id);
                        break ABNORMAL_CLOSURE;
                    }
                };

                match msg {
                    Message::Text(text) => {
                        let frame = match P::decode(text.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!("[{}] socket {} failed to parse message: {} - Text: {}", P::NAME, id, e, text.as_str());
                                continue;
                            }
                        };

                        if let Some(seq) = frame.sequence {
                            sequence = Some(seq);
                        }

                        match P::heartbeat_signal(&frame.event) {
                            HeartbeatSignal::Hello(interval) => {
                                let jitter = rand::thread_rng().gen_range(0.0..1.0);
                                debug!("[{}] socket {} heartbeat every {:?} (jitter {:.3})", P::NAME, id, interval, jitter);
                                heartbeat.start(interval, jitter, Instant::now());
                            }
                            HeartbeatSignal::Ack => heartbeat.acknowledge(),
                            HeartbeatSignal::Request => {
                                if let Err(e) = send_command::<P, _>(&mut write, &P::heartbeat(sequence)).await {
                                    warn!("[{}] socket {} write error: {}", P::NAME, id, e);
                                    break ABNORMAL_CLOSURE;
                                }
                            }
                            HeartbeatSignal::None => {}
                        }

                        let _ = events.send((id, SocketEvent::Frame(frame)));
                    }
                    Message::Close(frame) => {
                        let code = frame.map(|cf| u16::from(cf.code)).unwrap_or(NO_STATUS_RECEIVED);
                        debug!("[{}] socket {} closed by remote: code={}", P::NAME, id, code);
                        break code;
                    }
                    _ => {}
                }
            }
            out = outbound.recv() => match out {
                Some(Outbound::Command(command)) => {
                    if let Err(e) = send_command::<P, _>(&mut write, &command).await {
                        warn!("[{}] socket {} write error: {}", P::NAME, id, e);
                        break ABNORMAL_CLOSURE;
                    }
                }
                Some(Outbound::Close(code)) => {
                    send_close(&mut write, code).await;
                    break code;
                }
                None => {
                    send_close(&mut write, NORMAL_CLOSURE).await;
                    break NORMAL_CLOSURE;
                }
            },
            _ = tokio::time::sleep_until(deadline), if heartbeat.deadline().is_some() => {
                match heartbeat.fire(Instant::now()) {
                    Beat::Send => {
                        if let Err(e) = send_command::<P, _>(&mut write, &P::heartbeat(sequence)).await {
                            warn!("[{}] socket {} write error: {}", P::NAME, id, e);
                            break ABNORMAL_CLOSURE;
                        }
                    }
                    Beat::Timeout => {
                        warn!("[{}] socket {} heartbeat was not acknowledged in time", P::NAME, id);
                        send_close(&mut write, P::HEARTBEAT_TIMEOUT_CODE).await;
                        break P::HEARTBEAT_TIMEOUT_CODE;
                    }
                }
            }
        }
    };

    heartbeat.stop();
    state.store(CLOSED, Ordering::Release);
    let _ = events.send((id, SocketEvent::Close(code)));
}

/// Resolves with the close code once the owner asks to close a socket that
/// is still connecting. Commands sent before the socket opened are dropped.
async fn close_requested<C>(outbound: &mut mpsc::UnboundedReceiver<Outbound<C>>) -> u16 {
    loop {
        match outbound.recv().await {
            Some(Outbound::Close(code)) => return code,
            Some(Outbound::Command(_)) => continue,
            None => return NORMAL_CLOSURE,
        }
    }
}

async fn send_command<P, S>(write: &mut S, command: &P::Command) -> Result<(), GatewayError>
where
    P: Protocol,
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = P::encode(command).map_err(|e| GatewayError::Encode(e.to_string()))?;
    write
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| GatewayError::Socket(e.to_string()))
}

async fn send_close<S>(write: &mut S, code: u16)
where
    S: SinkExt<Message> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    };
    let _ = tokio::time::timeout(
        Duration::from_millis(WRITE_TASK_SHUTDOWN_MS),
        write.send(Message::Close(Some(frame))),
    )
    .await;
}
