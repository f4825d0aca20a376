//! Frame transports for converted PCM.
//!
//! Frames are forwarded verbatim and dropped whenever the transport is not
//! open. Nothing is buffered beyond a small hand-off queue.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::constants::FRAME_QUEUE_CAPACITY;
use crate::{
    common::{backoff::Backoff, errors::CaptureError},
    configs::capture::{CaptureConfig, TransportKind},
};

pub enum FrameSender {
    Udp(UdpFrameSender),
    WebSocket(WebSocketFrameSender),
}

impl FrameSender {
    pub async fn connect(config: &CaptureConfig) -> Result<Self, CaptureError> {
        match config.transport {
            TransportKind::Udp => Ok(Self::Udp(UdpFrameSender::connect(config.port).await?)),
            TransportKind::Websocket => {
                let url = config.websocket_url.clone().ok_or_else(|| {
                    CaptureError::Config("websocket transport needs websocket_url".into())
                })?;
                Ok(Self::WebSocket(WebSocketFrameSender::spawn(url)))
            }
        }
    }

    /// Hands one frame to the transport. Returns `false` if it was dropped.
    pub fn send(&self, frame: Bytes) -> bool {
        match self {
            Self::Udp(udp) => udp.send(&frame),
            Self::WebSocket(ws) => ws.send(frame),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            Self::Udp(_) => true,
            Self::WebSocket(ws) => ws.is_open(),
        }
    }

    pub async fn close(self) {
        if let Self::WebSocket(ws) = self {
            ws.close().await;
        }
    }
}

/// One datagram per frame to a localhost port.
pub struct UdpFrameSender {
    socket: UdpSocket,
}

impl UdpFrameSender {
    pub async fn connect(port: u16) -> Result<Self, CaptureError> {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .map_err(|e| CaptureError::Transport(e.to_string()))?;
        socket
            .connect(("127.0.0.1", port))
            .await
            .map_err(|e| CaptureError::Transport(e.to_string()))?;
        info!("capture sending to udp://127.0.0.1:{}", port);
        Ok(Self { socket })
    }

    pub fn send(&self, frame: &[u8]) -> bool {
        match self.socket.try_send(frame) {
            Ok(_) => true,
            Err(e) => {
                debug!("capture frame dropped: {}", e);
                false
            }
        }
    }
}

/// Binary message per frame to a local signaling peer. The connection is
/// (re)established in the background with backoff.
pub struct WebSocketFrameSender {
    open: Arc<AtomicBool>,
    frames: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WebSocketFrameSender {
    pub fn spawn(url: String) -> Self {
        let open = Arc::new(AtomicBool::new(false));
        let (frames, frames_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_websocket(url, open.clone(), frames_rx, cancel.clone()));
        Self {
            open,
            frames,
            cancel,
            task,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn send(&self, frame: Bytes) -> bool {
        self.is_open() && self.frames.try_send(frame).is_ok()
    }

    pub async fn close(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn run_websocket(
    url: String,
    open: Arc<AtomicBool>,
    mut frames: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new();

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            res = tokio_tungstenite::connect_async(url.as_str()) => res,
        };

        match connected {
            Ok((ws, _)) => {
                info!("capture transport connected to {}", url);
                backoff.reset();
                while frames.try_recv().is_ok() {}
                open.store(true, Ordering::Release);

                let (mut write, mut read) = ws.split();
                let stopped = loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = write.send(Message::Close(None)).await;
                            break true;
                        }
                        frame = frames.recv() => match frame {
                            Some(frame) => {
                                if let Err(e) = write.send(Message::Binary(frame)).await {
                                    warn!("capture transport write failed: {}", e);
                                    break false;
                                }
                            }
                            None => break true,
                        },
                        msg = read.next() => match msg {
                            Some(Ok(Message::Close(_))) | None => break false,
                            Some(Err(e)) => {
                                warn!("capture transport read failed: {}", e);
                                break false;
                            }
                            Some(Ok(_)) => {}
                        },
                    }
                };

                open.store(false, Ordering::Release);
                if stopped {
                    break;
                }
            }
            Err(e) => warn!("capture transport connect to {} failed: {}", url, e),
        }

        let delay = backoff.next();
        debug!("capture transport reconnecting in {:?}", delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    open.store(false, Ordering::Release);
    debug!("capture transport stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn websocket_drops_frames_until_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sender = WebSocketFrameSender::spawn(format!("ws://{}", addr));
        assert!(!sender.send(Bytes::from_static(b"early")));

        let (tcp, _) = listener.accept().await.unwrap();
        let mut peer = tokio_tungstenite::accept_async(tcp).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while !sender.is_open() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(sender.send(Bytes::from_static(b"\x01\x02")));
        let msg = tokio::time::timeout(Duration::from_secs(2), peer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::Binary(Bytes::from_static(b"\x01\x02")));

        sender.close().await;
    }

    #[tokio::test]
    async fn udp_forwards_frames_verbatim() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = peer.local_addr().unwrap().port();
        let sender = UdpFrameSender::connect(port).await.unwrap();

        assert!(sender.send(b"pcm"));
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), peer.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"pcm");
    }

    #[tokio::test]
    async fn websocket_without_url_is_a_config_error() {
        let config = CaptureConfig {
            transport: TransportKind::Websocket,
            ..Default::default()
        };
        assert!(matches!(
            FrameSender::connect(&config).await,
            Err(CaptureError::Config(_))
        ));
    }
}
