//! In-memory peers and broadcast clients for the RTC tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::peer::{
    BroadcastClient, BroadcastEvent, PeerConnection, PeerEvent, PeerFactory, RtcSessionDescription,
    SdpKind,
};
use crate::common::errors::RtcError;

pub const OFFER_SDP: &str = "a=rtpmap:111 opus/48000/2\r\na=fmtp:111 minptime=10;useinbandfec=1\r\n";

#[derive(Default)]
pub struct FakePeer {
    closed: AtomicBool,
    remote_candidates: Mutex<Vec<String>>,
}

impl FakePeer {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn remote_candidates(&self) -> Vec<String> {
        self.remote_candidates.lock().clone()
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<RtcSessionDescription, RtcError> {
        Ok(RtcSessionDescription {
            kind: SdpKind::Offer,
            sdp: OFFER_SDP.to_string(),
        })
    }

    async fn set_local_description(&self, _: RtcSessionDescription) -> Result<(), RtcError> {
        Ok(())
    }

    async fn set_remote_description(&self, _: RtcSessionDescription) -> Result<(), RtcError> {
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: String) -> Result<(), RtcError> {
        self.remote_candidates.lock().push(candidate);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeFactory {
    peers: Mutex<Vec<(Arc<FakePeer>, mpsc::UnboundedSender<PeerEvent>)>>,
}

impl FakeFactory {
    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn last_events(&self) -> mpsc::UnboundedSender<PeerEvent> {
        self.peers.lock().last().map(|(_, tx)| tx.clone()).unwrap()
    }

    pub fn last_peer(&self) -> Arc<FakePeer> {
        self.peers.lock().last().map(|(peer, _)| peer.clone()).unwrap()
    }
}

impl PeerFactory for FakeFactory {
    fn create(
        &self,
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), RtcError> {
        let peer = Arc::new(FakePeer::default());
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().push((peer.clone(), tx));
        Ok((peer, rx))
    }
}

#[derive(Default)]
pub struct FakeClient {
    remote: Mutex<Option<mpsc::UnboundedSender<BroadcastEvent>>>,
    signals: Mutex<Vec<String>>,
    candidates: Mutex<Vec<String>>,
    streams: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeClient {
    pub fn signals(&self) -> Vec<String> {
        self.signals.lock().clone()
    }

    pub fn candidates(&self) -> Vec<String> {
        self.candidates.lock().clone()
    }

    pub fn streams_started(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn send_remote_candidate(&self, candidate: &str) {
        if let Some(remote) = self.remote.lock().as_ref() {
            let _ = remote.send(BroadcastEvent::Candidate(candidate.to_string()));
        }
    }

    /// Simulates the native side ending the session.
    pub fn close_remote(&self) {
        if let Some(remote) = self.remote.lock().as_ref() {
            let _ = remote.send(BroadcastEvent::Closed);
        }
    }
}

#[async_trait]
impl BroadcastClient for FakeClient {
    async fn create(&self) -> Result<mpsc::UnboundedReceiver<BroadcastEvent>, RtcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.remote.lock() = Some(tx);
        Ok(rx)
    }

    async fn signal(&self, offer: String) -> Result<String, RtcError> {
        self.signals.lock().push(offer);
        Ok(r#"{"type":"answer","sdp":"v=0\r\n"}"#.to_string())
    }

    async fn add_candidate(&self, candidate: String) -> Result<(), RtcError> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn start_stream(&self) -> Result<(), RtcError> {
        self.streams.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), RtcError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
