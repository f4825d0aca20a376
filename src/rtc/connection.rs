//! One WebRTC attempt: offer/answer exchange, candidate relay and the
//! lifecycle events the owning stream reacts to.

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

use super::{
    negotiation::CandidateBuffer,
    peer::{
        BroadcastClient, BroadcastEvent, IceConnectionState, PeerConnection, PeerEvent,
        PeerFactory, RtcSessionDescription,
    },
    sdp::munge_offer,
};
use crate::common::errors::RtcError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcConnectionEvent {
    /// ICE reached `connected`.
    Connect,
    /// The attempt is over; the owner decides whether to retry.
    Stop,
    Error(RtcError),
}

pub type ConnectionEvents = mpsc::UnboundedSender<(u64, RtcConnectionEvent)>;

pub struct RtcConnection {
    id: u64,
    peer: Arc<dyn PeerConnection>,
    task: JoinHandle<()>,
}

impl RtcConnection {
    /// Creates the remote peer and the local peer connection, then runs the
    /// negotiation in the background.
    pub async fn start(
        id: u64,
        factory: &dyn PeerFactory,
        client: Arc<dyn BroadcastClient>,
        events: ConnectionEvents,
    ) -> Result<Self, RtcError> {
        let remote = client.create().await?;
        let (peer, local) = factory.create()?;

        let task = tokio::spawn(run(id, peer.clone(), client, local, remote, events));
        Ok(Self { id, peer, task })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Detaches the event task first so no event follows the close.
    pub fn close(&self) {
        self.task.abort();
        self.peer.close();
        debug!("rtc connection {} closed", self.id);
    }
}

async fn run(
    id: u64,
    peer: Arc<dyn PeerConnection>,
    client: Arc<dyn BroadcastClient>,
    mut local: mpsc::UnboundedReceiver<PeerEvent>,
    mut remote: mpsc::UnboundedReceiver<BroadcastEvent>,
    events: ConnectionEvents,
) {
    let emit = |event| {
        let _ = events.send((id, event));
    };
    let mut candidates = CandidateBuffer::new();

    loop {
        tokio::select! {
            event = local.recv() => match event {
                Some(PeerEvent::NegotiationNeeded) => {
                    debug!("rtc connection {} negotiating", id);
                    if let Err(e) = negotiate(&*peer, &*client, &mut candidates).await {
                        error!("rtc connection {} negotiation failed: {}", id, e);
                        emit(RtcConnectionEvent::Error(e));
                    }
                }
                Some(PeerEvent::IceCandidate(candidate)) => {
                    if let Some(candidate) = candidates.push(candidate) {
                        relay_candidate(&*client, candidate).await;
                    }
                }
                Some(PeerEvent::IceConnectionState(state)) => {
                    debug!("rtc connection {} ice state {:?}", id, state);
                    if state == IceConnectionState::Connected {
                        emit(RtcConnectionEvent::Connect);
                    }
                }
                Some(PeerEvent::Closed) | None => {
                    debug!("rtc connection {} peer closed", id);
                    emit(RtcConnectionEvent::Stop);
                    break;
                }
            },
            event = remote.recv() => match event {
                Some(BroadcastEvent::Candidate(candidate)) => {
                    if let Err(e) = peer.add_ice_candidate(candidate).await {
                        warn!("rtc connection {} rejected remote candidate: {}", id, e);
                    }
                }
                Some(BroadcastEvent::Closed) | None => {
                    debug!("rtc connection {} ended by remote", id);
                    emit(RtcConnectionEvent::Stop);
                    break;
                }
            },
        }
    }
}

async fn negotiate(
    peer: &dyn PeerConnection,
    client: &dyn BroadcastClient,
    candidates: &mut CandidateBuffer,
) -> Result<(), RtcError> {
    candidates.begin_offer();

    let mut offer = peer.create_offer().await?;
    offer.sdp = munge_offer(&offer.sdp);
    peer.set_local_description(offer.clone()).await?;

    let offer = serde_json::to_string(&offer).map_err(|e| RtcError::Sdp(e.to_string()))?;
    let answer = client.signal(offer).await?;
    let answer: RtcSessionDescription =
        serde_json::from_str(&answer).map_err(|e| RtcError::Sdp(e.to_string()))?;
    peer.set_remote_description(answer).await?;

    for candidate in candidates.answer_applied() {
        relay_candidate(client, candidate).await;
    }
    client.start_stream().await
}

async fn relay_candidate(client: &dyn BroadcastClient, candidate: String) {
    if let Err(e) = client.add_candidate(candidate).await {
        warn!("rtc candidate not delivered: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::rtc::testing::{FakeClient, FakeFactory, wait_until};

    #[tokio::test]
    async fn candidates_wait_for_the_answer_and_keep_their_order() {
        let factory = FakeFactory::default();
        let client = Arc::new(FakeClient::default());
        let (events, _events_rx) = mpsc::unbounded_channel();

        let connection = RtcConnection::start(1, &factory, client.clone(), events)
            .await
            .unwrap();
        let peer = factory.last_events();

        peer.send(PeerEvent::IceCandidate("a".into())).unwrap();
        peer.send(PeerEvent::IceCandidate("b".into())).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(client.candidates().is_empty());

        peer.send(PeerEvent::NegotiationNeeded).unwrap();
        peer.send(PeerEvent::IceCandidate("c".into())).unwrap();
        wait_until(|| client.candidates().len() == 3).await;

        assert_eq!(client.candidates(), vec!["a", "b", "c"]);
        let signals = client.signals();
        assert_eq!(signals.len(), 1);
        assert!(signals[0].contains("stereo=1"));
        assert_eq!(client.streams_started(), 1);
        connection.close();
    }

    #[tokio::test]
    async fn reports_connect_and_stop() {
        let factory = FakeFactory::default();
        let client = Arc::new(FakeClient::default());
        let (events, mut events_rx) = mpsc::unbounded_channel();

        let _connection = RtcConnection::start(7, &factory, client.clone(), events)
            .await
            .unwrap();
        factory
            .last_events()
            .send(PeerEvent::IceConnectionState(IceConnectionState::Connected))
            .unwrap();
        assert_eq!(
            events_rx.recv().await,
            Some((7, RtcConnectionEvent::Connect))
        );

        client.send_remote_candidate("remote-1");
        let peer = factory.last_peer();
        wait_until(|| peer.remote_candidates() == vec!["remote-1"]).await;

        client.close_remote();
        assert_eq!(events_rx.recv().await, Some((7, RtcConnectionEvent::Stop)));
    }

    #[tokio::test]
    async fn close_detaches_before_closing_the_peer() {
        let factory = FakeFactory::default();
        let client = Arc::new(FakeClient::default());
        let (events, mut events_rx) = mpsc::unbounded_channel();

        let connection = RtcConnection::start(3, &factory, client.clone(), events)
            .await
            .unwrap();
        connection.close();
        assert!(factory.last_peer().is_closed());

        client.close_remote();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(events_rx.try_recv().is_err());
    }
}
