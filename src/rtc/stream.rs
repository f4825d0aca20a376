//! Keeps an RTC capture stream alive across failed or ended attempts.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::{
    connection::{RtcConnection, RtcConnectionEvent},
    peer::{BroadcastClient, PeerFactory},
};
use crate::common::{backoff::Backoff, errors::RtcError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcNotification {
    Connected,
    Stopped,
    Error(RtcError),
}

enum Request {
    Start,
    Stop(oneshot::Sender<()>),
    Retry { generation: u64 },
}

#[derive(Clone)]
pub struct RtcStream {
    requests: mpsc::UnboundedSender<Request>,
}

impl RtcStream {
    pub fn spawn(
        factory: Arc<dyn PeerFactory>,
        client: Arc<dyn BroadcastClient>,
    ) -> (Self, mpsc::UnboundedReceiver<RtcNotification>) {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (notifications, notifications_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();

        let actor = RtcStreamActor {
            factory,
            client,
            connection: None,
            generation: 0,
            backoff: Backoff::new(),
            events,
            requests: requests.downgrade(),
            notifications,
        };
        tokio::spawn(actor.run(requests_rx, events_rx));

        (Self { requests }, notifications_rx)
    }

    /// Starts a fresh attempt, replacing the current one.
    pub fn start(&self) {
        let _ = self.requests.send(Request::Start);
    }

    /// Closes the current attempt and cancels any pending restart.
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(Request::Stop(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

struct RtcStreamActor {
    factory: Arc<dyn PeerFactory>,
    client: Arc<dyn BroadcastClient>,
    connection: Option<RtcConnection>,
    generation: u64,
    backoff: Backoff,
    events: mpsc::UnboundedSender<(u64, RtcConnectionEvent)>,
    requests: mpsc::WeakUnboundedSender<Request>,
    notifications: mpsc::UnboundedSender<RtcNotification>,
}

impl RtcStreamActor {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut events: mpsc::UnboundedReceiver<(u64, RtcConnectionEvent)>,
    ) {
        loop {
            tokio::select! {
                req = requests.recv() => match req {
                    Some(req) => self.handle_request(req).await,
                    None => break,
                },
                Some((id, event)) = events.recv() => self.handle_event(id, event),
            }
        }
        self.detach();
        debug!("rtc stream task stopped");
    }

    async fn handle_request(&mut self, req: Request) {
        match req {
            Request::Start => self.start().await,
            Request::Stop(reply) => {
                self.detach();
                self.generation += 1;
                self.backoff.reset();
                if let Err(e) = self.client.close().await {
                    debug!("rtc client close error: {}", e);
                }
                let _ = reply.send(());
            }
            Request::Retry { generation } => {
                if generation == self.generation
                    && self.connection.is_none()
                    && self.backoff.is_pending()
                {
                    debug!("rtc stream restarting");
                    self.start().await;
                } else {
                    debug!("rtc stream restart ignored");
                }
            }
        }
    }

    async fn start(&mut self) {
        self.detach();
        self.generation += 1;

        match RtcConnection::start(
            self.generation,
            &*self.factory,
            self.client.clone(),
            self.events.clone(),
        )
        .await
        {
            Ok(connection) => self.connection = Some(connection),
            Err(e) => {
                error!("unable to start rtc connection: {}", e);
                self.notify(RtcNotification::Error(e));
                self.schedule_restart();
            }
        }
    }

    fn handle_event(&mut self, id: u64, event: RtcConnectionEvent) {
        if id != self.generation {
            return;
        }
        match event {
            RtcConnectionEvent::Connect => {
                info!("rtc stream connected");
                self.backoff.reset();
                self.notify(RtcNotification::Connected);
            }
            RtcConnectionEvent::Stop => {
                self.detach();
                self.notify(RtcNotification::Stopped);
                self.schedule_restart();
            }
            RtcConnectionEvent::Error(e) => self.notify(RtcNotification::Error(e)),
        }
    }

    fn schedule_restart(&mut self) {
        let after = self.backoff.next();
        let generation = self.generation;
        debug!("rtc stream restarting in {:?}", after);

        let requests = self.requests.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(requests) = requests.upgrade() {
                let _ = requests.send(Request::Retry { generation });
            }
        });
    }

    fn detach(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }

    fn notify(&self, notification: RtcNotification) {
        let _ = self.notifications.send(notification);
    }
}
