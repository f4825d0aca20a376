//! Session bookkeeping shared by the control and voice gateways.
//!
//! This is the pure half of a session manager: it decides between identify
//! and resume, tracks the retry counter and hands out socket generations.
//! The actors own the sockets and timers and consult it on every callback.

use std::time::Duration;

use super::{close_code::CloseAction, socket::SocketId};
use crate::common::{backoff::Backoff, types::ConnectionState};

/// What to do after the current socket closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Schedule a reconnect after `after`, valid only for `generation`.
    Retry { after: Duration, generation: u64 },
    /// The session was discarded; report the close code.
    Fatal,
    Ignore,
}

#[derive(Debug, Default)]
pub struct SessionState {
    sequence: Option<u64>,
    session_id: Option<String>,
    state: ConnectionState,
    backoff: Backoff,
    generation: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn retries(&self) -> u32 {
        self.backoff.attempts()
    }

    /// Resume is possible iff both the session id and a sequence are known.
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    /// Records the frame sequence before anything else looks at the frame.
    pub fn observe(&mut self, sequence: Option<u64>) {
        if sequence.is_some() {
            self.sequence = sequence;
        }
    }

    pub fn establish(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }

    /// Forgets the session so the next socket identifies from scratch.
    pub fn clear(&mut self) {
        self.sequence = None;
        self.session_id = None;
    }

    /// Starts a new socket generation. The returned value is the socket id.
    pub fn begin_socket(&mut self) -> SocketId {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.generation
    }

    pub fn is_current(&self, id: SocketId) -> bool {
        id == self.generation
    }

    /// Hello received. Returns true if an Identify must be sent.
    pub fn on_hello(&mut self) -> bool {
        self.backoff.reset();
        !self.can_resume()
    }

    pub fn mark_ready(&mut self) {
        self.state = ConnectionState::Ready;
        self.backoff.reset();
    }

    pub fn on_close(&mut self, action: CloseAction) -> CloseOutcome {
        self.state = ConnectionState::Disconnected;
        match action {
            CloseAction::Resume => CloseOutcome::Retry {
                after: self.backoff.next(),
                generation: self.generation,
            },
            CloseAction::Fatal => {
                self.clear();
                CloseOutcome::Fatal
            }
            CloseAction::Internal => CloseOutcome::Ignore,
        }
    }

    /// A scheduled retry fires only if no newer socket was created since it
    /// was scheduled and a reconnect is still wanted.
    pub fn should_retry(&self, generation: u64, has_socket: bool) -> bool {
        generation == self.generation && !has_socket && self.backoff.is_pending()
    }

    /// Caller-initiated shutdown; invalidates every pending retry.
    pub fn disconnect(&mut self) {
        self.generation += 1;
        self.backoff.reset();
        self.state = ConnectionState::Disconnected;
    }
}
