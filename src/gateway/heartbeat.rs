//! Heartbeat scheduling for a single socket.
//!
//! The scheduler is pure: the socket task feeds it Hello/Ack signals and
//! asks it what to do whenever its deadline passes.

use std::time::Duration;

use tokio::time::Instant;

/// What the socket must do when the heartbeat deadline elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a heartbeat now.
    Send,
    /// The previous heartbeat was never acknowledged; close the socket.
    Timeout,
}

#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    acknowledged: bool,
    deadline: Option<Instant>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            interval: Duration::ZERO,
            acknowledged: false,
            deadline: None,
        }
    }

    /// Starts (or restarts) beating. The first beat is delayed by
    /// `interval * jitter`, with `jitter` in `[0, 1)`.
    pub fn start(&mut self, interval: Duration, jitter: f64, now: Instant) {
        self.interval = interval;
        self.acknowledged = true;
        self.deadline = Some(now + interval.mul_f64(jitter.clamp(0.0, 1.0)));
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Called once the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> Beat {
        if !self.acknowledged {
            self.deadline = None;
            return Beat::Timeout;
        }
        self.acknowledged = false;
        self.deadline = Some(now + self.interval);
        Beat::Send
    }
}
