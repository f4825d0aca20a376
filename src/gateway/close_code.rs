//! Close codes of the control gateway and what each one means for the session.

/// What the session manager does after a socket closed with a given code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Reconnect after backoff, keeping the session for a resume.
    Resume,
    /// Terminal; the session is discarded and the error surfaced.
    Fatal,
    /// Caller-initiated; nothing to do.
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum GatewayCloseCode {
    NormalClosure = 1000,
    ServerClosure = 1001,
    HeartbeatNotAcknowledged = 3000,
    InvalidSession = 3001,
    Reconnecting = 3002,
    UnknownError = 4000,
    UnknownOpcode = 4001,
    DecodeError = 4002,
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    InvalidSeq = 4007,
    RateLimited = 4008,
    SessionTimedOut = 4009,
    InvalidShard = 4010,
    ShardingRequired = 4011,
    InvalidApiVersion = 4012,
    InvalidIntents = 4013,
    DisallowedIntents = 4014,
}

impl GatewayCloseCode {
    pub const fn code(self) -> u16 {
        self as u16
    }
}

impl From<GatewayCloseCode> for u16 {
    fn from(code: GatewayCloseCode) -> Self {
        code.code()
    }
}

/// Classifies a control gateway close code. Unlisted codes are resumable.
pub fn classify(code: u16) -> CloseAction {
    match code {
        1000 | 3002 => CloseAction::Internal,
        1001 | 4004 | 4010 | 4011 | 4012 | 4013 | 4014 => CloseAction::Fatal,
        _ => CloseAction::Resume,
    }
}
