//! Close codes of the voice gateway.

pub use crate::gateway::close_code::CloseAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum VoiceCloseCode {
    NormalClosure = 1000,
    ServerClosure = 1001,
    HeartbeatNotAcknowledged = 3000,
    InvalidSession = 3001,
    Reconnecting = 3002,
    UnknownOpcode = 4001,
    FailedToDecodePayload = 4002,
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    SessionNoLongerValid = 4006,
    SessionTimeout = 4009,
    ServerNotFound = 4011,
    UnknownProtocol = 4012,
    Disconnected = 4014,
    VoiceServerCrashed = 4015,
    UnknownEncryptionMode = 4016,
}

impl VoiceCloseCode {
    pub const fn code(self) -> u16 {
        self as u16
    }
}

/// Classifies a voice gateway close code. Unlisted codes are resumable.
pub fn classify(code: u16) -> CloseAction {
    match code {
        1000 | 3002 => CloseAction::Internal,
        1001 | 4004 | 4006 | 4011 | 4012 | 4014 | 4016 => CloseAction::Fatal,
        _ => CloseAction::Resume,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use VoiceCloseCode::*;

    #[test]
    fn voice_table_differs_from_control_table() {
        // 4006 and 4016 only exist on the voice side.
        assert_eq!(classify(SessionNoLongerValid.code()), CloseAction::Fatal);
        assert_eq!(classify(UnknownEncryptionMode.code()), CloseAction::Fatal);
        // 4013 is fatal on the control side only.
        assert_eq!(classify(4013), CloseAction::Resume);
    }

    #[test]
    fn server_crash_and_timeouts_resume() {
        for code in [VoiceServerCrashed, SessionTimeout, HeartbeatNotAcknowledged] {
            assert_eq!(classify(code.code()), CloseAction::Resume, "{:?}", code);
        }
        assert_eq!(classify(Disconnected.code()), CloseAction::Fatal);
        assert_eq!(classify(Reconnecting.code()), CloseAction::Internal);
    }
}
