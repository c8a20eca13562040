//! Websocket close codes used by the gateway and how clients classify them.

/// Administrative disconnect. Clients reconnect immediately.
pub const SERVER_DISCONNECT: u16 = 4000;
/// No token was presented, or the handshake timed out.
pub const AUTH_REQUIRED: u16 = 4001;
pub const AUTH_INVALID: u16 = 4002;
pub const AUTH_EXPIRED: u16 = 4003;
/// The connection did not answer the previous heartbeat probe.
pub const HEARTBEAT_TIMEOUT: u16 = 4005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    ServerInitiated,
    Unauthorized,
    Transport,
}

impl DisconnectCause {
    /// `None` means the transport went away without a close frame.
    pub fn classify(code: Option<u16>) -> Self {
        match code {
            Some(SERVER_DISCONNECT) => Self::ServerInitiated,
            Some(AUTH_REQUIRED | AUTH_INVALID | AUTH_EXPIRED) => Self::Unauthorized,
            _ => Self::Transport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            DisconnectCause::classify(Some(SERVER_DISCONNECT)),
            DisconnectCause::ServerInitiated
        );
        for code in [AUTH_REQUIRED, AUTH_INVALID, AUTH_EXPIRED] {
            assert_eq!(
                DisconnectCause::classify(Some(code)),
                DisconnectCause::Unauthorized
            );
        }
        assert_eq!(
            DisconnectCause::classify(Some(HEARTBEAT_TIMEOUT)),
            DisconnectCause::Transport
        );
        assert_eq!(DisconnectCause::classify(Some(1006)), DisconnectCause::Transport);
        assert_eq!(DisconnectCause::classify(None), DisconnectCause::Transport);
    }
}
