//! Gateway error types and close-code policy.
//!
//! All errors in osmium-gateway are represented by the [`GatewayError`]
//! enum. Close codes carry their own reconnect/session policy so the
//! shard can route every close the same way.

use thiserror::Error;

/// Errors that can occur during Gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// WebSocket connection or protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Failed to decode an inbound payload (JSON or ETF).
    #[error("decode error: {0}")]
    Decode(String),

    /// Connection was closed by Discord.
    #[error("connection closed: code={code}, reason={reason}")]
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// The server did not acknowledge our last heartbeat.
    #[error("server did not acknowledge the last heartbeat")]
    MissedHeartbeatAck,

    /// HELLO did not arrive within the connect timeout.
    #[error("connection timed out")]
    ConnectionTimeout,

    /// `connect()` was invoked while a socket was already open.
    #[error("shard already has an open socket")]
    AlreadyConnected,

    /// The shard has no open socket.
    #[error("shard not connected")]
    NotConnected,

    /// Invalid arguments passed by the caller.
    #[error("{0}")]
    InvalidArguments(String),

    /// An operation requires an intent the client was not configured
    /// with.
    #[error("missing required intent: {0}")]
    MissingIntent(&'static str),

    /// Failed to send through an internal channel.
    #[error("channel send error: {0}")]
    ChannelSend(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// I/O error (decompression).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

impl<T> From<flume::SendError<T>> for GatewayError {
    fn from(err: flume::SendError<T>) -> Self {
        GatewayError::ChannelSend(err.to_string())
    }
}

/// Discord Gateway close codes.
///
/// See: <https://discord.com/developers/docs/topics/opcodes-and-status-codes#gateway-gateway-close-event-codes>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Unknown error occurred.
    UnknownError = 4000,
    /// Invalid opcode sent.
    UnknownOpcode = 4001,
    /// Invalid payload (decode error).
    DecodeError = 4002,
    /// Payload sent before identifying.
    NotAuthenticated = 4003,
    /// Invalid token.
    AuthenticationFailed = 4004,
    /// Already authenticated.
    AlreadyAuthenticated = 4005,
    /// Invalid sequence number for resume.
    InvalidSeq = 4007,
    /// Rate limited.
    RateLimited = 4008,
    /// Session timed out.
    SessionTimedOut = 4009,
    /// Invalid shard configuration.
    InvalidShard = 4010,
    /// Too many guilds (sharding required).
    ShardingRequired = 4011,
    /// Invalid API version.
    InvalidApiVersion = 4012,
    /// Invalid intents.
    InvalidIntents = 4013,
    /// Disallowed intents (privileged intent not enabled).
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Try to convert a u16 close code to this enum.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            4000 => Some(CloseCode::UnknownError),
            4001 => Some(CloseCode::UnknownOpcode),
            4002 => Some(CloseCode::DecodeError),
            4003 => Some(CloseCode::NotAuthenticated),
            4004 => Some(CloseCode::AuthenticationFailed),
            4005 => Some(CloseCode::AlreadyAuthenticated),
            4007 => Some(CloseCode::InvalidSeq),
            4008 => Some(CloseCode::RateLimited),
            4009 => Some(CloseCode::SessionTimedOut),
            4010 => Some(CloseCode::InvalidShard),
            4011 => Some(CloseCode::ShardingRequired),
            4012 => Some(CloseCode::InvalidApiVersion),
            4013 => Some(CloseCode::InvalidIntents),
            4014 => Some(CloseCode::DisallowedIntents),
            _ => None,
        }
    }

    /// Whether reconnection is allowed after this close code.
    pub const fn can_reconnect(self) -> bool {
        !matches!(
            self,
            CloseCode::AuthenticationFailed
                | CloseCode::InvalidShard
                | CloseCode::ShardingRequired
                | CloseCode::InvalidApiVersion
                | CloseCode::InvalidIntents
                | CloseCode::DisallowedIntents
        )
    }

    /// Whether this close code invalidates the current session, forcing
    /// a re-identify.
    pub const fn invalidates_session(self) -> bool {
        matches!(
            self,
            CloseCode::NotAuthenticated
                | CloseCode::AuthenticationFailed
                | CloseCode::InvalidShard
                | CloseCode::ShardingRequired
                | CloseCode::InvalidApiVersion
                | CloseCode::InvalidIntents
                | CloseCode::DisallowedIntents
        )
    }

    /// Whether this close code requires the sequence to restart at 0.
    pub const fn resets_sequence(self) -> bool {
        matches!(self, CloseCode::InvalidSeq)
    }

    /// Human-readable description used in surfaced errors.
    pub const fn describe(self) -> &'static str {
        match self {
            CloseCode::UnknownError => "Unknown error",
            CloseCode::UnknownOpcode => "Unknown opcode sent",
            CloseCode::DecodeError => "Invalid payload sent",
            CloseCode::NotAuthenticated => "Payload sent before authentication",
            CloseCode::AuthenticationFailed => "Invalid token",
            CloseCode::AlreadyAuthenticated => "Already authenticated",
            CloseCode::InvalidSeq => "Invalid resume sequence",
            CloseCode::RateLimited => "Gateway rate limit exceeded",
            CloseCode::SessionTimedOut => "Session timed out",
            CloseCode::InvalidShard => "Invalid shard configuration",
            CloseCode::ShardingRequired => "Sharding is required for this bot",
            CloseCode::InvalidApiVersion => "Invalid gateway API version",
            CloseCode::InvalidIntents => "Invalid intents",
            CloseCode::DisallowedIntents => "Intents not enabled for this application",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_policy_table() {
        // (code, can_reconnect, invalidates_session)
        let table = [
            (4001, true, false),
            (4002, true, false),
            (4003, true, true),
            (4004, false, true),
            (4005, true, false),
            (4007, true, false),
            (4008, true, false),
            (4010, false, true),
            (4011, false, true),
            (4012, false, true),
            (4013, false, true),
            (4014, false, true),
        ];

        for (code, reconnect, invalidates) in table {
            let cc = CloseCode::from_code(code).unwrap();
            assert_eq!(cc.can_reconnect(), reconnect, "reconnect for {code}");
            assert_eq!(
                cc.invalidates_session(),
                invalidates,
                "session policy for {code}"
            );
        }
    }

    #[test]
    fn test_unlisted_codes_have_no_policy() {
        assert!(CloseCode::from_code(1000).is_none());
        assert!(CloseCode::from_code(1006).is_none());
        assert!(CloseCode::from_code(4999).is_none());
    }

    #[test]
    fn test_sequence_reset_only_on_invalid_seq() {
        assert!(CloseCode::InvalidSeq.resets_sequence());
        assert!(!CloseCode::RateLimited.resets_sequence());
    }

    #[test]
    fn test_invalid_token_description() {
        assert_eq!(CloseCode::AuthenticationFailed.describe(), "Invalid token");
    }
}
