//! Gateway payload structures.
//!
//! The wire envelope is [`GatewayPacket`]; its `d` field stays a
//! [`serde_json::Value`] until the dispatch router knows which typed
//! event to parse it into. ETF payloads are converted to the same value
//! representation before they reach this layer.

use crate::opcode::OpCode;
use osmium_model::{Activity, ApplicationInfo, Intents, Snowflake, Status, UnavailableGuild, User};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The Gateway wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPacket {
    /// Opcode for the payload.
    pub op: OpCode,

    /// Event data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,

    /// Sequence number (DISPATCH only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event name (DISPATCH only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPacket {
    /// Create an outbound packet with only opcode and data.
    pub fn new(op: OpCode, data: Value) -> Self {
        Self {
            op,
            d: Some(data),
            s: None,
            t: None,
        }
    }
}

/// Payload for the Hello opcode (op 10).
#[derive(Debug, Clone, Deserialize)]
pub struct HelloData {
    /// Interval (in milliseconds) at which to send heartbeats.
    pub heartbeat_interval: u64,
}

/// Payload for the Identify opcode (op 2).
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyData<'a> {
    /// Authentication token.
    pub token: &'a str,

    /// Connection properties.
    pub properties: ConnectionProperties<'a>,

    /// Whether payload compression is enabled.
    pub compress: bool,

    /// Threshold for large guilds (50-250).
    pub large_threshold: u8,

    /// Shard information: [shard_id, total_shards].
    pub shard: [u16; 2],

    /// Initial presence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<UpdatePresence>,

    /// Gateway intents.
    pub intents: Intents,
}

/// Connection properties sent with Identify.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionProperties<'a> {
    /// Operating system.
    pub os: &'a str,

    /// Library name.
    pub browser: &'a str,

    /// Library name (again, for device).
    pub device: &'a str,
}

impl Default for ConnectionProperties<'_> {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS,
            browser: "osmium",
            device: "osmium",
        }
    }
}

/// Payload for the Resume opcode (op 6).
#[derive(Debug, Clone, Serialize)]
pub struct ResumeData<'a> {
    /// Authentication token.
    pub token: &'a str,

    /// Session ID from the previous Ready event.
    pub session_id: &'a str,

    /// Last sequence number received.
    pub seq: u64,
}

/// Payload for the Presence Update opcode (op 3), also embedded in
/// Identify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePresence {
    /// Unix timestamp (ms) of when the client went idle, when it did.
    pub since: Option<u64>,

    /// The client's activities.
    pub activities: Vec<Activity>,

    /// The client's status.
    pub status: Status,

    /// Whether the client is AFK.
    pub afk: bool,
}

impl Default for UpdatePresence {
    fn default() -> Self {
        Self {
            since: None,
            activities: Vec::new(),
            status: Status::Online,
            afk: false,
        }
    }
}

/// Payload for the Request Guild Members opcode (op 8).
#[derive(Debug, Clone, Serialize)]
pub struct RequestGuildMembersData {
    /// Guild to request members for.
    pub guild_id: Snowflake,

    /// Maximum number of members to return (0 for all matching).
    pub limit: u64,

    /// Specific users to fetch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<Snowflake>>,

    /// Username prefix filter; empty string matches everyone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Whether to include presences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presences: Option<bool>,

    /// Correlation nonce echoed on every chunk.
    pub nonce: String,
}

/// Payload for the Voice State Update opcode (op 4).
#[derive(Debug, Clone, Serialize)]
pub struct UpdateVoiceStateData {
    /// Guild to act in.
    pub guild_id: Snowflake,

    /// Channel to join, or `None` to disconnect.
    pub channel_id: Option<Snowflake>,

    /// Whether to join muted.
    pub self_mute: bool,

    /// Whether to join deafened.
    pub self_deaf: bool,
}

/// Payload of the READY dispatch event.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyData {
    /// Gateway protocol version.
    pub v: u8,

    /// The bot user.
    pub user: User,

    /// Guilds the bot is in, all initially unavailable.
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,

    /// Session ID for resuming.
    pub session_id: String,

    /// URL to use when resuming this session.
    pub resume_gateway_url: String,

    /// Shard information: [shard_id, total_shards].
    #[serde(default)]
    pub shard: Option<[u16; 2]>,

    /// Partial application information.
    #[serde(default)]
    pub application: Option<ApplicationInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello_packet() {
        let json = r#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let packet: GatewayPacket = serde_json::from_str(json).unwrap();
        assert_eq!(packet.op, OpCode::Hello);

        let hello: HelloData = serde_json::from_value(packet.d.unwrap()).unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }

    #[test]
    fn test_parse_dispatch_packet() {
        let json = r#"{"op":0,"s":3,"t":"RESUMED","d":null}"#;
        let packet: GatewayPacket = serde_json::from_str(json).unwrap();
        assert_eq!(packet.op, OpCode::Dispatch);
        assert_eq!(packet.s, Some(3));
        assert_eq!(packet.t.as_deref(), Some("RESUMED"));
    }

    #[test]
    fn test_identify_serialization() {
        let identify = IdentifyData {
            token: "secret",
            properties: ConnectionProperties::default(),
            compress: false,
            large_threshold: 250,
            shard: [0, 1],
            presence: None,
            intents: Intents::GUILDS,
        };

        let json = serde_json::to_string(&identify).unwrap();
        assert!(json.contains("\"shard\":[0,1]"));
        assert!(json.contains("\"intents\":1"));
        assert!(!json.contains("presence"));
    }

    #[test]
    fn test_heartbeat_packet_shape() {
        let packet = GatewayPacket::new(OpCode::Heartbeat, serde_json::json!(42));
        let json = serde_json::to_string(&packet).unwrap();
        assert_eq!(json, r#"{"op":1,"d":42}"#);
    }

    #[test]
    fn test_parse_ready_data() {
        let json = r#"{
            "v": 10,
            "user": {"id": "1", "username": "bot", "discriminator": "0"},
            "guilds": [{"id": "2", "unavailable": true}],
            "session_id": "abc",
            "resume_gateway_url": "wss://gateway.discord.gg",
            "application": {"id": "3"}
        }"#;
        let ready: ReadyData = serde_json::from_str(json).unwrap();
        assert_eq!(ready.session_id, "abc");
        assert_eq!(ready.guilds.len(), 1);
    }
}
