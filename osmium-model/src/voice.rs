use crate::member::Member;
use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};

/// A user's voice connection state within a guild.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VoiceState {
    /// Guild the state applies to. Absent inside GUILD_CREATE payloads.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// Channel the user is connected to. `None` means disconnected.
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    /// The user the state belongs to.
    pub user_id: Snowflake,
    /// The member object, when the server includes it.
    #[serde(default)]
    pub member: Option<Member>,
    /// Voice session ID.
    #[serde(default)]
    pub session_id: String,
    /// Whether the user is server-deafened.
    #[serde(default)]
    pub deaf: bool,
    /// Whether the user is server-muted.
    #[serde(default)]
    pub mute: bool,
    /// Whether the user deafened themselves.
    #[serde(default)]
    pub self_deaf: bool,
    /// Whether the user muted themselves.
    #[serde(default)]
    pub self_mute: bool,
    /// Whether the user is streaming.
    #[serde(default)]
    pub self_stream: bool,
    /// Whether the user's camera is on.
    #[serde(default)]
    pub self_video: bool,
    /// Whether the user is suppressed (stage audience).
    #[serde(default)]
    pub suppress: bool,
    /// Stage request-to-speak timestamp.
    #[serde(default)]
    pub request_to_speak_timestamp: Option<String>,
}
