use crate::channel::Channel;
use crate::member::{Member, Role};
use crate::presence::Presence;
use crate::reaction::Emoji;
use crate::snowflake::Snowflake;
use crate::voice::VoiceState;
use serde::{Deserialize, Serialize};

/// Discord Guild (server) representation.
///
/// The `channels`/`threads`/`members`/`voice_states`/`presences`
/// vectors are only populated on GUILD_CREATE payloads; the gateway
/// ingests them into the flat caches.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Guild {
    /// Guild ID.
    pub id: Snowflake,
    /// Guild name.
    #[serde(default)]
    pub name: String,
    /// Icon hash.
    #[serde(default)]
    pub icon: Option<String>,
    /// ID of the owner.
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    /// Guild description.
    #[serde(default)]
    pub description: Option<String>,
    /// Banner hash.
    #[serde(default)]
    pub banner: Option<String>,
    /// Enabled guild features.
    #[serde(default)]
    pub features: Vec<String>,
    /// Roles in the guild.
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Custom guild emojis.
    #[serde(default)]
    pub emojis: Vec<Emoji>,
    /// Total member count, when known.
    #[serde(default)]
    pub member_count: Option<u64>,
    /// Whether the guild is considered large.
    #[serde(default)]
    pub large: bool,
    /// Whether the guild is unavailable due to an outage.
    #[serde(default)]
    pub unavailable: bool,
    /// When the bot joined the guild (ISO8601).
    #[serde(default)]
    pub joined_at: Option<String>,
    /// Preferred locale.
    #[serde(default)]
    pub preferred_locale: Option<String>,
    /// Channels (GUILD_CREATE only).
    #[serde(default)]
    pub channels: Vec<Channel>,
    /// Active threads (GUILD_CREATE only).
    #[serde(default)]
    pub threads: Vec<Channel>,
    /// Members (GUILD_CREATE only, capped by large_threshold).
    #[serde(default)]
    pub members: Vec<Member>,
    /// Voice states (GUILD_CREATE only).
    #[serde(default)]
    pub voice_states: Vec<VoiceState>,
    /// Presences (GUILD_CREATE only).
    #[serde(default)]
    pub presences: Vec<Presence>,
}

/// A guild reference whose data is not available: either an outage, or
/// a READY payload entry that has not streamed in yet.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnavailableGuild {
    /// Guild ID.
    pub id: Snowflake,
    /// Whether the guild is unavailable (always true on the wire; a
    /// missing field on GUILD_DELETE means the bot was removed).
    #[serde(default)]
    pub unavailable: bool,
}

/// The partial application object attached to READY.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplicationInfo {
    /// Application ID.
    pub id: Snowflake,
    /// Application flags.
    #[serde(default)]
    pub flags: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_guild_create_payload() {
        let json = r#"{
            "id": "1",
            "name": "testing",
            "member_count": 3,
            "large": false,
            "channels": [{"id": "10", "type": 0, "name": "general"}],
            "members": [{"user": {"id": "2", "username": "u", "discriminator": "0"}, "roles": []}],
            "voice_states": []
        }"#;
        let guild: Guild = serde_json::from_str(json).unwrap();
        assert_eq!(guild.channels.len(), 1);
        assert_eq!(guild.members.len(), 1);
        assert!(!guild.unavailable);
    }

    #[test]
    fn test_parse_unavailable_guild() {
        let json = r#"{"id": "9", "unavailable": true}"#;
        let guild: UnavailableGuild = serde_json::from_str(json).unwrap();
        assert!(guild.unavailable);
        assert_eq!(guild.id.get(), 9);
    }

    #[test]
    fn test_guild_delete_removed_shape() {
        // Removal payloads omit `unavailable` entirely.
        let json = r#"{"id": "9"}"#;
        let guild: UnavailableGuild = serde_json::from_str(json).unwrap();
        assert!(!guild.unavailable);
    }
}
