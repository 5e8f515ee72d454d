use crate::reaction::{deserialize_reaction_map, ReactionCounts};
use crate::snowflake::Snowflake;
use crate::user::User;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Discord Message representation.
///
/// Only the fields the gateway tracks are modeled; the `reactions`
/// array is folded into a keyed count map at parse time because that is
/// the shape reaction events mutate.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    /// Message ID.
    pub id: Snowflake,
    /// Channel the message was sent in.
    pub channel_id: Snowflake,
    /// Guild the message was sent in, when applicable.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// Message author. Absent on some system messages.
    #[serde(default)]
    pub author: Option<User>,
    /// Message content.
    #[serde(default)]
    pub content: String,
    /// When the message was sent (ISO8601 timestamp).
    #[serde(default)]
    pub timestamp: Option<String>,
    /// When the message was last edited.
    #[serde(default)]
    pub edited_timestamp: Option<String>,
    /// Whether this is a TTS message.
    #[serde(default)]
    pub tts: bool,
    /// Whether the message is pinned.
    #[serde(default)]
    pub pinned: bool,
    /// Reaction counts keyed by emoji (`name` or `name:id`).
    #[serde(default, deserialize_with = "deserialize_reaction_map")]
    pub reactions: AHashMap<String, ReactionCounts>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message() {
        let json = r#"{
            "id": "100",
            "channel_id": "200",
            "guild_id": "300",
            "author": {"id": "1", "username": "a", "discriminator": "0"},
            "content": "hello",
            "timestamp": "2021-01-01T00:00:00.000000+00:00"
        }"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.id.get(), 100);
        assert_eq!(message.content, "hello");
        assert!(message.reactions.is_empty());
    }

    #[test]
    fn test_parse_message_with_reactions() {
        let json = r#"{
            "id": "100",
            "channel_id": "200",
            "reactions": [{"count": 2, "me": false, "emoji": {"id": null, "name": "👀"}}]
        }"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.reactions["👀"].count, 2);
    }
}
