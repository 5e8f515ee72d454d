//! Emoji and reaction bookkeeping types.

use crate::snowflake::Snowflake;
use ahash::AHashMap;
use serde::{Deserialize, Deserializer, Serialize};

/// A (possibly custom) emoji.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Emoji {
    /// Emoji ID. `None` for unicode emoji.
    #[serde(default)]
    pub id: Option<Snowflake>,
    /// Emoji name. `None` when a custom emoji was deleted.
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the emoji is animated.
    #[serde(default)]
    pub animated: bool,
}

impl Emoji {
    /// Key used for reaction bookkeeping: the unicode name, or
    /// `name:id` for custom emoji.
    pub fn cache_key(&self) -> String {
        let name = self.name.as_deref().unwrap_or("");
        match self.id {
            Some(id) => format!("{name}:{id}"),
            None => name.to_owned(),
        }
    }
}

/// Aggregate reaction counts for one emoji on one message.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReactionCounts {
    /// Times this emoji has been used.
    pub count: u32,
    /// Whether the current user reacted.
    pub me: bool,
}

/// The wire shape of a reaction entry on a message object.
#[derive(Debug, Clone, Deserialize)]
struct WireReaction {
    count: u32,
    #[serde(default)]
    me: bool,
    emoji: Emoji,
}

/// Deserialize the wire's reaction array into the keyed map the cache
/// mutates on reaction events.
pub fn deserialize_reaction_map<'de, D>(
    deserializer: D,
) -> Result<AHashMap<String, ReactionCounts>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<WireReaction>> = Option::deserialize(deserializer)?;
    let mut map = AHashMap::new();
    for reaction in raw.unwrap_or_default() {
        map.insert(
            reaction.emoji.cache_key(),
            ReactionCounts {
                count: reaction.count,
                me: reaction.me,
            },
        );
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unicode_cache_key() {
        let emoji = Emoji {
            id: None,
            name: Some("🦀".to_owned()),
            animated: false,
        };
        assert_eq!(emoji.cache_key(), "🦀");
    }

    #[test]
    fn test_custom_cache_key() {
        let emoji = Emoji {
            id: Some(Snowflake::new(99)),
            name: Some("blob".to_owned()),
            animated: true,
        };
        assert_eq!(emoji.cache_key(), "blob:99");
    }

    #[test]
    fn test_reaction_map_deserialization() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(default, deserialize_with = "deserialize_reaction_map")]
            reactions: AHashMap<String, ReactionCounts>,
        }

        let json = r#"{"reactions": [
            {"count": 3, "me": true, "emoji": {"id": null, "name": "👍"}},
            {"count": 1, "emoji": {"id": "5", "name": "blob"}}
        ]}"#;
        let holder: Holder = serde_json::from_str(json).unwrap();
        assert_eq!(holder.reactions["👍"].count, 3);
        assert!(holder.reactions["👍"].me);
        assert_eq!(holder.reactions["blob:5"].count, 1);
    }
}
