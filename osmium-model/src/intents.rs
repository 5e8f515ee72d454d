//! Gateway intents.
//!
//! Intents are a bitfield declaring which event categories the gateway
//! delivers. Some are privileged and must be enabled in the developer
//! portal before Discord will accept them.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    /// Gateway intents controlling which events Discord sends.
    ///
    /// See: <https://discord.com/developers/docs/topics/gateway#gateway-intents>
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        /// Guild creation, update, delete, role changes, etc.
        const GUILDS = 1 << 0;

        /// Member joins, updates, removes. **Privileged.**
        const GUILD_MEMBERS = 1 << 1;

        /// Guild bans and unbans.
        const GUILD_MODERATION = 1 << 2;

        /// Emoji and sticker updates.
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;

        /// Integration updates.
        const GUILD_INTEGRATIONS = 1 << 4;

        /// Webhook updates.
        const GUILD_WEBHOOKS = 1 << 5;

        /// Invite creation and deletion.
        const GUILD_INVITES = 1 << 6;

        /// Voice state updates.
        const GUILD_VOICE_STATES = 1 << 7;

        /// User presence updates. **Privileged.**
        const GUILD_PRESENCES = 1 << 8;

        /// Messages in guilds.
        const GUILD_MESSAGES = 1 << 9;

        /// Message reactions in guilds.
        const GUILD_MESSAGE_REACTIONS = 1 << 10;

        /// Typing indicators in guilds.
        const GUILD_MESSAGE_TYPING = 1 << 11;

        /// Direct messages.
        const DIRECT_MESSAGES = 1 << 12;

        /// Direct message reactions.
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;

        /// Direct message typing indicators.
        const DIRECT_MESSAGE_TYPING = 1 << 14;

        /// Message content. **Privileged.**
        const MESSAGE_CONTENT = 1 << 15;

        /// Scheduled events.
        const GUILD_SCHEDULED_EVENTS = 1 << 16;

        /// AutoMod rule configuration.
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;

        /// AutoMod rule execution.
        const AUTO_MODERATION_EXECUTION = 1 << 21;
    }
}

impl Intents {
    /// Intents requiring approval in the developer portal.
    pub const fn privileged() -> Self {
        Self::GUILD_MEMBERS
            .union(Self::GUILD_PRESENCES)
            .union(Self::MESSAGE_CONTENT)
    }

    /// Every intent that does not require approval.
    pub const fn non_privileged() -> Self {
        Self::all().difference(Self::privileged())
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::non_privileged()
    }
}

impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = u64::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_round_trip() {
        let intents = Intents::GUILDS | Intents::GUILD_MESSAGES;
        let json = serde_json::to_string(&intents).unwrap();
        assert_eq!(json, "513");

        let parsed: Intents = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, intents);
    }

    #[test]
    fn test_privileged_membership() {
        assert!(Intents::privileged().contains(Intents::GUILD_MEMBERS));
        assert!(Intents::privileged().contains(Intents::GUILD_PRESENCES));
        assert!(!Intents::privileged().contains(Intents::GUILDS));
        assert!(!Intents::default().intersects(Intents::privileged()));
    }
}
