use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Discord channel types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ChannelType {
    /// A text channel in a guild.
    GuildText = 0,
    /// A direct message between users.
    Dm = 1,
    /// A voice channel in a guild.
    GuildVoice = 2,
    /// A direct message between multiple users.
    GroupDm = 3,
    /// An organizational category.
    GuildCategory = 4,
    /// An announcement channel.
    GuildAnnouncement = 5,
    /// A thread within an announcement channel.
    AnnouncementThread = 10,
    /// A thread within a text channel.
    PublicThread = 11,
    /// A private thread.
    PrivateThread = 12,
    /// A stage voice channel.
    GuildStageVoice = 13,
    /// A student-hub directory channel.
    GuildDirectory = 14,
    /// A forum channel.
    GuildForum = 15,
    /// A media channel.
    GuildMedia = 16,
    /// Unrecognized channel type.
    #[serde(other)]
    Unknown = 255,
}

impl ChannelType {
    /// Whether a voice connection can target this channel.
    pub const fn is_voice(self) -> bool {
        matches!(self, Self::GuildVoice | Self::GuildStageVoice)
    }

    /// Whether this channel is a thread.
    pub const fn is_thread(self) -> bool {
        matches!(
            self,
            Self::AnnouncementThread | Self::PublicThread | Self::PrivateThread
        )
    }
}

/// Discord Channel representation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Channel {
    /// Channel ID.
    pub id: Snowflake,
    /// Channel type.
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    /// Guild ID (if in a guild).
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// Sorting position.
    #[serde(default)]
    pub position: Option<i32>,
    /// Channel name.
    #[serde(default)]
    pub name: Option<String>,
    /// Channel topic.
    #[serde(default)]
    pub topic: Option<String>,
    /// Whether the channel is NSFW.
    #[serde(default)]
    pub nsfw: bool,
    /// ID of the last message sent in the channel.
    #[serde(default)]
    pub last_message_id: Option<Snowflake>,
    /// Bitrate (voice channels).
    #[serde(default)]
    pub bitrate: Option<u32>,
    /// User limit (voice channels).
    #[serde(default)]
    pub user_limit: Option<u32>,
    /// Slowmode interval in seconds.
    #[serde(default)]
    pub rate_limit_per_user: Option<u32>,
    /// Parent category (or parent channel for threads).
    #[serde(default)]
    pub parent_id: Option<Snowflake>,
    /// Last pin timestamp (ISO8601).
    #[serde(default)]
    pub last_pin_timestamp: Option<String>,
    /// ID of the thread creator.
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
}
