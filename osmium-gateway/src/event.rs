//! Normalized gateway events.
//!
//! The dispatch router turns raw DISPATCH packets into this closed set
//! of typed events. The raw packet is also surfaced as
//! [`Event::Packet`] for observers that want the wire shape.

use crate::error::GatewayError;
use crate::payload::GatewayPacket;
use osmium_model::{
    Channel, Emoji, Guild, Member, Message, Presence, Role, Snowflake, UnavailableGuild, User,
    VoiceState,
};
use osmium_cache::Entity;
use serde_json::Value;

/// An entity that may be served from the cache or, when the cache has
/// never seen it, as a bare ID stub.
#[derive(Debug, Clone)]
pub enum Possibly<T> {
    /// A snapshot of the cached entity.
    Cached(T),
    /// Only the ID is known.
    Stub {
        /// The entity's ID.
        id: Snowflake,
    },
}

impl<T: Entity> Possibly<T> {
    /// The ID common to both forms.
    pub fn id(&self) -> Snowflake {
        match self {
            Self::Cached(entity) => entity.entity_id(),
            Self::Stub { id } => *id,
        }
    }
}

impl<T> Possibly<T> {
    /// Build from an optional cache hit.
    pub fn from_cache(cached: Option<T>, id: Snowflake) -> Self {
        match cached {
            Some(entity) => Self::Cached(entity),
            None => Self::Stub { id },
        }
    }

    /// The cached entity, when there is one.
    pub fn cached(&self) -> Option<&T> {
        match self {
            Self::Cached(entity) => Some(entity),
            Self::Stub { .. } => None,
        }
    }
}

/// Events emitted by a shard, paired with the shard ID on the event
/// channel.
#[derive(Debug)]
#[non_exhaustive]
pub enum Event {
    /// Every decoded packet, before dispatch handling.
    Packet(Box<GatewayPacket>),

    /// The shard finished identifying; guilds are still streaming in.
    ShardPreReady,

    /// The shard is fully ready.
    ShardReady,

    /// The shard resumed an existing session.
    ShardResumed,

    /// The shard disconnected. A reconnect may follow.
    ShardDisconnect {
        /// The error that caused the disconnect, if any.
        error: Option<GatewayError>,
    },

    /// A non-fatal error: transport fault, decode failure, or a
    /// protocol-level close.
    ShardError(GatewayError),

    // =========================================================================
    // Guild events
    // =========================================================================
    /// Joined a new guild after readiness.
    GuildCreate(Box<Guild>),

    /// A previously unavailable guild came back.
    GuildAvailable(Box<Guild>),

    /// A guild went unavailable due to an outage.
    GuildUnavailable(UnavailableGuild),

    /// The bot was removed from a guild.
    GuildDelete(Possibly<Guild>),

    /// Guild settings changed.
    GuildUpdate {
        /// The updated guild.
        guild: Box<Guild>,
        /// Snapshot from before the update, when cached.
        old: Option<Box<Guild>>,
    },

    /// A user was banned.
    GuildBanAdd {
        /// The guild, cached or stub.
        guild: Possibly<Guild>,
        /// The banned user.
        user: User,
    },

    /// A user was unbanned.
    GuildBanRemove {
        /// The guild, cached or stub.
        guild: Possibly<Guild>,
        /// The unbanned user.
        user: User,
    },

    // =========================================================================
    // Member events
    // =========================================================================
    /// A member joined.
    GuildMemberAdd {
        /// The guild joined.
        guild_id: Snowflake,
        /// The new member.
        member: Box<Member>,
    },

    /// A member left or was removed.
    GuildMemberRemove {
        /// The guild left.
        guild_id: Snowflake,
        /// The user that left.
        user: User,
    },

    /// A member changed.
    GuildMemberUpdate {
        /// The guild.
        guild_id: Snowflake,
        /// The updated member.
        member: Box<Member>,
        /// Snapshot from before the update, when cached.
        old: Option<Box<Member>>,
    },

    /// One page of a member chunk reply.
    GuildMemberChunk {
        /// The guild the chunk belongs to.
        guild_id: Snowflake,
        /// Members in this chunk.
        members: Vec<Member>,
        /// Zero-based chunk index.
        chunk_index: u32,
        /// Total chunks for the request.
        chunk_count: u32,
        /// Correlation nonce, when the request carried one.
        nonce: Option<String>,
    },

    // =========================================================================
    // Role events
    // =========================================================================
    /// A role was created.
    GuildRoleCreate {
        /// The guild.
        guild_id: Snowflake,
        /// The new role.
        role: Role,
    },

    /// A role changed.
    GuildRoleUpdate {
        /// The guild.
        guild_id: Snowflake,
        /// The updated role.
        role: Role,
        /// Snapshot from before the update, when cached.
        old: Option<Role>,
    },

    /// A role was deleted.
    GuildRoleDelete {
        /// The guild.
        guild_id: Snowflake,
        /// The deleted role, cached or stub.
        role: Possibly<Role>,
    },

    // =========================================================================
    // Channel and thread events
    // =========================================================================
    /// A channel was created.
    ChannelCreate(Box<Channel>),

    /// A channel changed.
    ChannelUpdate {
        /// The updated channel.
        channel: Box<Channel>,
        /// Snapshot from before the update, when cached.
        old: Option<Box<Channel>>,
    },

    /// A channel was deleted.
    ChannelDelete(Possibly<Channel>),

    /// A message was pinned or unpinned.
    ChannelPinsUpdate {
        /// The channel.
        channel_id: Snowflake,
        /// The guild, for guild channels.
        guild_id: Option<Snowflake>,
        /// Latest pin timestamp.
        last_pin_timestamp: Option<String>,
    },

    /// A thread was created or the bot gained access to one.
    ThreadCreate(Box<Channel>),

    /// A thread changed.
    ThreadUpdate {
        /// The updated thread.
        channel: Box<Channel>,
        /// Snapshot from before the update, when cached.
        old: Option<Box<Channel>>,
    },

    /// A thread was deleted.
    ThreadDelete(Possibly<Channel>),

    // =========================================================================
    // Message events
    // =========================================================================
    /// A message was sent.
    MessageCreate(Box<Message>),

    /// A message was edited.
    MessageUpdate {
        /// The message ID.
        id: Snowflake,
        /// The channel.
        channel_id: Snowflake,
        /// The updated message, when it was cached.
        message: Option<Box<Message>>,
    },

    /// A message was deleted.
    MessageDelete {
        /// The message ID.
        id: Snowflake,
        /// The channel.
        channel_id: Snowflake,
        /// The deleted message, when it was cached.
        message: Option<Box<Message>>,
    },

    /// Several messages were deleted at once.
    MessageDeleteBulk {
        /// The deleted message IDs.
        ids: Vec<Snowflake>,
        /// The channel.
        channel_id: Snowflake,
    },

    // =========================================================================
    // Reaction events
    // =========================================================================
    /// A reaction was added.
    MessageReactionAdd {
        /// The message, cached or stub.
        message: Possibly<Message>,
        /// The reacting user.
        user_id: Snowflake,
        /// The emoji used.
        emoji: Emoji,
    },

    /// A reaction was removed.
    MessageReactionRemove {
        /// The message, cached or stub.
        message: Possibly<Message>,
        /// The user whose reaction was removed.
        user_id: Snowflake,
        /// The emoji removed.
        emoji: Emoji,
    },

    /// All reactions were cleared.
    MessageReactionRemoveAll {
        /// The message, cached or stub.
        message: Possibly<Message>,
    },

    /// All reactions for one emoji were cleared.
    MessageReactionRemoveEmoji {
        /// The message, cached or stub.
        message: Possibly<Message>,
        /// The cleared emoji.
        emoji: Emoji,
    },

    // =========================================================================
    // Presence, typing, user events
    // =========================================================================
    /// A member's presence changed.
    PresenceUpdate {
        /// The new presence.
        presence: Box<Presence>,
        /// Snapshot from before the update, when cached.
        old: Option<Box<Presence>>,
    },

    /// A user started typing.
    TypingStart {
        /// The channel.
        channel_id: Snowflake,
        /// The guild, for guild channels.
        guild_id: Option<Snowflake>,
        /// The typing user.
        user_id: Snowflake,
    },

    /// The bot user changed.
    UserUpdate {
        /// The updated user.
        user: User,
        /// Snapshot from before the update, when cached.
        old: Option<User>,
    },

    // =========================================================================
    // Voice events
    // =========================================================================
    /// A member joined a voice channel.
    VoiceChannelJoin {
        /// The guild.
        guild_id: Snowflake,
        /// The member.
        user_id: Snowflake,
        /// The joined channel.
        channel_id: Snowflake,
    },

    /// A member left voice.
    VoiceChannelLeave {
        /// The guild.
        guild_id: Snowflake,
        /// The member.
        user_id: Snowflake,
        /// The channel left.
        old_channel_id: Snowflake,
    },

    /// A member moved between voice channels.
    VoiceChannelSwitch {
        /// The guild.
        guild_id: Snowflake,
        /// The member.
        user_id: Snowflake,
        /// The new channel.
        channel_id: Snowflake,
        /// The previous channel.
        old_channel_id: Snowflake,
    },

    /// A member's voice flags changed without moving channels.
    VoiceStateUpdate {
        /// The new state.
        state: Box<VoiceState>,
        /// Snapshot from before the update, when cached.
        old: Option<Box<VoiceState>>,
    },

    /// Voice server failover information.
    VoiceServerUpdate {
        /// The guild.
        guild_id: Snowflake,
        /// Voice connection token.
        token: String,
        /// Voice server host.
        endpoint: Option<String>,
    },

    /// An event this library does not recognize.
    Unknown {
        /// The wire event name.
        name: String,
        /// The raw payload.
        data: Value,
    },
}
