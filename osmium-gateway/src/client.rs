//! The client capability handle.
//!
//! Every shard receives an [`Client`] handle at construction. It owns
//! the configuration, the entity caches the dispatch router mutates,
//! and the event channel consumers read from. The shard never keeps
//! state of its own beyond the session.

use crate::codec::GatewayEncoding;
use crate::event::Event;
use crate::members::DEFAULT_REQUEST_TIMEOUT;
use crate::payload::UpdatePresence;

use dashmap::DashMap;
use osmium_cache::{Collection, MemberCache, MessageCache, VoiceStateCache};
use osmium_model::{
    ApplicationInfo, Channel, Guild, Intents, Snowflake, UnavailableGuild, User,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Configuration shared by every shard.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Bot token.
    pub token: String,

    /// Gateway intents.
    pub intents: Intents,

    /// Gateway URL (usually from /gateway/bot).
    pub gateway_url: String,

    /// Enable zlib-stream transport compression.
    pub compress: bool,

    /// Large guild threshold (50-250).
    pub large_threshold: u8,

    /// Presence to identify with.
    pub presence: Option<UpdatePresence>,

    /// Fetch all members of large guilds while connecting. Requires the
    /// GUILD_MEMBERS intent.
    pub get_all_users: bool,

    /// How long to wait for the GUILD_CREATE stream to go quiet before
    /// declaring the shard ready.
    pub guild_create_timeout: Duration,

    /// Default timeout for member requests.
    pub request_timeout: Duration,

    /// How long to wait for HELLO after opening the socket.
    pub connect_timeout: Duration,

    /// Resume attempts before the session is invalidated and the shard
    /// re-identifies.
    pub max_reconnect_attempts: u32,

    /// Whether to reconnect automatically on non-fatal disconnects.
    pub auto_reconnect: bool,

    /// Per-channel message cache size.
    pub message_cache_limit: usize,
}

impl GatewayOptions {
    /// Create options with required fields and library defaults.
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into(),
            intents,
            gateway_url: crate::DEFAULT_GATEWAY_URL.to_owned(),
            compress: false,
            large_threshold: 250,
            presence: None,
            get_all_users: false,
            guild_create_timeout: Duration::from_secs(2),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            auto_reconnect: true,
            message_cache_limit: osmium_cache::DEFAULT_MESSAGE_LIMIT,
        }
    }

    /// Set a custom gateway URL.
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    /// Enable transport compression.
    pub fn with_compression(mut self) -> Self {
        self.compress = true;
        self
    }

    /// Set the presence to identify with.
    pub fn with_presence(mut self, presence: UpdatePresence) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Fetch all members of large guilds while connecting.
    pub fn with_get_all_users(mut self) -> Self {
        self.get_all_users = true;
        self
    }

    /// Disable automatic reconnection.
    pub fn without_auto_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }
}

/// Shared client state: configuration, caches, and the event channel.
pub struct Client {
    options: GatewayOptions,

    /// Cached guilds.
    pub guilds: Collection<Guild>,
    /// Guilds known to exist but currently unavailable.
    pub unavailable_guilds: Collection<UnavailableGuild>,
    /// Cached users.
    pub users: Collection<User>,
    /// Cached channels and threads (flat; ownership maps below).
    pub channels: Collection<Channel>,
    /// Cached members keyed by (guild, user).
    pub members: MemberCache,
    /// Cached voice states keyed by (guild, user).
    pub voice_states: VoiceStateCache,
    /// Bounded message cache.
    pub messages: MessageCache,

    /// Which shard services each guild.
    pub guild_shard_map: DashMap<Snowflake, u16>,
    /// Which guild owns each channel.
    pub channel_guild_map: DashMap<Snowflake, Snowflake>,
    /// Which guild owns each thread.
    pub thread_guild_map: DashMap<Snowflake, Snowflake>,

    bot_user: RwLock<Option<User>>,
    application: RwLock<Option<ApplicationInfo>>,
    events: flume::Sender<(u16, Event)>,
}

impl Client {
    /// Create the client and the receiving end of its event channel.
    pub fn new(options: GatewayOptions) -> (Arc<Self>, flume::Receiver<(u16, Event)>) {
        let (events, receiver) = flume::unbounded();
        let messages = MessageCache::with_limit(options.message_cache_limit);

        let client = Arc::new(Self {
            options,
            guilds: Collection::new(),
            unavailable_guilds: Collection::new(),
            users: Collection::new(),
            channels: Collection::new(),
            members: MemberCache::new(),
            voice_states: VoiceStateCache::new(),
            messages,
            guild_shard_map: DashMap::new(),
            channel_guild_map: DashMap::new(),
            thread_guild_map: DashMap::new(),
            bot_user: RwLock::new(None),
            application: RwLock::new(None),
            events,
        });

        (client, receiver)
    }

    /// The shared configuration. Read-only: shards never mutate it.
    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// The configured gateway URL.
    pub fn gateway_url(&self) -> &str {
        &self.options.gateway_url
    }

    /// The wire encoding in use by this build.
    pub fn encoding(&self) -> GatewayEncoding {
        GatewayEncoding::for_build()
    }

    /// Emit an event from a shard to consumers.
    pub fn emit(&self, shard_id: u16, event: Event) {
        // The receiver may be gone during shutdown; dropping the event
        // is correct then.
        let _ = self.events.send((shard_id, event));
    }

    /// The bot user, once READY has arrived on any shard.
    pub fn user(&self) -> Option<User> {
        self.bot_user.read().clone()
    }

    /// The bot user's ID.
    pub fn user_id(&self) -> Option<Snowflake> {
        self.bot_user.read().as_ref().map(|u| u.id)
    }

    pub(crate) fn set_user(&self, user: User) {
        *self.bot_user.write() = Some(user);
    }

    /// The partial application, once READY has arrived.
    pub fn application(&self) -> Option<ApplicationInfo> {
        self.application.read().clone()
    }

    pub(crate) fn set_application(&self, application: Option<ApplicationInfo>) {
        if application.is_some() {
            *self.application.write() = application;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = GatewayOptions::new("token", Intents::GUILDS);
        assert!(options.auto_reconnect);
        assert!(!options.compress);
        assert_eq!(options.large_threshold, 250);
        assert_eq!(options.max_reconnect_attempts, 10);
    }

    #[test]
    fn test_client_emit_reaches_receiver() {
        let (client, events) = Client::new(GatewayOptions::new("t", Intents::GUILDS));
        client.emit(3, Event::ShardPreReady);

        let (shard_id, event) = events.try_recv().unwrap();
        assert_eq!(shard_id, 3);
        assert!(matches!(event, Event::ShardPreReady));
    }

    #[test]
    fn test_emit_without_receiver_is_silent() {
        let (client, events) = Client::new(GatewayOptions::new("t", Intents::GUILDS));
        drop(events);
        client.emit(0, Event::ShardReady);
    }
}
