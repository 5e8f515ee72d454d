//! Osmium Cache - In-memory containers for Discord entities.
#![deny(unsafe_code)]
//!
//! Concurrent entity stores built on DashMap. The gateway mutates these
//! while dispatching; consumers read cloned snapshots.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

use osmium_model::{Channel, Guild, Member, Message, Snowflake, UnavailableGuild, User, VoiceState};

/// An entity addressable by a snowflake ID.
pub trait Entity {
    /// The ID the entity is stored under.
    fn entity_id(&self) -> Snowflake;
}

impl Entity for Guild {
    fn entity_id(&self) -> Snowflake {
        self.id
    }
}

impl Entity for UnavailableGuild {
    fn entity_id(&self) -> Snowflake {
        self.id
    }
}

impl Entity for User {
    fn entity_id(&self) -> Snowflake {
        self.id
    }
}

impl Entity for Channel {
    fn entity_id(&self) -> Snowflake {
        self.id
    }
}

impl Entity for Message {
    fn entity_id(&self) -> Snowflake {
        self.id
    }
}

impl Entity for osmium_model::Role {
    fn entity_id(&self) -> Snowflake {
        self.id
    }
}

/// A concurrent collection of entities keyed by their snowflake.
#[derive(Debug)]
pub struct Collection<T> {
    inner: DashMap<Snowflake, T>,
}

impl<T: Entity + Clone> Collection<T> {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Insert or replace an entity, returning the previous value.
    pub fn add(&self, entity: T) -> Option<T> {
        self.inner.insert(entity.entity_id(), entity)
    }

    /// Clone out the entity with the given ID.
    pub fn get(&self, id: Snowflake) -> Option<T> {
        self.inner.get(&id).map(|r| r.value().clone())
    }

    /// Mutate an entity in place. Returns a clone of the updated value
    /// when the entity exists.
    pub fn update(&self, id: Snowflake, f: impl FnOnce(&mut T)) -> Option<T> {
        self.inner.get_mut(&id).map(|mut r| {
            f(r.value_mut());
            r.value().clone()
        })
    }

    /// Remove an entity, returning it.
    pub fn remove(&self, id: Snowflake) -> Option<T> {
        self.inner.remove(&id).map(|(_, v)| v)
    }

    /// Whether an entity with this ID is cached.
    pub fn has(&self, id: Snowflake) -> bool {
        self.inner.contains_key(&id)
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Snapshot of all cached IDs.
    pub fn ids(&self) -> Vec<Snowflake> {
        self.inner.iter().map(|r| *r.key()).collect()
    }

    /// Remove every entity for which the predicate returns false.
    pub fn retain(&self, f: impl FnMut(&Snowflake, &mut T) -> bool) {
        self.inner.retain(f);
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl<T: Entity + Clone> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A collection scoped under a guild: members, voice states.
#[derive(Debug)]
pub struct ScopedCollection<T> {
    inner: DashMap<(Snowflake, Snowflake), T>,
}

impl<T: Clone> ScopedCollection<T> {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Insert or replace, returning the previous value.
    pub fn add(&self, guild_id: Snowflake, id: Snowflake, value: T) -> Option<T> {
        self.inner.insert((guild_id, id), value)
    }

    /// Clone out a value.
    pub fn get(&self, guild_id: Snowflake, id: Snowflake) -> Option<T> {
        self.inner.get(&(guild_id, id)).map(|r| r.value().clone())
    }

    /// Mutate in place; returns a clone of the updated value.
    pub fn update(&self, guild_id: Snowflake, id: Snowflake, f: impl FnOnce(&mut T)) -> Option<T> {
        self.inner.get_mut(&(guild_id, id)).map(|mut r| {
            f(r.value_mut());
            r.value().clone()
        })
    }

    /// Remove a value, returning it.
    pub fn remove(&self, guild_id: Snowflake, id: Snowflake) -> Option<T> {
        self.inner.remove(&(guild_id, id)).map(|(_, v)| v)
    }

    /// Whether a value is cached.
    pub fn has(&self, guild_id: Snowflake, id: Snowflake) -> bool {
        self.inner.contains_key(&(guild_id, id))
    }

    /// Drop every value scoped under the given guild.
    pub fn remove_scope(&self, guild_id: Snowflake) {
        self.inner.retain(|(g, _), _| *g != guild_id);
    }

    /// Number of cached values.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T: Clone> Default for ScopedCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Default per-channel message retention.
pub const DEFAULT_MESSAGE_LIMIT: usize = 100;

/// Bounded message store.
///
/// Messages are kept per channel in insertion order; once a channel
/// exceeds the limit, its oldest message is evicted.
#[derive(Debug)]
pub struct MessageCache {
    by_id: DashMap<Snowflake, Message>,
    order: Mutex<std::collections::HashMap<Snowflake, VecDeque<Snowflake>>>,
    limit: usize,
}

impl MessageCache {
    /// Create a cache with the default per-channel limit.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MESSAGE_LIMIT)
    }

    /// Create a cache with a custom per-channel limit. A limit of zero
    /// disables caching entirely.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            by_id: DashMap::new(),
            order: Mutex::new(std::collections::HashMap::new()),
            limit,
        }
    }

    /// Insert a message, evicting the channel's oldest entry when over
    /// the limit.
    pub fn add(&self, message: Message) {
        if self.limit == 0 {
            return;
        }
        let channel_id = message.channel_id;
        let id = message.id;

        let evicted = {
            let mut order = self.order.lock();
            let queue = order.entry(channel_id).or_default();
            queue.push_back(id);
            if queue.len() > self.limit {
                queue.pop_front()
            } else {
                None
            }
        };

        self.by_id.insert(id, message);
        if let Some(old) = evicted {
            self.by_id.remove(&old);
        }
    }

    /// Clone out a message.
    pub fn get(&self, id: Snowflake) -> Option<Message> {
        self.by_id.get(&id).map(|r| r.value().clone())
    }

    /// Mutate a cached message in place; returns a clone of the updated
    /// value when the message is cached.
    pub fn update(&self, id: Snowflake, f: impl FnOnce(&mut Message)) -> Option<Message> {
        self.by_id.get_mut(&id).map(|mut r| {
            f(r.value_mut());
            r.value().clone()
        })
    }

    /// Remove a message, returning it.
    pub fn remove(&self, id: Snowflake) -> Option<Message> {
        let removed = self.by_id.remove(&id).map(|(_, v)| v);
        if let Some(ref message) = removed {
            let mut order = self.order.lock();
            if let Some(queue) = order.get_mut(&message.channel_id) {
                queue.retain(|m| *m != id);
            }
        }
        removed
    }

    /// Whether a message is cached.
    pub fn has(&self, id: Snowflake) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Drop everything cached for a channel.
    pub fn remove_channel(&self, channel_id: Snowflake) {
        let ids = {
            let mut order = self.order.lock();
            order.remove(&channel_id).unwrap_or_default()
        };
        for id in ids {
            self.by_id.remove(&id);
        }
    }

    /// Number of cached messages.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience alias for the member store.
pub type MemberCache = ScopedCollection<Member>;
/// Convenience alias for the voice state store.
pub type VoiceStateCache = ScopedCollection<VoiceState>;

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u64) -> User {
        serde_json::from_value::<User>(serde_json::json!({
            "id": id.to_string(),
            "username": format!("user{id}"),
            "discriminator": "0"
        }))
        .unwrap()
    }

    fn message(id: u64, channel: u64) -> Message {
        serde_json::from_value::<Message>(serde_json::json!({
            "id": id.to_string(),
            "channel_id": channel.to_string(),
            "content": "hi"
        }))
        .unwrap()
    }

    #[test]
    fn test_collection_verbs() {
        let users: Collection<User> = Collection::new();
        assert!(users.add(user(1)).is_none());
        assert!(users.has(Snowflake::new(1)));
        assert_eq!(users.get(Snowflake::new(1)).unwrap().username, "user1");

        let old = users.add(user(1));
        assert!(old.is_some());

        users.update(Snowflake::new(1), |u| u.username = "renamed".into());
        assert_eq!(users.get(Snowflake::new(1)).unwrap().username, "renamed");

        assert!(users.remove(Snowflake::new(1)).is_some());
        assert!(users.is_empty());
    }

    #[test]
    fn test_scoped_collection_scope_removal() {
        let states: ScopedCollection<u32> = ScopedCollection::new();
        states.add(Snowflake::new(1), Snowflake::new(10), 1);
        states.add(Snowflake::new(1), Snowflake::new(11), 2);
        states.add(Snowflake::new(2), Snowflake::new(10), 3);

        states.remove_scope(Snowflake::new(1));
        assert_eq!(states.len(), 1);
        assert!(states.has(Snowflake::new(2), Snowflake::new(10)));
    }

    #[test]
    fn test_message_cache_eviction() {
        let cache = MessageCache::with_limit(2);
        cache.add(message(1, 9));
        cache.add(message(2, 9));
        cache.add(message(3, 9));

        assert!(!cache.has(Snowflake::new(1)));
        assert!(cache.has(Snowflake::new(2)));
        assert!(cache.has(Snowflake::new(3)));
    }

    #[test]
    fn test_message_cache_channel_removal() {
        let cache = MessageCache::new();
        cache.add(message(1, 9));
        cache.add(message(2, 9));
        cache.add(message(3, 8));

        cache.remove_channel(Snowflake::new(9));
        assert_eq!(cache.len(), 1);
        assert!(cache.has(Snowflake::new(3)));
    }

    #[test]
    fn test_zero_limit_disables_cache() {
        let cache = MessageCache::with_limit(0);
        cache.add(message(1, 9));
        assert!(cache.is_empty());
    }
}
