//! Dispatch routing.
//!
//! Turns DISPATCH packets into cache mutations on the client and
//! normalized [`Event`]s. Runs inline on the shard task, so packets are
//! handled strictly in arrival order.

use crate::error::GatewayError;
use crate::event::{Event, Possibly};
use crate::members::RequestMembersOptions;
use crate::payload::{GatewayPacket, ReadyData};
use crate::session::{derive_resume_url, ShardStatus};
use crate::shard::{Shard, ShardNotice};
use crate::GATEWAY_VERSION;

use osmium_model::{
    Channel, Emoji, Guild, Intents, Member, Message, Presence, Role, Snowflake, UnavailableGuild,
    User, VoiceState,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// Wire shapes of dispatch payloads that are not plain entities.

#[derive(Deserialize)]
struct BanData {
    guild_id: Snowflake,
    user: User,
}

#[derive(Deserialize)]
struct MemberWithGuild {
    guild_id: Snowflake,
    #[serde(flatten)]
    member: Member,
}

#[derive(Deserialize)]
struct MemberRemoveData {
    guild_id: Snowflake,
    user: User,
}

#[derive(Deserialize)]
struct MembersChunkData {
    guild_id: Snowflake,
    #[serde(default)]
    members: Vec<Member>,
    chunk_index: u32,
    chunk_count: u32,
    #[serde(default)]
    presences: Option<Vec<Presence>>,
    #[serde(default)]
    nonce: Option<String>,
}

#[derive(Deserialize)]
struct RoleData {
    guild_id: Snowflake,
    role: Role,
}

#[derive(Deserialize)]
struct RoleDeleteData {
    guild_id: Snowflake,
    role_id: Snowflake,
}

#[derive(Deserialize)]
struct PinsUpdateData {
    channel_id: Snowflake,
    #[serde(default)]
    guild_id: Option<Snowflake>,
    #[serde(default)]
    last_pin_timestamp: Option<String>,
}

#[derive(Deserialize)]
struct ThreadDeleteData {
    id: Snowflake,
}

#[derive(Deserialize)]
struct MessageUpdateData {
    id: Snowflake,
    channel_id: Snowflake,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    edited_timestamp: Option<String>,
    #[serde(default)]
    pinned: Option<bool>,
}

#[derive(Deserialize)]
struct MessageDeleteData {
    id: Snowflake,
    channel_id: Snowflake,
}

#[derive(Deserialize)]
struct MessageDeleteBulkData {
    ids: Vec<Snowflake>,
    channel_id: Snowflake,
}

#[derive(Deserialize)]
struct ReactionData {
    user_id: Snowflake,
    message_id: Snowflake,
    emoji: Emoji,
}

#[derive(Deserialize)]
struct ReactionRemoveAllData {
    message_id: Snowflake,
}

#[derive(Deserialize)]
struct ReactionRemoveEmojiData {
    message_id: Snowflake,
    emoji: Emoji,
}

#[derive(Deserialize)]
struct TypingStartData {
    channel_id: Snowflake,
    #[serde(default)]
    guild_id: Option<Snowflake>,
    user_id: Snowflake,
}

#[derive(Deserialize)]
struct VoiceServerUpdateData {
    token: String,
    guild_id: Snowflake,
    #[serde(default)]
    endpoint: Option<String>,
}

impl Shard {
    /// Route one DISPATCH packet.
    pub(crate) fn handle_dispatch(&self, packet: GatewayPacket) {
        self.metrics.inc_events();
        self.client
            .emit(self.id, Event::Packet(Box::new(packet.clone())));

        let GatewayPacket { d, t, .. } = packet;
        let Some(name) = t else {
            debug!(shard_id = self.id, "dispatch packet without event name");
            return;
        };
        let data = d.unwrap_or(Value::Null);

        match name.as_str() {
            "READY" => self.dispatch_ready(data),
            "RESUMED" => self.dispatch_resumed(),

            "GUILD_CREATE" => self.dispatch_guild_create(data),
            "GUILD_UPDATE" => self.dispatch_guild_update(data),
            "GUILD_DELETE" => self.dispatch_guild_delete(data),
            "GUILD_BAN_ADD" => self.dispatch_ban(data, true),
            "GUILD_BAN_REMOVE" => self.dispatch_ban(data, false),

            "GUILD_MEMBER_ADD" => self.dispatch_member_add(data),
            "GUILD_MEMBER_REMOVE" => self.dispatch_member_remove(data),
            "GUILD_MEMBER_UPDATE" => self.dispatch_member_update(data),
            "GUILD_MEMBERS_CHUNK" => self.dispatch_members_chunk(data),

            "GUILD_ROLE_CREATE" => self.dispatch_role_create(data),
            "GUILD_ROLE_UPDATE" => self.dispatch_role_update(data),
            "GUILD_ROLE_DELETE" => self.dispatch_role_delete(data),

            "CHANNEL_CREATE" => self.dispatch_channel_create(data),
            "CHANNEL_UPDATE" => self.dispatch_channel_update(data),
            "CHANNEL_DELETE" => self.dispatch_channel_delete(data),
            "CHANNEL_PINS_UPDATE" => self.dispatch_pins_update(data),

            "THREAD_CREATE" => self.dispatch_thread_create(data),
            "THREAD_UPDATE" => self.dispatch_thread_update(data),
            "THREAD_DELETE" => self.dispatch_thread_delete(data),

            "MESSAGE_CREATE" => self.dispatch_message_create(data),
            "MESSAGE_UPDATE" => self.dispatch_message_update(data),
            "MESSAGE_DELETE" => self.dispatch_message_delete(data),
            "MESSAGE_DELETE_BULK" => self.dispatch_message_delete_bulk(data),

            "MESSAGE_REACTION_ADD" => self.dispatch_reaction_add(data),
            "MESSAGE_REACTION_REMOVE" => self.dispatch_reaction_remove(data),
            "MESSAGE_REACTION_REMOVE_ALL" => self.dispatch_reaction_remove_all(data),
            "MESSAGE_REACTION_REMOVE_EMOJI" => self.dispatch_reaction_remove_emoji(data),

            "PRESENCE_UPDATE" => self.dispatch_presence_update(data),
            "TYPING_START" => self.dispatch_typing_start(data),
            "USER_UPDATE" => self.dispatch_user_update(data),

            "VOICE_STATE_UPDATE" => self.dispatch_voice_state_update(data),
            "VOICE_SERVER_UPDATE" => self.dispatch_voice_server_update(data),

            _ => {
                debug!(shard_id = self.id, event = %name, "unrecognized dispatch event");
                self.client.emit(self.id, Event::Unknown { name, data });
            }
        }
    }

    /// Parse a dispatch payload, surfacing failures as non-fatal
    /// errors.
    fn parse<T: DeserializeOwned>(&self, event: &str, data: Value) -> Option<T> {
        match serde_json::from_value(data) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(shard_id = self.id, event, %error, "failed to parse dispatch payload");
                self.client.emit(
                    self.id,
                    Event::ShardError(GatewayError::Decode(format!("{event}: {error}"))),
                );
                None
            }
        }
    }

    fn dispatch_ready(&self, data: Value) {
        let Some(ready) = self.parse::<ReadyData>("READY", data) else {
            return;
        };

        self.session.set_session_id(Some(ready.session_id.clone()));
        self.session.mark_established();
        self.session.set_status(ShardStatus::Ready);
        self.session.set_pre_ready(true);

        match derive_resume_url(
            &ready.resume_gateway_url,
            GATEWAY_VERSION,
            self.client.encoding().as_str(),
        ) {
            Ok(url) => self.session.set_resume_url(Some(url)),
            Err(error) => {
                warn!(shard_id = self.id, %error, "ignoring malformed resume URL");
                self.session.set_resume_url(None);
            }
        }

        self.client.set_user(ready.user.clone());
        self.client.users.add(ready.user);
        self.client.set_application(ready.application);

        let provided = ready.guilds.len();
        for guild in ready.guilds {
            self.client.unavailable_guilds.add(guild);
        }

        info!(
            shard_id = self.id,
            session_id = %self.session.session_id().unwrap_or_default(),
            guilds = provided,
            "session established"
        );
        self.client.emit(self.id, Event::ShardPreReady);

        if provided > 0 && !self.client.unavailable_guilds.is_empty() {
            self.restart_guild_create_timeout();
        } else {
            self.check_ready();
        }
    }

    fn dispatch_resumed(&self) {
        self.session.mark_established();
        self.session.set_status(ShardStatus::Ready);
        self.session.set_pre_ready(true);
        self.session.set_ready(true);
        self.metrics.inc_resumes();

        info!(shard_id = self.id, seq = self.session.sequence(), "session resumed");
        self.client.emit(self.id, Event::ShardResumed);
        self.notify(ShardNotice::Resumed(self.id));
    }

    fn dispatch_guild_create(&self, data: Value) {
        let Some(guild) = self.parse::<Guild>("GUILD_CREATE", data) else {
            return;
        };

        if guild.unavailable {
            self.client.guilds.remove(guild.id);
            self.client.unavailable_guilds.add(UnavailableGuild {
                id: guild.id,
                unavailable: true,
            });
            return;
        }

        let was_unavailable = self.client.unavailable_guilds.remove(guild.id).is_some();
        let guild = self.ingest_guild(guild);

        if self.session.is_ready() {
            let event = if was_unavailable {
                Event::GuildAvailable(Box::new(guild))
            } else {
                Event::GuildCreate(Box::new(guild))
            };
            self.client.emit(self.id, event);
        } else {
            // Still streaming the initial guilds; push the readiness
            // deadline out and keep ingesting.
            self.restart_guild_create_timeout();

            let needs_members = self.client.options().get_all_users
                && guild
                    .member_count
                    .is_some_and(|count| (guild.members.len() as u64) < count);
            if needs_members {
                self.get_all_users_queue.lock().push_back(guild.id);
            }
        }
    }

    /// Register a guild payload and everything nested in it.
    fn ingest_guild(&self, guild: Guild) -> Guild {
        let guild_id = guild.id;
        self.client.guild_shard_map.insert(guild_id, self.id);

        for channel in &guild.channels {
            let mut channel = channel.clone();
            channel.guild_id = Some(guild_id);
            self.client.channel_guild_map.insert(channel.id, guild_id);
            self.client.channels.add(channel);
        }
        for thread in &guild.threads {
            let mut thread = thread.clone();
            thread.guild_id = Some(guild_id);
            self.client.thread_guild_map.insert(thread.id, guild_id);
            self.client.channels.add(thread);
        }
        for member in &guild.members {
            if let Some(ref user) = member.user {
                self.client.users.add(user.clone());
            }
            if let Some(user_id) = member.user_id() {
                self.client.members.add(guild_id, user_id, member.clone());
            }
        }
        for state in &guild.voice_states {
            let mut state = state.clone();
            state.guild_id = Some(guild_id);
            self.client.voice_states.add(guild_id, state.user_id, state);
        }
        for presence in &guild.presences {
            let user_id = presence.user.id;
            self.client.members.update(guild_id, user_id, |member| {
                member.presence = Some(presence.clone());
            });
        }

        self.client.guilds.add(guild.clone());
        guild
    }

    fn dispatch_guild_update(&self, data: Value) {
        let Some(guild) = self.parse::<Guild>("GUILD_UPDATE", data) else {
            return;
        };

        let old = self.client.guilds.get(guild.id);
        if old.is_none() {
            debug!(shard_id = self.id, guild_id = %guild.id, "update for uncached guild");
        }
        self.client.guilds.add(guild.clone());
        self.client.emit(
            self.id,
            Event::GuildUpdate {
                guild: Box::new(guild),
                old: old.map(Box::new),
            },
        );
    }

    fn dispatch_guild_delete(&self, data: Value) {
        let Some(gone) = self.parse::<UnavailableGuild>("GUILD_DELETE", data) else {
            return;
        };

        self.client.guild_shard_map.remove(&gone.id);
        let cached = self.client.guilds.remove(gone.id);

        // Drop every channel and thread the guild owned.
        let channel_ids: Vec<Snowflake> = self
            .client
            .channel_guild_map
            .iter()
            .filter(|entry| *entry.value() == gone.id)
            .map(|entry| *entry.key())
            .collect();
        for channel_id in channel_ids {
            self.client.channel_guild_map.remove(&channel_id);
            self.client.channels.remove(channel_id);
            self.client.messages.remove_channel(channel_id);
        }
        let thread_ids: Vec<Snowflake> = self
            .client
            .thread_guild_map
            .iter()
            .filter(|entry| *entry.value() == gone.id)
            .map(|entry| *entry.key())
            .collect();
        for thread_id in thread_ids {
            self.client.thread_guild_map.remove(&thread_id);
            self.client.channels.remove(thread_id);
            self.client.messages.remove_channel(thread_id);
        }

        self.client.members.remove_scope(gone.id);
        self.client.voice_states.remove_scope(gone.id);

        if gone.unavailable {
            self.client.unavailable_guilds.add(gone.clone());
            self.client.emit(self.id, Event::GuildUnavailable(gone));
        } else {
            self.client.unavailable_guilds.remove(gone.id);
            self.client.emit(
                self.id,
                Event::GuildDelete(Possibly::from_cache(cached, gone.id)),
            );
        }
    }

    fn dispatch_ban(&self, data: Value, added: bool) {
        let event = if added { "GUILD_BAN_ADD" } else { "GUILD_BAN_REMOVE" };
        let Some(ban) = self.parse::<BanData>(event, data) else {
            return;
        };

        let cached = self.client.guilds.get(ban.guild_id);
        if cached.is_none() {
            debug!(shard_id = self.id, guild_id = %ban.guild_id, "ban event for uncached guild");
        }
        let guild = Possibly::from_cache(cached, ban.guild_id);

        let event = if added {
            Event::GuildBanAdd {
                guild,
                user: ban.user,
            }
        } else {
            Event::GuildBanRemove {
                guild,
                user: ban.user,
            }
        };
        self.client.emit(self.id, event);
    }

    fn dispatch_member_add(&self, data: Value) {
        let Some(added) = self.parse::<MemberWithGuild>("GUILD_MEMBER_ADD", data) else {
            return;
        };
        let guild_id = added.guild_id;
        let member = added.member;

        if let Some(ref user) = member.user {
            self.client.users.add(user.clone());
        }
        if let Some(user_id) = member.user_id() {
            self.client.members.add(guild_id, user_id, member.clone());
        }
        self.client.guilds.update(guild_id, |guild| {
            guild.member_count = guild.member_count.map(|count| count + 1);
        });

        self.client.emit(
            self.id,
            Event::GuildMemberAdd {
                guild_id,
                member: Box::new(member),
            },
        );
    }

    fn dispatch_member_remove(&self, data: Value) {
        let Some(removed) = self.parse::<MemberRemoveData>("GUILD_MEMBER_REMOVE", data) else {
            return;
        };

        self.client.members.remove(removed.guild_id, removed.user.id);
        self.client.guilds.update(removed.guild_id, |guild| {
            guild.member_count = guild.member_count.map(|count| count.saturating_sub(1));
        });

        self.client.emit(
            self.id,
            Event::GuildMemberRemove {
                guild_id: removed.guild_id,
                user: removed.user,
            },
        );
    }

    fn dispatch_member_update(&self, data: Value) {
        let Some(updated) = self.parse::<MemberWithGuild>("GUILD_MEMBER_UPDATE", data) else {
            return;
        };
        let guild_id = updated.guild_id;
        let mut member = updated.member;

        let Some(user_id) = member.user_id() else {
            debug!(shard_id = self.id, guild_id = %guild_id, "member update without user");
            return;
        };

        let old = self.client.members.get(guild_id, user_id);
        // Presence is gateway-side state; carry it across the update.
        member.presence = old.as_ref().and_then(|m| m.presence.clone());

        if let Some(ref user) = member.user {
            self.client.users.add(user.clone());
        }
        self.client.members.add(guild_id, user_id, member.clone());

        self.client.emit(
            self.id,
            Event::GuildMemberUpdate {
                guild_id,
                member: Box::new(member),
                old: old.map(Box::new),
            },
        );
    }

    fn dispatch_members_chunk(&self, data: Value) {
        let Some(chunk) = self.parse::<MembersChunkData>("GUILD_MEMBERS_CHUNK", data) else {
            return;
        };
        // Long chunk bursts can starve the heartbeat of its ACK read;
        // inbound chunks prove the connection is alive.
        self.heartbeat.force_ack();

        let guild_id = chunk.guild_id;
        let mut members = chunk.members;

        if let Some(ref presences) = chunk.presences {
            for presence in presences {
                let user_id = presence.user.id;
                if let Some(member) = members
                    .iter_mut()
                    .find(|member| member.user_id() == Some(user_id))
                {
                    member.presence = Some(presence.clone());
                }
            }
        }

        for member in &members {
            if let Some(ref user) = member.user {
                self.client.users.add(user.clone());
            }
            if let Some(user_id) = member.user_id() {
                self.client.members.add(guild_id, user_id, member.clone());
            }
        }

        let Some(nonce) = chunk.nonce else {
            warn!(shard_id = self.id, guild_id = %guild_id, "member chunk without nonce");
            return;
        };

        self.member_requests
            .ingest_chunk(&nonce, &members, chunk.chunk_index, chunk.chunk_count);

        if chunk.chunk_index + 1 >= chunk.chunk_count {
            let was_pending = self.get_all_users_pending.lock().remove(&guild_id);
            if was_pending {
                self.check_ready();
            }
        }

        self.client.emit(
            self.id,
            Event::GuildMemberChunk {
                guild_id,
                members,
                chunk_index: chunk.chunk_index,
                chunk_count: chunk.chunk_count,
                nonce: Some(nonce),
            },
        );
    }

    fn dispatch_role_create(&self, data: Value) {
        let Some(created) = self.parse::<RoleData>("GUILD_ROLE_CREATE", data) else {
            return;
        };

        self.client.guilds.update(created.guild_id, |guild| {
            guild.roles.retain(|role| role.id != created.role.id);
            guild.roles.push(created.role.clone());
        });
        self.client.emit(
            self.id,
            Event::GuildRoleCreate {
                guild_id: created.guild_id,
                role: created.role,
            },
        );
    }

    fn dispatch_role_update(&self, data: Value) {
        let Some(updated) = self.parse::<RoleData>("GUILD_ROLE_UPDATE", data) else {
            return;
        };

        let mut old = None;
        self.client.guilds.update(updated.guild_id, |guild| {
            if let Some(position) = guild
                .roles
                .iter()
                .position(|role| role.id == updated.role.id)
            {
                old = Some(std::mem::replace(
                    &mut guild.roles[position],
                    updated.role.clone(),
                ));
            } else {
                guild.roles.push(updated.role.clone());
            }
        });

        self.client.emit(
            self.id,
            Event::GuildRoleUpdate {
                guild_id: updated.guild_id,
                role: updated.role,
                old,
            },
        );
    }

    fn dispatch_role_delete(&self, data: Value) {
        let Some(deleted) = self.parse::<RoleDeleteData>("GUILD_ROLE_DELETE", data) else {
            return;
        };

        let mut removed = None;
        self.client.guilds.update(deleted.guild_id, |guild| {
            if let Some(position) = guild
                .roles
                .iter()
                .position(|role| role.id == deleted.role_id)
            {
                removed = Some(guild.roles.swap_remove(position));
            }
        });

        self.client.emit(
            self.id,
            Event::GuildRoleDelete {
                guild_id: deleted.guild_id,
                role: Possibly::from_cache(removed, deleted.role_id),
            },
        );
    }

    fn dispatch_channel_create(&self, data: Value) {
        let Some(channel) = self.parse::<Channel>("CHANNEL_CREATE", data) else {
            return;
        };

        if let Some(guild_id) = channel.guild_id {
            self.client.channel_guild_map.insert(channel.id, guild_id);
        }
        self.client.channels.add(channel.clone());
        self.client.emit(self.id, Event::ChannelCreate(Box::new(channel)));
    }

    fn dispatch_channel_update(&self, data: Value) {
        let Some(channel) = self.parse::<Channel>("CHANNEL_UPDATE", data) else {
            return;
        };

        let old = self.client.channels.get(channel.id);
        if let Some(guild_id) = channel.guild_id {
            self.client.channel_guild_map.insert(channel.id, guild_id);
        }
        self.client.channels.add(channel.clone());
        self.client.emit(
            self.id,
            Event::ChannelUpdate {
                channel: Box::new(channel),
                old: old.map(Box::new),
            },
        );
    }

    fn dispatch_channel_delete(&self, data: Value) {
        let Some(channel) = self.parse::<Channel>("CHANNEL_DELETE", data) else {
            return;
        };

        let cached = self.client.channels.remove(channel.id);
        self.client.channel_guild_map.remove(&channel.id);
        self.client.messages.remove_channel(channel.id);

        self.client.emit(
            self.id,
            Event::ChannelDelete(Possibly::from_cache(cached.or(Some(channel.clone())), channel.id)),
        );
    }

    fn dispatch_pins_update(&self, data: Value) {
        let Some(pins) = self.parse::<PinsUpdateData>("CHANNEL_PINS_UPDATE", data) else {
            return;
        };

        self.client.channels.update(pins.channel_id, |channel| {
            channel.last_pin_timestamp = pins.last_pin_timestamp.clone();
        });
        self.client.emit(
            self.id,
            Event::ChannelPinsUpdate {
                channel_id: pins.channel_id,
                guild_id: pins.guild_id,
                last_pin_timestamp: pins.last_pin_timestamp,
            },
        );
    }

    fn dispatch_thread_create(&self, data: Value) {
        let Some(thread) = self.parse::<Channel>("THREAD_CREATE", data) else {
            return;
        };

        if let Some(guild_id) = thread.guild_id {
            self.client.thread_guild_map.insert(thread.id, guild_id);
        }
        self.client.channels.add(thread.clone());
        self.client.emit(self.id, Event::ThreadCreate(Box::new(thread)));
    }

    fn dispatch_thread_update(&self, data: Value) {
        let Some(thread) = self.parse::<Channel>("THREAD_UPDATE", data) else {
            return;
        };

        let old = self.client.channels.get(thread.id);
        if let Some(guild_id) = thread.guild_id {
            self.client.thread_guild_map.insert(thread.id, guild_id);
        }
        self.client.channels.add(thread.clone());
        self.client.emit(
            self.id,
            Event::ThreadUpdate {
                channel: Box::new(thread),
                old: old.map(Box::new),
            },
        );
    }

    fn dispatch_thread_delete(&self, data: Value) {
        let Some(deleted) = self.parse::<ThreadDeleteData>("THREAD_DELETE", data) else {
            return;
        };

        let cached = self.client.channels.remove(deleted.id);
        self.client.thread_guild_map.remove(&deleted.id);
        self.client.messages.remove_channel(deleted.id);

        self.client.emit(
            self.id,
            Event::ThreadDelete(Possibly::from_cache(cached, deleted.id)),
        );
    }

    fn dispatch_message_create(&self, data: Value) {
        let Some(message) = self.parse::<Message>("MESSAGE_CREATE", data) else {
            return;
        };

        if let Some(ref author) = message.author {
            self.client.users.add(author.clone());
        }
        self.client.channels.update(message.channel_id, |channel| {
            channel.last_message_id = Some(message.id);
        });
        self.client.messages.add(message.clone());

        self.client.emit(self.id, Event::MessageCreate(Box::new(message)));
    }

    fn dispatch_message_update(&self, data: Value) {
        let Some(update) = self.parse::<MessageUpdateData>("MESSAGE_UPDATE", data) else {
            return;
        };

        let updated = self.client.messages.update(update.id, |message| {
            if let Some(ref content) = update.content {
                message.content = content.clone();
            }
            if update.edited_timestamp.is_some() {
                message.edited_timestamp = update.edited_timestamp.clone();
            }
            if let Some(pinned) = update.pinned {
                message.pinned = pinned;
            }
        });

        self.client.emit(
            self.id,
            Event::MessageUpdate {
                id: update.id,
                channel_id: update.channel_id,
                message: updated.map(Box::new),
            },
        );
    }

    fn dispatch_message_delete(&self, data: Value) {
        let Some(deleted) = self.parse::<MessageDeleteData>("MESSAGE_DELETE", data) else {
            return;
        };

        let message = self.client.messages.remove(deleted.id);
        self.client.emit(
            self.id,
            Event::MessageDelete {
                id: deleted.id,
                channel_id: deleted.channel_id,
                message: message.map(Box::new),
            },
        );
    }

    fn dispatch_message_delete_bulk(&self, data: Value) {
        let Some(deleted) = self.parse::<MessageDeleteBulkData>("MESSAGE_DELETE_BULK", data)
        else {
            return;
        };

        for id in &deleted.ids {
            self.client.messages.remove(*id);
        }
        self.client.emit(
            self.id,
            Event::MessageDeleteBulk {
                ids: deleted.ids,
                channel_id: deleted.channel_id,
            },
        );
    }

    fn dispatch_reaction_add(&self, data: Value) {
        let Some(reaction) = self.parse::<ReactionData>("MESSAGE_REACTION_ADD", data) else {
            return;
        };

        let key = reaction.emoji.cache_key();
        let own = self.client.user_id() == Some(reaction.user_id);

        let updated = self.client.messages.update(reaction.message_id, |message| {
            let counts = message.reactions.entry(key.clone()).or_default();
            counts.count += 1;
            if own {
                counts.me = true;
            }
        });

        self.client.emit(
            self.id,
            Event::MessageReactionAdd {
                message: Possibly::from_cache(updated, reaction.message_id),
                user_id: reaction.user_id,
                emoji: reaction.emoji,
            },
        );
    }

    fn dispatch_reaction_remove(&self, data: Value) {
        let Some(reaction) = self.parse::<ReactionData>("MESSAGE_REACTION_REMOVE", data) else {
            return;
        };

        let key = reaction.emoji.cache_key();
        let own = self.client.user_id() == Some(reaction.user_id);

        let updated = self.client.messages.update(reaction.message_id, |message| {
            if let Some(counts) = message.reactions.get_mut(&key) {
                counts.count = counts.count.saturating_sub(1);
                if own {
                    counts.me = false;
                }
                if counts.count == 0 {
                    message.reactions.remove(&key);
                }
            }
        });

        self.client.emit(
            self.id,
            Event::MessageReactionRemove {
                message: Possibly::from_cache(updated, reaction.message_id),
                user_id: reaction.user_id,
                emoji: reaction.emoji,
            },
        );
    }

    fn dispatch_reaction_remove_all(&self, data: Value) {
        let Some(cleared) = self.parse::<ReactionRemoveAllData>("MESSAGE_REACTION_REMOVE_ALL", data)
        else {
            return;
        };

        let updated = self.client.messages.update(cleared.message_id, |message| {
            message.reactions.clear();
        });

        self.client.emit(
            self.id,
            Event::MessageReactionRemoveAll {
                message: Possibly::from_cache(updated, cleared.message_id),
            },
        );
    }

    fn dispatch_reaction_remove_emoji(&self, data: Value) {
        let Some(cleared) =
            self.parse::<ReactionRemoveEmojiData>("MESSAGE_REACTION_REMOVE_EMOJI", data)
        else {
            return;
        };

        let key = cleared.emoji.cache_key();
        let updated = self.client.messages.update(cleared.message_id, |message| {
            message.reactions.remove(&key);
        });

        self.client.emit(
            self.id,
            Event::MessageReactionRemoveEmoji {
                message: Possibly::from_cache(updated, cleared.message_id),
                emoji: cleared.emoji,
            },
        );
    }

    fn dispatch_presence_update(&self, data: Value) {
        let Some(presence) = self.parse::<Presence>("PRESENCE_UPDATE", data) else {
            return;
        };

        let mut old = None;
        if let Some(guild_id) = presence.guild_id {
            let user_id = presence.user.id;
            old = self
                .client
                .members
                .get(guild_id, user_id)
                .and_then(|member| member.presence);
            self.client.members.update(guild_id, user_id, |member| {
                member.presence = Some(presence.clone());
            });
        }

        self.client.emit(
            self.id,
            Event::PresenceUpdate {
                presence: Box::new(presence),
                old: old.map(Box::new),
            },
        );
    }

    fn dispatch_typing_start(&self, data: Value) {
        let Some(typing) = self.parse::<TypingStartData>("TYPING_START", data) else {
            return;
        };

        self.client.emit(
            self.id,
            Event::TypingStart {
                channel_id: typing.channel_id,
                guild_id: typing.guild_id,
                user_id: typing.user_id,
            },
        );
    }

    fn dispatch_user_update(&self, data: Value) {
        let Some(user) = self.parse::<User>("USER_UPDATE", data) else {
            return;
        };

        let old = self.client.users.get(user.id);
        if self.client.user_id() == Some(user.id) {
            self.client.set_user(user.clone());
        }
        self.client.users.add(user.clone());

        self.client.emit(self.id, Event::UserUpdate { user, old });
    }

    fn dispatch_voice_state_update(&self, data: Value) {
        let Some(state) = self.parse::<VoiceState>("VOICE_STATE_UPDATE", data) else {
            return;
        };
        let Some(guild_id) = state.guild_id else {
            debug!(shard_id = self.id, "voice state without guild, ignoring");
            return;
        };
        let user_id = state.user_id;

        if let Some(channel_id) = state.channel_id {
            if let Some(channel) = self.client.channels.get(channel_id) {
                if !channel.channel_type.is_voice() {
                    warn!(
                        shard_id = self.id,
                        channel_id = %channel_id,
                        channel_type = ?channel.channel_type,
                        "voice state update targets a non-voice channel"
                    );
                    return;
                }
            }
        }

        let old = self.client.voice_states.get(guild_id, user_id);
        if state.channel_id.is_some() {
            self.client
                .voice_states
                .add(guild_id, user_id, state.clone());
        } else {
            self.client.voice_states.remove(guild_id, user_id);
        }

        if let Some(ref member) = state.member {
            if let Some(ref user) = member.user {
                self.client.users.add(user.clone());
            }
            self.client.members.add(guild_id, user_id, member.clone());
        }
        self.client.members.update(guild_id, user_id, |member| {
            member.deaf = state.deaf;
            member.mute = state.mute;
        });

        let old_channel = old.as_ref().and_then(|s| s.channel_id);
        let event = match (old_channel, state.channel_id) {
            (None, Some(channel_id)) => Event::VoiceChannelJoin {
                guild_id,
                user_id,
                channel_id,
            },
            (Some(old_channel_id), None) => Event::VoiceChannelLeave {
                guild_id,
                user_id,
                old_channel_id,
            },
            (Some(old_channel_id), Some(channel_id)) if old_channel_id != channel_id => {
                Event::VoiceChannelSwitch {
                    guild_id,
                    user_id,
                    channel_id,
                    old_channel_id,
                }
            }
            _ => Event::VoiceStateUpdate {
                state: Box::new(state),
                old: old.map(Box::new),
            },
        };
        self.client.emit(self.id, event);
    }

    fn dispatch_voice_server_update(&self, data: Value) {
        let Some(update) = self.parse::<VoiceServerUpdateData>("VOICE_SERVER_UPDATE", data) else {
            return;
        };

        self.client.emit(
            self.id,
            Event::VoiceServerUpdate {
                guild_id: update.guild_id,
                token: update.token,
                endpoint: update.endpoint,
            },
        );
    }

    /// Arm (or push out) the deadline that declares the shard ready
    /// once the initial GUILD_CREATE stream goes quiet.
    pub(crate) fn restart_guild_create_timeout(&self) {
        let timeout = self.client.options().guild_create_timeout;
        *self.guild_create_deadline.lock() = Some(Instant::now() + timeout);
    }

    /// Drive the readiness pipeline: request members for one queued
    /// guild at a time, then declare the shard ready when nothing is
    /// pending.
    pub(crate) fn check_ready(&self) {
        if self.session.is_ready() {
            return;
        }

        let next = self.get_all_users_queue.lock().pop_front();
        if let Some(guild_id) = next {
            self.get_all_users_pending.lock().insert(guild_id);
            let presences = self
                .client
                .options()
                .intents
                .contains(Intents::GUILD_PRESENCES);
            let options = RequestMembersOptions {
                presences,
                ..Default::default()
            };

            match self.request_guild_members(guild_id, options) {
                // Completion is tracked through the chunk handler.
                Ok(receiver) => drop(receiver),
                Err(error) => {
                    warn!(
                        shard_id = self.id,
                        guild_id = %guild_id,
                        %error,
                        "failed to request members during readiness"
                    );
                    self.get_all_users_pending.lock().remove(&guild_id);
                    return self.check_ready();
                }
            }
            return;
        }

        if self.get_all_users_pending.lock().is_empty() {
            self.session.set_ready(true);
            info!(shard_id = self.id, "shard ready");
            self.client.emit(self.id, Event::ShardReady);
            self.notify(ShardNotice::Ready(self.id));
        }
    }
}
