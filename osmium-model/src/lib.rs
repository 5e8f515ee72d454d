//! Osmium Model - Core types for the Discord API
#![deny(unsafe_code)]
//!
//! Entity types shared by the gateway and the cache. All types follow
//! Discord API v10 wire shapes (snake_case field names, string-encoded
//! snowflakes) and deserialize defensively: optional fields default
//! rather than fail.
//!
//! Entities are owned; they are built once from a dispatch payload and
//! then live in the cache.

pub mod channel;
pub mod guild;
pub mod intents;
pub mod member;
pub mod message;
pub mod presence;
pub mod reaction;
pub mod snowflake;
pub mod user;
pub mod voice;

pub use channel::{Channel, ChannelType};
pub use guild::{ApplicationInfo, Guild, UnavailableGuild};
pub use intents::Intents;
pub use member::{Member, Role};
pub use message::Message;
pub use presence::{Activity, ActivityType, Presence, Status};
pub use reaction::{Emoji, ReactionCounts};
pub use snowflake::Snowflake;
pub use user::User;
pub use voice::VoiceState;
