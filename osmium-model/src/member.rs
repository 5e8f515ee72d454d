//! Guild member and role types.

use crate::presence::Presence;
use crate::snowflake::Snowflake;
use crate::user::User;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A member of a guild.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Member {
    /// The user this member wraps. Absent in some partial payloads.
    #[serde(default)]
    pub user: Option<User>,

    /// Guild nickname.
    #[serde(default)]
    pub nick: Option<String>,

    /// Guild avatar hash.
    #[serde(default)]
    pub avatar: Option<String>,

    /// Role IDs.
    #[serde(default)]
    pub roles: SmallVec<[Snowflake; 5]>,

    /// When the user joined the guild (ISO8601 timestamp).
    #[serde(default)]
    pub joined_at: Option<String>,

    /// When the user started boosting the guild.
    #[serde(default)]
    pub premium_since: Option<String>,

    /// Whether the user is deafened in voice channels.
    #[serde(default)]
    pub deaf: bool,

    /// Whether the user is muted in voice channels.
    #[serde(default)]
    pub mute: bool,

    /// Guild member flags bitfield.
    #[serde(default)]
    pub flags: u64,

    /// Whether the user has not yet passed membership screening.
    #[serde(default)]
    pub pending: Option<bool>,

    /// When the user's timeout expires (ISO8601 timestamp).
    #[serde(default)]
    pub communication_disabled_until: Option<String>,

    /// Presence attached from chunk payloads. Never on the wire inside
    /// a member object.
    #[serde(skip)]
    pub presence: Option<Presence>,
}

impl Member {
    /// The member's user ID, when the user object is present.
    pub fn user_id(&self) -> Option<Snowflake> {
        self.user.as_ref().map(|u| u.id)
    }
}

/// A guild role.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Role {
    /// Role ID.
    pub id: Snowflake,
    /// Role name.
    #[serde(default)]
    pub name: String,
    /// Integer representation of a hex color code.
    #[serde(default)]
    pub color: u32,
    /// Whether the role is pinned in the user listing.
    #[serde(default)]
    pub hoist: bool,
    /// Sorting position.
    #[serde(default)]
    pub position: i32,
    /// Permission bitset as a string.
    #[serde(default)]
    pub permissions: String,
    /// Whether an integration manages this role.
    #[serde(default)]
    pub managed: bool,
    /// Whether the role is mentionable.
    #[serde(default)]
    pub mentionable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_member() {
        let json = r#"{
            "user": {"id": "42", "username": "m", "discriminator": "0"},
            "nick": "nickname",
            "roles": ["1", "2"],
            "joined_at": "2021-01-01T00:00:00.000000+00:00",
            "deaf": false,
            "mute": true
        }"#;
        let member: Member = serde_json::from_str(json).unwrap();
        assert_eq!(member.user_id(), Some(Snowflake::new(42)));
        assert_eq!(member.roles.len(), 2);
        assert!(member.mute);
        assert!(member.presence.is_none());
    }

    #[test]
    fn test_parse_member_without_user() {
        let json = r#"{"roles": [], "joined_at": null}"#;
        let member: Member = serde_json::from_str(json).unwrap();
        assert!(member.user.is_none());
        assert_eq!(member.user_id(), None);
    }
}
