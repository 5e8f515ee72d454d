//! Presence types: online status and activities.

use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};

/// User status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Online.
    #[default]
    Online,
    /// Do Not Disturb.
    Dnd,
    /// Away / Idle.
    Idle,
    /// Invisible (shown as offline). Only valid when sent by us.
    Invisible,
    /// Offline.
    Offline,
}

/// Activity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ActivityType {
    /// Playing {name}
    Playing,
    /// Streaming {name}
    Streaming,
    /// Listening to {name}
    Listening,
    /// Watching {name}
    Watching,
    /// {emoji} {name}
    Custom,
    /// Competing in {name}
    Competing,
}

impl From<u8> for ActivityType {
    fn from(value: u8) -> Self {
        match value {
            1 => ActivityType::Streaming,
            2 => ActivityType::Listening,
            3 => ActivityType::Watching,
            4 => ActivityType::Custom,
            5 => ActivityType::Competing,
            _ => ActivityType::Playing,
        }
    }
}

impl From<ActivityType> for u8 {
    fn from(value: ActivityType) -> Self {
        match value {
            ActivityType::Playing => 0,
            ActivityType::Streaming => 1,
            ActivityType::Listening => 2,
            ActivityType::Watching => 3,
            ActivityType::Custom => 4,
            ActivityType::Competing => 5,
        }
    }
}

/// An activity shown on a presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Activity name.
    pub name: String,

    /// Activity type.
    #[serde(rename = "type")]
    pub activity_type: ActivityType,

    /// Stream URL (only for the Streaming type).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Custom status text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// The user reference carried on a PRESENCE_UPDATE payload. Usually
/// only the ID is guaranteed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PresenceUser {
    /// User ID.
    pub id: Snowflake,
}

/// A user's presence in a guild.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Presence {
    /// The user the presence belongs to.
    pub user: PresenceUser,
    /// The guild the presence applies to.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// The user's status.
    #[serde(default)]
    pub status: Status,
    /// Current activities.
    #[serde(default)]
    pub activities: Vec<Activity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_presence() {
        let json = r#"{
            "user": {"id": "7"},
            "guild_id": "1",
            "status": "dnd",
            "activities": [{"name": "with fire", "type": 0}]
        }"#;
        let presence: Presence = serde_json::from_str(json).unwrap();
        assert_eq!(presence.status, Status::Dnd);
        assert_eq!(presence.activities[0].activity_type, ActivityType::Playing);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&Status::Idle).unwrap(), "\"idle\"");
        let status: Status = serde_json::from_str("\"offline\"").unwrap();
        assert_eq!(status, Status::Offline);
    }

    #[test]
    fn test_unknown_activity_type_defaults() {
        let activity: Activity =
            serde_json::from_str(r#"{"name": "x", "type": 42}"#).unwrap();
        assert_eq!(activity.activity_type, ActivityType::Playing);
    }
}
