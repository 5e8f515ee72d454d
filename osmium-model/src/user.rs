use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};

/// Discord User representation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    /// User ID.
    pub id: Snowflake,
    /// Username (not unique post-pomelo).
    #[serde(default)]
    pub username: String,
    /// User's 4-digit tag ("0" for pomelo users).
    #[serde(default)]
    pub discriminator: String,
    /// User's display name.
    #[serde(default)]
    pub global_name: Option<String>,
    /// Avatar hash.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Whether the user is a bot.
    #[serde(default)]
    pub bot: bool,
    /// Whether the user is an official system user.
    #[serde(default)]
    pub system: bool,
    /// Banner hash.
    #[serde(default)]
    pub banner: Option<String>,
    /// Banner color as an integer.
    #[serde(default)]
    pub accent_color: Option<u32>,
    /// Public flags on the user.
    #[serde(default)]
    pub public_flags: Option<u64>,
}

impl User {
    /// The name shown in clients: global name when set, else username.
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_user() {
        let json = r#"{"id": "123", "username": "tester", "discriminator": "0"}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.id.get(), 123);
        assert_eq!(user.display_name(), "tester");
        assert!(!user.bot);
    }

    #[test]
    fn test_display_name_prefers_global() {
        let json = r#"{"id": "1", "username": "a", "discriminator": "0", "global_name": "B"}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.display_name(), "B");
    }
}
