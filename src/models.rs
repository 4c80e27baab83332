//! Data models for the payloads handlers work with
//!
//! Only the fields the library itself reads are typed; everything else stays
//! available through the raw event payload.

use serde::{Deserialize, Serialize};

/// A user account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Snowflake ID
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    /// Whether the account belongs to a bot
    #[serde(default)]
    pub bot: bool,
}

/// A chat message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub content: String,
    /// ISO 8601 timestamp
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Message {
    /// Whether the author is a bot account
    pub fn is_from_bot(&self) -> bool {
        self.author.as_ref().map_or(false, |author| author.bot)
    }
}
