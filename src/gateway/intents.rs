//! Gateway intents
//!
//! Capability flags sent with IDENTIFY. They decide which event families the
//! remote endpoint delivers on the connection.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use crate::error::{Error, Result};

/// A set of gateway intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Intents(u64);

impl Intents {
    pub const GUILDS: Intents = Intents(1 << 0);
    pub const GUILD_MEMBERS: Intents = Intents(1 << 1);
    pub const GUILD_MODERATION: Intents = Intents(1 << 2);
    pub const GUILD_EMOJIS_AND_STICKERS: Intents = Intents(1 << 3);
    pub const GUILD_INTEGRATIONS: Intents = Intents(1 << 4);
    pub const GUILD_WEBHOOKS: Intents = Intents(1 << 5);
    pub const GUILD_INVITES: Intents = Intents(1 << 6);
    pub const GUILD_VOICE_STATES: Intents = Intents(1 << 7);
    pub const GUILD_PRESENCES: Intents = Intents(1 << 8);
    pub const GUILD_MESSAGES: Intents = Intents(1 << 9);
    pub const GUILD_MESSAGE_REACTIONS: Intents = Intents(1 << 10);
    pub const GUILD_MESSAGE_TYPING: Intents = Intents(1 << 11);
    pub const DIRECT_MESSAGES: Intents = Intents(1 << 12);
    pub const DIRECT_MESSAGE_REACTIONS: Intents = Intents(1 << 13);
    pub const DIRECT_MESSAGE_TYPING: Intents = Intents(1 << 14);
    pub const MESSAGE_CONTENT: Intents = Intents(1 << 15);

    const NAMED: &'static [(&'static str, Intents)] = &[
        ("guilds", Intents::GUILDS),
        ("guild_members", Intents::GUILD_MEMBERS),
        ("guild_moderation", Intents::GUILD_MODERATION),
        ("guild_emojis_and_stickers", Intents::GUILD_EMOJIS_AND_STICKERS),
        ("guild_integrations", Intents::GUILD_INTEGRATIONS),
        ("guild_webhooks", Intents::GUILD_WEBHOOKS),
        ("guild_invites", Intents::GUILD_INVITES),
        ("guild_voice_states", Intents::GUILD_VOICE_STATES),
        ("guild_presences", Intents::GUILD_PRESENCES),
        ("guild_messages", Intents::GUILD_MESSAGES),
        ("guild_message_reactions", Intents::GUILD_MESSAGE_REACTIONS),
        ("guild_message_typing", Intents::GUILD_MESSAGE_TYPING),
        ("direct_messages", Intents::DIRECT_MESSAGES),
        ("direct_message_reactions", Intents::DIRECT_MESSAGE_REACTIONS),
        ("direct_message_typing", Intents::DIRECT_MESSAGE_TYPING),
        ("message_content", Intents::MESSAGE_CONTENT),
    ];

    /// No intents
    pub const fn empty() -> Self {
        Intents(0)
    }

    /// Every named intent
    pub fn all() -> Self {
        Self::NAMED
            .iter()
            .fold(Intents::empty(), |acc, (_, flag)| acc | *flag)
    }

    /// Build from raw bits
    pub const fn from_bits(bits: u64) -> Self {
        Intents(bits)
    }

    /// Raw bit value sent on the wire
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Check whether every flag in `other` is set
    pub const fn contains(&self, other: Intents) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Names of the flags set in this value
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}

impl Default for Intents {
    fn default() -> Self {
        Intents::GUILD_MESSAGES
    }
}

impl BitOr for Intents {
    type Output = Intents;

    fn bitor(self, rhs: Intents) -> Intents {
        Intents(self.0 | rhs.0)
    }
}

impl BitOrAssign for Intents {
    fn bitor_assign(&mut self, rhs: Intents) {
        self.0 |= rhs.0;
    }
}

impl FromStr for Intents {
    type Err = Error;

    /// Parse a comma separated list of intent names, or a plain integer
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Ok(bits) = trimmed.parse::<u64>() {
            return Ok(Intents(bits));
        }

        let mut intents = Intents::empty();
        for name in trimmed.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let normalized = name.to_lowercase();
            if normalized == "all" {
                intents |= Intents::all();
                continue;
            }
            let flag = Self::NAMED
                .iter()
                .find(|(known, _)| *known == normalized)
                .map(|(_, flag)| *flag)
                .ok_or_else(|| Error::Config(format!("Unknown intent: {}", name)))?;
            intents |= flag;
        }
        Ok(intents)
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(","))
    }
}

impl Serialize for Intents {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bits(u64),
            Names(Vec<String>),
            List(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bits(bits) => Ok(Intents(bits)),
            Repr::Names(names) => names
                .join(",")
                .parse()
                .map_err(serde::de::Error::custom),
            Repr::List(list) => list.parse().map_err(serde::de::Error::custom),
        }
    }
}
