//! Gateway intent bits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// A set of gateway intents, serialized as the raw bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Intents(pub u64);

impl Intents {
    /// `GUILDS`: guild create/update/delete and channel events.
    pub const GUILDS: Intents = Intents(1 << 0);
    /// `GUILD_MEMBERS`: member add/update/remove and member list chunks.
    pub const GUILD_MEMBERS: Intents = Intents(1 << 1);
    /// `GUILD_MESSAGES`: message create/update/delete in guilds.
    pub const GUILD_MESSAGES: Intents = Intents(1 << 9);
    /// `MESSAGE_CONTENT`: access to message content fields.
    pub const MESSAGE_CONTENT: Intents = Intents(1 << 15);

    /// The intent set every scanning session connects with.
    pub const SCANNER: Intents = Intents(
        Self::GUILDS.0 | Self::GUILD_MEMBERS.0 | Self::GUILD_MESSAGES.0 | Self::MESSAGE_CONTENT.0,
    );

    /// Whether all bits of `other` are present in `self`.
    pub const fn contains(self, other: Intents) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bitfield value.
    pub const fn bits(self) -> u64 {
        self.0
    }
}

impl BitOr for Intents {
    type Output = Intents;

    fn bitor(self, rhs: Intents) -> Intents {
        Intents(self.0 | rhs.0)
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_set_contains_all_four() {
        assert!(Intents::SCANNER.contains(Intents::GUILDS));
        assert!(Intents::SCANNER.contains(Intents::GUILD_MEMBERS));
        assert!(Intents::SCANNER.contains(Intents::GUILD_MESSAGES));
        assert!(Intents::SCANNER.contains(Intents::MESSAGE_CONTENT));
        assert!(!Intents::GUILDS.contains(Intents::SCANNER));
    }

    #[test]
    fn serializes_as_number() {
        assert_eq!(serde_json::to_string(&Intents::GUILDS).unwrap(), "1");
    }
}
