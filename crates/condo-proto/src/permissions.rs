//! Channel permission bits.
//!
//! Only the bits the scanner actually evaluates are named; everything else
//! passes through opaquely. Discord serializes permission sets as decimal
//! strings.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// A permission bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions(pub u64);

impl Permissions {
    /// `VIEW_CHANNEL`: the member can read the channel at all.
    pub const VIEW_CHANNEL: Permissions = Permissions(1 << 10);
    /// `ADMINISTRATOR`: implies every other permission.
    pub const ADMINISTRATOR: Permissions = Permissions(1 << 3);

    /// Whether all bits of `other` are present.
    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & Self::ADMINISTRATOR.0 != 0 || self.0 & other.0 == other.0
    }

    /// Apply an overwrite: clear `deny` bits, then set `allow` bits.
    pub const fn apply(self, allow: Permissions, deny: Permissions) -> Permissions {
        Permissions((self.0 & !deny.0) | allow.0)
    }
}

impl BitOr for Permissions {
    type Output = Permissions;
    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

impl BitAnd for Permissions {
    type Output = Permissions;
    fn bitand(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 & rhs.0)
    }
}

impl Not for Permissions {
    type Output = Permissions;
    fn not(self) -> Permissions {
        Permissions(!self.0)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PermVisitor;

        impl de::Visitor<'_> for PermVisitor {
            type Value = Permissions;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a permission bitfield as string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse::<u64>().map(Permissions).map_err(de::Error::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(Permissions(v))
            }
        }

        deserializer.deserialize_any(PermVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_deny_wins_then_allow_restores() {
        let base = Permissions::VIEW_CHANNEL | Permissions(1 << 11);
        let denied = base.apply(Permissions::default(), Permissions::VIEW_CHANNEL);
        assert!(!denied.contains(Permissions::VIEW_CHANNEL));
        let restored = denied.apply(Permissions::VIEW_CHANNEL, Permissions::default());
        assert!(restored.contains(Permissions::VIEW_CHANNEL));
    }

    #[test]
    fn administrator_implies_view() {
        assert!(Permissions::ADMINISTRATOR.contains(Permissions::VIEW_CHANNEL));
    }

    #[test]
    fn parses_string_form() {
        let p: Permissions = serde_json::from_str("\"1024\"").unwrap();
        assert!(p.contains(Permissions::VIEW_CHANNEL));
    }
}
