//! Snowflake identifier newtypes.
//!
//! Discord serializes snowflakes as decimal strings to survive JSON number
//! precision limits; these wrappers hold the numeric value and (de)serialize
//! through the string form. `RobloxId` is included here because connection
//! records carry both sides of a link.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

macro_rules! snowflake {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw numeric value.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct IdVisitor;

                impl Visitor<'_> for IdVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str("a snowflake as string or integer")
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                        v.parse::<u64>().map($name).map_err(de::Error::custom)
                    }

                    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                        Ok($name(v))
                    }
                }

                deserializer.deserialize_any(IdVisitor)
            }
        }
    };
}

snowflake!(
    /// A Discord user id.
    UserId
);
snowflake!(
    /// A Discord guild (server) id.
    GuildId
);
snowflake!(
    /// A Discord channel id.
    ChannelId
);
snowflake!(
    /// A Discord message id.
    MessageId
);
snowflake!(
    /// A Roblox user id. Not a snowflake upstream, but shares the
    /// string-or-integer wire representation.
    RobloxId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_string_form() {
        let id = UserId(123456789012345678);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"123456789012345678\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn accepts_integer_form() {
        let id: GuildId = serde_json::from_str("42").unwrap();
        assert_eq!(id, GuildId(42));
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_str::<UserId>("\"notanid\"").is_err());
    }
}
