//! # condo-proto
//!
//! Wire-protocol types for the Discord user-session surface consumed by
//! condoscan: snowflake identifiers, gateway payloads (identify, heartbeat,
//! lazy member lists, message events), REST response shapes (profiles,
//! message search, application commands) and interaction payload
//! construction.
//!
//! This crate performs no I/O. Everything here is serde models plus small
//! helpers, so the daemon and its tests share one definition of the wire.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod gateway;
pub mod id;
pub mod intents;
pub mod permissions;
pub mod rest;

pub use error::ProtoError;
pub use gateway::{Event, GatewayPayload, MemberListItem, MemberListOp, MemberListUpdate, Opcode};
pub use id::{ChannelId, GuildId, MessageId, RobloxId, UserId};
pub use intents::Intents;
pub use permissions::Permissions;
pub use rest::{
    ApplicationCommand, Channel, ConnectedAccount, Embed, Message, MessageComponent,
    SearchedMessage, UserProfile,
};
