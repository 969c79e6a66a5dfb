//! Core domain entities.
//!
//! - [`member`]: server membership, server info and Discord↔Roblox
//!   connection records produced by the sync and scan paths.
//! - [`reason`]: evidence reasons keyed by kind, with confidence weighting.
//! - [`review`]: the Roblox account under review and its status lifecycle.
//! - [`message`]: AI-flagged message rows and per-user summaries.

mod member;
mod message;
mod reason;
mod review;

pub use member::{RobloxConnection, ServerInfo, ServerMember};
pub use message::{InappropriateMessage, UserSummary};
pub use reason::{Reason, ReasonKind, Reasons};
pub use review::{ReviewUser, UserStatus};
