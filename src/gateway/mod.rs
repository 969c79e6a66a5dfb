//! Gateway session management.
//!
//! One [`session::GatewaySession`] per configured account token: websocket
//! lifecycle (identify, heartbeat with ACK tracking, reconnect backoff),
//! guild-state maintenance and dispatch fan-out over a broadcast channel.
//! [`member_list::MemberListStream`] filters that fan-out down to one guild's
//! lazy member-list updates for the sync worker.

mod member_list;
mod session;

pub use member_list::MemberListStream;
pub use session::{GatewaySession, GuildRecord};
