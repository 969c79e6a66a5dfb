//! Gateway payloads: the envelope, client frames (identify, heartbeat, lazy
//! member-list subscriptions) and the dispatch events the worker consumes.

use crate::error::ProtoError;
use crate::id::{ChannelId, GuildId, UserId};
use crate::intents::Intents;
use crate::rest::{Guild, Message};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

/// Members are delivered in ranges of this width; one chunk is one range.
pub const MEMBER_LIST_CHUNK_SIZE: u64 = 100;

/// Gateway opcodes used by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Server -> client event dispatch.
    Dispatch = 0,
    /// Bidirectional heartbeat.
    Heartbeat = 1,
    /// Client -> server session start.
    Identify = 2,
    /// Server -> client: re-handshake requested.
    Reconnect = 7,
    /// Server -> client: session invalidated.
    InvalidSession = 9,
    /// Server -> client first frame, carries the heartbeat interval.
    Hello = 10,
    /// Server -> client heartbeat acknowledgement.
    HeartbeatAck = 11,
    /// Client -> server lazy guild/member-list subscription.
    GuildSubscriptions = 14,
}

impl Opcode {
    /// Map a raw opcode byte. Unknown opcodes return `None` so callers can
    /// skip frames this crate does not model.
    pub fn from_u8(op: u8) -> Option<Opcode> {
        Some(match op {
            0 => Opcode::Dispatch,
            1 => Opcode::Heartbeat,
            2 => Opcode::Identify,
            7 => Opcode::Reconnect,
            9 => Opcode::InvalidSession,
            10 => Opcode::Hello,
            11 => Opcode::HeartbeatAck,
            14 => Opcode::GuildSubscriptions,
            _ => return None,
        })
    }
}

/// The raw gateway envelope: `{op, d, s, t}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayload {
    /// Opcode.
    pub op: u8,
    /// Payload body.
    #[serde(default)]
    pub d: Value,
    /// Sequence number (dispatch frames only).
    #[serde(default)]
    pub s: Option<u64>,
    /// Event name (dispatch frames only).
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayPayload {
    /// Decode an envelope from a websocket text frame.
    pub fn decode(raw: &str) -> Result<GatewayPayload, ProtoError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// `HELLO` body.
#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    /// Milliseconds between heartbeats.
    pub heartbeat_interval: u64,
}

/// `READY` body (fields the worker needs).
#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    /// Gateway session id, required for interaction payloads.
    pub session_id: String,
    /// The authenticated user.
    pub user: ReadyUser,
    /// Guild stubs; user sessions receive full guilds here.
    #[serde(default)]
    pub guilds: Vec<Guild>,
}

/// The `user` object inside `READY`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyUser {
    /// Session account id.
    pub id: UserId,
    /// Session account username.
    #[serde(default)]
    pub username: String,
}

/// Build an `IDENTIFY` frame for a user-session token. The client properties
/// mimic a desktop browser; gateway-side heuristics reject obvious bot
/// fingerprints on user tokens.
pub fn identify_frame(token: &str, intents: Intents) -> Value {
    json!({
        "op": Opcode::Identify as u8,
        "d": {
            "token": token,
            "intents": intents.bits(),
            "properties": {
                "os": "Windows",
                "browser": "Chrome",
                "device": "",
                "browser_user_agent": crate::gateway::BROWSER_USER_AGENT,
            },
            "presence": {
                "status": "online",
                "since": 0,
                "activities": [],
                "afk": false
            },
            "compress": false
        }
    })
}

/// The desktop browser identity presented on both the gateway and REST.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Build a heartbeat frame echoing the last seen sequence number.
pub fn heartbeat_frame(last_seq: Option<u64>) -> Value {
    json!({ "op": Opcode::Heartbeat as u8, "d": last_seq })
}

/// Build an opcode-14 lazy member-list subscription for one chunk index.
/// Chunk `k` requests ranges `[0..99]` and `[k*100..k*100+99]`; range 0 must
/// always be present or the gateway drops the subscription.
pub fn member_list_subscribe_frame(
    guild_id: GuildId,
    channel_id: ChannelId,
    chunk: u64,
) -> Value {
    let mut ranges = vec![[0, MEMBER_LIST_CHUNK_SIZE - 1]];
    if chunk > 0 {
        let lo = chunk * MEMBER_LIST_CHUNK_SIZE;
        ranges.push([lo, lo + MEMBER_LIST_CHUNK_SIZE - 1]);
    }
    json!({
        "op": Opcode::GuildSubscriptions as u8,
        "d": {
            "guild_id": guild_id.to_string(),
            "typing": true,
            "activities": true,
            "threads": false,
            "channels": { (channel_id.to_string()): ranges }
        }
    })
}

// ============================================================================
// GUILD_MEMBER_LIST_UPDATE
// ============================================================================

/// `GUILD_MEMBER_LIST_UPDATE` dispatch body.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberListUpdate {
    /// Guild the list belongs to.
    pub guild_id: GuildId,
    /// Total member count the gateway reports for the list.
    #[serde(default)]
    pub member_count: u64,
    /// Online member count.
    #[serde(default)]
    pub online_count: u64,
    /// List mutation operations.
    #[serde(default)]
    pub ops: Vec<MemberListOp>,
}

impl MemberListUpdate {
    /// All member items across SYNC/INSERT/UPDATE ops.
    pub fn members(&self) -> impl Iterator<Item = &MemberListMember> {
        self.ops.iter().flat_map(|op| op.members())
    }

    /// The reported total for termination checks; prefers `member_count` and
    /// falls back to `online_count` when the gateway omits it.
    pub fn total_visible(&self) -> u64 {
        if self.member_count > 0 {
            self.member_count
        } else {
            self.online_count
        }
    }
}

/// One list operation.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberListOp {
    /// Operation discriminator: `SYNC`, `INSERT`, `UPDATE`, `DELETE`,
    /// `INVALIDATE`.
    pub op: String,
    /// Synced range for `SYNC` ops.
    #[serde(default)]
    pub range: Option<[u64; 2]>,
    /// Items for `SYNC` ops.
    #[serde(default)]
    pub items: Vec<MemberListItem>,
    /// Item for `INSERT`/`UPDATE` ops.
    #[serde(default)]
    pub item: Option<MemberListItem>,
}

impl MemberListOp {
    fn members(&self) -> Vec<&MemberListMember> {
        let singles = self.item.iter();
        self.items
            .iter()
            .chain(singles)
            .filter_map(|i| match i {
                MemberListItem::Member(member) => Some(member),
                MemberListItem::Group(_) => None,
            })
            .collect()
    }
}

/// One item in a member list: either a role-group header or a member row.
/// Externally tagged on the wire: `{"group": {...}}` / `{"member": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub enum MemberListItem {
    /// A group header row.
    #[serde(rename = "group")]
    Group(Value),
    /// A member row.
    #[serde(rename = "member")]
    Member(MemberListMember),
}

/// A member row inside a list item.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberListMember {
    /// The user object.
    pub user: MemberUser,
    /// When the user joined the guild.
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

/// The `user` object inside a member row.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberUser {
    /// User id.
    pub id: UserId,
    /// Whether this is a bot account.
    #[serde(default)]
    pub bot: bool,
}

// ============================================================================
// Event decoding
// ============================================================================

/// Decoded dispatch events. Everything the worker does not consume collapses
/// into `Unknown` so the session loop stays total.
#[derive(Debug, Clone)]
pub enum Event {
    /// Session became ready.
    Ready(Ready),
    /// A guild became available.
    GuildCreate(Box<Guild>),
    /// A guild became unavailable or was left.
    GuildDelete(GuildId),
    /// A message was created.
    MessageCreate(Box<Message>),
    /// A message was edited.
    MessageUpdate(Box<Message>),
    /// A lazy member list changed.
    MemberListUpdate(Box<MemberListUpdate>),
    /// Anything else.
    Unknown(String),
}

impl Event {
    /// Decode a dispatch frame by its `t` name.
    pub fn decode(name: &str, body: Value) -> Result<Event, ProtoError> {
        Ok(match name {
            "READY" => Event::Ready(serde_json::from_value(body)?),
            "GUILD_CREATE" => Event::GuildCreate(Box::new(serde_json::from_value(body)?)),
            "GUILD_DELETE" => {
                #[derive(Deserialize)]
                struct Stub {
                    id: GuildId,
                }
                let stub: Stub = serde_json::from_value(body)?;
                Event::GuildDelete(stub.id)
            }
            "MESSAGE_CREATE" => Event::MessageCreate(Box::new(serde_json::from_value(body)?)),
            "MESSAGE_UPDATE" => Event::MessageUpdate(Box::new(serde_json::from_value(body)?)),
            "GUILD_MEMBER_LIST_UPDATE" => {
                Event::MemberListUpdate(Box::new(serde_json::from_value(body)?))
            }
            other => Event::Unknown(other.to_string()),
        })
    }
}

/// Serialize a client frame for the wire.
pub fn encode_frame(frame: &Value) -> String {
    frame.to_string()
}

/// Default gateway endpoint for user sessions.
pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=9&encoding=json";
