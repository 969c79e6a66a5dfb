//! REST response shapes and request payload builders.
//!
//! Field coverage is deliberately partial: only what the scanner, the
//! member-list walker and the verification executor read. Unknown fields are
//! ignored on decode.

use crate::id::{ChannelId, GuildId, MessageId, UserId};
use crate::permissions::Permissions;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

/// Message flag: the interaction reply is still "thinking" (deferred).
pub const MESSAGE_FLAG_LOADING: u64 = 1 << 7;

/// Channel type: guild text channel.
pub const CHANNEL_TYPE_GUILD_TEXT: u8 = 0;

// ============================================================================
// User profile
// ============================================================================

/// `GET /users/{id}/profile` response.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    /// The profiled user.
    pub user: ProfileUser,
    /// External account connections shown on the profile.
    #[serde(default)]
    pub connected_accounts: Vec<ConnectedAccount>,
    /// Guilds shared between the requesting session and the user.
    #[serde(default)]
    pub mutual_guilds: Vec<MutualGuild>,
}

/// The `user` object inside a profile response.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUser {
    /// User id.
    pub id: UserId,
    /// Current username.
    pub username: String,
}

/// One entry of `connected_accounts[]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectedAccount {
    /// Connection provider, e.g. `"roblox"`, `"steam"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Provider-side account id (string on the wire).
    pub id: String,
    /// Provider-side display name.
    pub name: String,
    /// Whether the provider verified the link.
    #[serde(default)]
    pub verified: bool,
}

impl ConnectedAccount {
    /// Whether this is a verified Roblox connection.
    pub fn is_verified_roblox(&self) -> bool {
        self.verified && self.kind.eq_ignore_ascii_case("roblox")
    }
}

/// One entry of `mutual_guilds[]`.
#[derive(Debug, Clone, Deserialize)]
pub struct MutualGuild {
    /// Guild id.
    pub id: GuildId,
    /// The user's nick in that guild, if set.
    #[serde(default)]
    pub nick: Option<String>,
}

// ============================================================================
// Message search
// ============================================================================

/// `GET /guilds/{gid}/messages/search` response. Hits arrive as a nested
/// `messages[][]` array where each inner slice is a hit plus context rows.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageSearchResponse {
    /// Total result count reported by the index.
    #[serde(default)]
    pub total_results: u64,
    /// Nested hit groups.
    #[serde(default)]
    pub messages: Vec<Vec<SearchedMessage>>,
}

impl MessageSearchResponse {
    /// Flatten the nested hit groups, keeping only messages by `author`.
    pub fn messages_by(&self, author: UserId) -> Vec<SearchedMessage> {
        self.messages
            .iter()
            .flatten()
            .filter(|m| m.author.id == author)
            .cloned()
            .collect()
    }
}

/// A message row from the search index.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchedMessage {
    /// Message id.
    pub id: MessageId,
    /// Message text.
    #[serde(default)]
    pub content: String,
    /// Author stub.
    pub author: Author,
}

/// Minimal author object.
#[derive(Debug, Clone, Deserialize)]
pub struct Author {
    /// Author id.
    pub id: UserId,
    /// Whether the author is a bot account.
    #[serde(default)]
    pub bot: bool,
}

// ============================================================================
// Channel + guild structures (from GUILD_CREATE and REST)
// ============================================================================

/// A guild channel as delivered in `GUILD_CREATE` / `GET /guilds/{id}/channels`.
#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    /// Channel id.
    pub id: ChannelId,
    /// Channel type (0 = guild text).
    #[serde(rename = "type")]
    pub kind: u8,
    /// Channel name.
    #[serde(default)]
    pub name: Option<String>,
    /// Id of the most recent message, a proxy for activity.
    #[serde(default)]
    pub last_message_id: Option<MessageId>,
    /// Permission overwrites applied on top of the guild base.
    #[serde(default)]
    pub permission_overwrites: Vec<PermissionOverwrite>,
}

impl Channel {
    /// Whether a member holding `base` guild permissions can view this
    /// channel, considering only the `@everyone` overwrite (scanning accounts
    /// carry no roles in the guilds they watch).
    pub fn viewable_with(&self, guild_id: GuildId, base: Permissions) -> bool {
        let mut perms = base;
        for ow in &self.permission_overwrites {
            // The @everyone overwrite reuses the guild id as its target id.
            if ow.id == guild_id.get() {
                perms = perms.apply(ow.allow, ow.deny);
            }
        }
        perms.contains(Permissions::VIEW_CHANNEL)
    }

    /// Whether this is a plain text channel.
    pub fn is_text(&self) -> bool {
        self.kind == CHANNEL_TYPE_GUILD_TEXT
    }
}

/// A permission overwrite row.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionOverwrite {
    /// Target id (role or member; `@everyone` uses the guild id).
    #[serde(deserialize_with = "crate::rest::de_u64_string")]
    pub id: u64,
    /// Granted bits.
    #[serde(default)]
    pub allow: Permissions,
    /// Revoked bits.
    #[serde(default)]
    pub deny: Permissions,
}

/// A guild role (only the `@everyone` base is evaluated).
#[derive(Debug, Clone, Deserialize)]
pub struct Role {
    /// Role id (`@everyone` reuses the guild id).
    #[serde(deserialize_with = "crate::rest::de_u64_string")]
    pub id: u64,
    /// Permission bits granted by the role.
    #[serde(default)]
    pub permissions: Permissions,
}

/// A guild as delivered by `GUILD_CREATE`.
#[derive(Debug, Clone, Deserialize)]
pub struct Guild {
    /// Guild id.
    pub id: GuildId,
    /// Guild name.
    #[serde(default)]
    pub name: String,
    /// Member count if the gateway included it.
    #[serde(default)]
    pub member_count: Option<u64>,
    /// Roles, used for the `@everyone` permission base.
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Channels.
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl Guild {
    /// The `@everyone` permission base for this guild.
    pub fn everyone_permissions(&self) -> Permissions {
        self.roles
            .iter()
            .find(|r| r.id == self.id.get())
            .map(|r| r.permissions)
            .unwrap_or_default()
    }
}

// ============================================================================
// Messages (gateway events + channel message fetch)
// ============================================================================

/// A message as seen on `MESSAGE_CREATE`/`MESSAGE_UPDATE` and
/// `GET /channels/{id}/messages`.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    /// Message id.
    pub id: MessageId,
    /// Channel the message was posted in.
    pub channel_id: ChannelId,
    /// Guild, absent for DMs.
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    /// Author stub.
    pub author: Author,
    /// Text content (may be truncated or empty on gateway payloads).
    #[serde(default)]
    pub content: String,
    /// Message flags bitfield.
    #[serde(default)]
    pub flags: u64,
    /// Client-supplied nonce, echoed back on create.
    #[serde(default)]
    pub nonce: Option<String>,
    /// Present when the message was sent through a webhook.
    #[serde(default)]
    pub webhook_id: Option<String>,
    /// Guild member object, absent outside guilds.
    #[serde(default)]
    pub member: Option<serde_json::Value>,
    /// Rich embeds.
    #[serde(default)]
    pub embeds: Vec<Embed>,
    /// Component tree.
    #[serde(default)]
    pub components: Vec<MessageComponent>,
    /// Present when this message is a reply to an application command.
    #[serde(default)]
    pub interaction: Option<MessageInteraction>,
}

impl Message {
    /// Whether the deferred-reply ("thinking") flag is set.
    pub fn is_loading(&self) -> bool {
        self.flags & MESSAGE_FLAG_LOADING != 0
    }
}

/// The `interaction` object attached to slash-command replies.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageInteraction {
    /// Interaction id.
    pub id: String,
    /// Invoked command name.
    #[serde(default)]
    pub name: String,
}

/// A rich embed (fields the verification parsers read).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Embed {
    /// Embed title.
    #[serde(default)]
    pub title: Option<String>,
    /// Embed description.
    #[serde(default)]
    pub description: Option<String>,
    /// Name/value field rows.
    #[serde(default)]
    pub fields: Vec<EmbedField>,
}

/// One embed field.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbedField {
    /// Field label.
    pub name: String,
    /// Field value.
    pub value: String,
}

/// A message component. Container components nest; text-display components
/// carry `content`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageComponent {
    /// Component type discriminator.
    #[serde(rename = "type", default)]
    pub kind: u8,
    /// Text content for display components.
    #[serde(default)]
    pub content: Option<String>,
    /// Nested children for container components.
    #[serde(default)]
    pub components: Vec<MessageComponent>,
}

// ============================================================================
// Application commands + interactions
// ============================================================================

/// `GET /guilds/{gid}/application-command-index` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationCommandIndex {
    /// Commands registered in the guild.
    #[serde(default)]
    pub application_commands: Vec<ApplicationCommand>,
}

/// One application command descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationCommand {
    /// Command id.
    pub id: String,
    /// Owning application id.
    pub application_id: String,
    /// Command version snowflake.
    pub version: String,
    /// Command name.
    pub name: String,
    /// Command type (1 = chat input).
    #[serde(rename = "type", default = "default_command_type")]
    pub kind: u8,
}

fn default_command_type() -> u8 {
    1
}

/// Build the `POST /interactions` body invoking `command` with a single
/// user-typed option. `nonce` correlates the out-of-band bot reply.
pub fn slash_command_payload(
    command: &ApplicationCommand,
    guild_id: GuildId,
    channel_id: ChannelId,
    session_id: &str,
    option_name: &str,
    target: UserId,
    nonce: &str,
) -> serde_json::Value {
    json!({
        "type": 2,
        "application_id": command.application_id,
        "guild_id": guild_id.to_string(),
        "channel_id": channel_id.to_string(),
        "session_id": session_id,
        "data": {
            "version": command.version,
            "id": command.id,
            "name": command.name,
            "type": command.kind,
            "options": [{
                "type": 6,
                "name": option_name,
                "value": target.to_string(),
            }],
            "attachments": [],
        },
        "nonce": nonce,
    })
}

// ============================================================================
// Shared deserialize helpers
// ============================================================================

pub(crate) fn de_u64_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s.parse::<u64>().map_err(D::Error::custom),
        Raw::Num(n) => Ok(n),
    }
}

/// Parse an ISO8601 timestamp as delivered in member objects.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_decodes_and_filters_roblox() {
        let raw = serde_json::json!({
            "user": {"id": "100", "username": "target"},
            "connected_accounts": [
                {"type": "roblox", "id": "555", "name": "rbxuser", "verified": true},
                {"type": "steam", "id": "1", "name": "s", "verified": true},
                {"type": "roblox", "id": "556", "name": "unv", "verified": false}
            ],
            "mutual_guilds": [{"id": "200"}, {"id": "201", "nick": "x"}]
        });
        let profile: UserProfile = serde_json::from_value(raw).unwrap();
        assert_eq!(profile.user.id, UserId(100));
        assert_eq!(profile.mutual_guilds.len(), 2);
        let verified: Vec<_> = profile
            .connected_accounts
            .iter()
            .filter(|c| c.is_verified_roblox())
            .collect();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].id, "555");
    }

    #[test]
    fn search_flattens_nested_hits() {
        let raw = serde_json::json!({
            "total_results": 3,
            "messages": [
                [{"id": "1", "content": "a", "author": {"id": "9"}}],
                [
                    {"id": "2", "content": "b", "author": {"id": "9"}},
                    {"id": "3", "content": "context", "author": {"id": "8"}}
                ]
            ]
        });
        let resp: MessageSearchResponse = serde_json::from_value(raw).unwrap();
        let mine = resp.messages_by(UserId(9));
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[1].content, "b");
    }

    #[test]
    fn channel_view_respects_everyone_overwrite() {
        let guild_id = GuildId(700);
        let chan: Channel = serde_json::from_value(serde_json::json!({
            "id": "701",
            "type": 0,
            "name": "general",
            "permission_overwrites": [
                {"id": "700", "allow": "0", "deny": "1024"}
            ]
        }))
        .unwrap();
        assert!(!chan.viewable_with(guild_id, Permissions::VIEW_CHANNEL));

        let open: Channel = serde_json::from_value(serde_json::json!({
            "id": "702", "type": 0, "name": "lobby"
        }))
        .unwrap();
        assert!(open.viewable_with(guild_id, Permissions::VIEW_CHANNEL));
    }

    #[test]
    fn slash_payload_shape() {
        let cmd = ApplicationCommand {
            id: "1".into(),
            application_id: "2".into(),
            version: "3".into(),
            name: "getinfo".into(),
            kind: 1,
        };
        let payload = slash_command_payload(
            &cmd,
            GuildId(10),
            ChannelId(11),
            "sess",
            "user",
            UserId(12),
            "nonce-1",
        );
        assert_eq!(payload["type"], 2);
        assert_eq!(payload["data"]["options"][0]["value"], "12");
        assert_eq!(payload["nonce"], "nonce-1");
    }

    #[test]
    fn loading_flag() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "id": "5", "channel_id": "6", "author": {"id": "7", "bot": true},
            "flags": MESSAGE_FLAG_LOADING
        }))
        .unwrap();
        assert!(msg.is_loading());
    }
}
