//! Text-channel selection for the member-list walk.
//!
//! The lazy member list is scoped to a channel, and dead channels produce
//! empty lists. Selection runs in passes over the viewable text channels:
//! community-sounding names first, then recent activity (greatest last
//! message id), then anything not yet attempted. A channel is never
//! re-picked within a guild.

use crate::gateway::GuildRecord;
use condo_proto::{ChannelId, GuildId};
use std::collections::HashSet;

/// Name fragments that mark a channel as likely-active community space.
const NAME_HINTS: [&str; 10] = [
    "general", "main", "announce", "welcome", "lobby", "chat", "lounge", "hangout", "discuss",
    "community",
];

/// Pick the next channel to walk, or `None` when every viewable text channel
/// has been attempted.
pub fn select_channel(
    guild_id: GuildId,
    record: &GuildRecord,
    attempted: &HashSet<ChannelId>,
) -> Option<ChannelId> {
    let viewable: Vec<_> = record
        .channels
        .iter()
        .filter(|c| c.is_text())
        .filter(|c| c.viewable_with(guild_id, record.everyone))
        .filter(|c| !attempted.contains(&c.id))
        .collect();

    // Pass 1: community-sounding name.
    if let Some(channel) = viewable.iter().find(|c| {
        c.name
            .as_deref()
            .is_some_and(|name| {
                let lowered = name.to_lowercase();
                NAME_HINTS.iter().any(|hint| lowered.contains(hint))
            })
    }) {
        return Some(channel.id);
    }

    // Pass 2: most recent activity.
    if let Some(channel) = viewable
        .iter()
        .filter(|c| c.last_message_id.is_some())
        .max_by_key(|c| c.last_message_id)
    {
        return Some(channel.id);
    }

    // Pass 3: anything left.
    viewable.first().map(|c| c.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use condo_proto::Permissions;
    use condo_proto::rest::Channel;

    fn channel(id: u64, name: &str, last_message: Option<u64>) -> Channel {
        serde_json::from_value(serde_json::json!({
            "id": id.to_string(),
            "type": 0,
            "name": name,
            "last_message_id": last_message.map(|m| m.to_string()),
        }))
        .unwrap()
    }

    fn record(channels: Vec<Channel>) -> GuildRecord {
        GuildRecord {
            name: "condo".into(),
            everyone: Permissions::VIEW_CHANNEL,
            channels,
        }
    }

    #[test]
    fn name_hint_wins_over_activity() {
        let record = record(vec![
            channel(1, "spam-pit", Some(999)),
            channel(2, "general-chat", Some(5)),
        ]);
        assert_eq!(
            select_channel(GuildId(7), &record, &HashSet::new()),
            Some(ChannelId(2))
        );
    }

    #[test]
    fn falls_back_to_most_recent_activity() {
        let record = record(vec![
            channel(1, "alpha", Some(10)),
            channel(2, "beta", Some(999)),
            channel(3, "gamma", None),
        ]);
        assert_eq!(
            select_channel(GuildId(7), &record, &HashSet::new()),
            Some(ChannelId(2))
        );
    }

    #[test]
    fn attempted_channels_are_never_repicked() {
        let record = record(vec![
            channel(1, "general", Some(10)),
            channel(2, "beta", Some(999)),
            channel(3, "gamma", None),
        ]);
        let mut attempted = HashSet::new();
        attempted.insert(ChannelId(1));
        assert_eq!(
            select_channel(GuildId(7), &record, &attempted),
            Some(ChannelId(2))
        );
        attempted.insert(ChannelId(2));
        assert_eq!(
            select_channel(GuildId(7), &record, &attempted),
            Some(ChannelId(3))
        );
        attempted.insert(ChannelId(3));
        assert_eq!(select_channel(GuildId(7), &record, &attempted), None);
    }

    #[test]
    fn hidden_channels_are_excluded() {
        let guild = GuildId(7);
        let hidden: Channel = serde_json::from_value(serde_json::json!({
            "id": "1",
            "type": 0,
            "name": "general",
            "permission_overwrites": [{"id": "7", "allow": "0", "deny": "1024"}]
        }))
        .unwrap();
        let record = record(vec![hidden, channel(2, "open", None)]);
        assert_eq!(
            select_channel(guild, &record, &HashSet::new()),
            Some(ChannelId(2))
        );
    }

    #[test]
    fn non_text_channels_are_excluded() {
        let voice: Channel = serde_json::from_value(serde_json::json!({
            "id": "1", "type": 2, "name": "general-voice"
        }))
        .unwrap();
        let record = record(vec![voice]);
        assert_eq!(select_channel(GuildId(7), &record, &HashSet::new()), None);
    }
}
