//! Scripted collaborator fakes shared by the scenario tests.

use crate::analyzer::{FlaggedMessage, MessageAnalyzer, MessageContent};
use crate::error::{ScanError, ScanResult};
use crate::rest::DiscordApi;
use crate::roblox::{RobloxApi, RobloxProfile};
use async_trait::async_trait;
use condo_proto::rest::{ApplicationCommandIndex, MessageSearchResponse};
use condo_proto::{ChannelId, GuildId, Message, RobloxId, UserId, UserProfile};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A scripted Discord REST surface. Profiles and search results are seeded
/// per user/guild; everything unseeded errors like the real API.
#[derive(Default)]
pub struct FakeDiscordApi {
    profiles: Mutex<HashMap<UserId, ScanResultFactory<UserProfile>>>,
    searches: Mutex<HashMap<(GuildId, UserId), Vec<(u64, String)>>>,
    commands: Mutex<HashMap<GuildId, serde_json::Value>>,
    channel_messages: Mutex<HashMap<ChannelId, Vec<serde_json::Value>>>,
    /// Last `POST /interactions` body, for nonce inspection.
    pub last_interaction: Mutex<Option<serde_json::Value>>,
    pub profile_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
}

type ScanResultFactory<T> = Box<dyn Fn() -> ScanResult<T> + Send>;

impl FakeDiscordApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a profile response: `mutual_guilds` ids plus verified Roblox
    /// connections as `(roblox id, username)`.
    pub fn seed_profile(
        &self,
        user: UserId,
        username: &str,
        mutual_guilds: &[u64],
        connections: &[(u64, &str)],
    ) {
        let body = serde_json::json!({
            "user": {"id": user.to_string(), "username": username},
            "connected_accounts": connections
                .iter()
                .map(|(id, name)| serde_json::json!({
                    "type": "roblox", "id": id.to_string(), "name": name, "verified": true
                }))
                .collect::<Vec<_>>(),
            "mutual_guilds": mutual_guilds
                .iter()
                .map(|g| serde_json::json!({"id": g.to_string()}))
                .collect::<Vec<_>>(),
        });
        self.profiles.lock().insert(
            user,
            Box::new(move || Ok(serde_json::from_value(body.clone()).unwrap())),
        );
    }

    /// Seed a profile fetch to fail with the given error every time.
    pub fn seed_profile_error(&self, user: UserId, error: fn() -> ScanError) {
        self.profiles.lock().insert(user, Box::new(move || Err(error())));
    }

    /// Seed message-search hits for `(guild, author)` as `(message id, content)`.
    pub fn seed_messages(&self, guild: GuildId, author: UserId, messages: &[(u64, &str)]) {
        self.searches.lock().insert(
            (guild, author),
            messages.iter().map(|(id, c)| (*id, c.to_string())).collect(),
        );
    }

    /// Seed the guild's application-command index with one command.
    pub fn seed_command(&self, guild: GuildId, name: &str) {
        self.commands.lock().insert(
            guild,
            serde_json::json!({
                "application_commands": [{
                    "id": "9000", "application_id": "9100", "version": "9200",
                    "name": name, "type": 1
                }]
            }),
        );
    }

    /// Seed the channel-message fetch used for reply materialization.
    pub fn seed_channel_message(&self, channel: ChannelId, message: serde_json::Value) {
        self.channel_messages
            .lock()
            .entry(channel)
            .or_default()
            .push(message);
    }
}

#[async_trait]
impl DiscordApi for FakeDiscordApi {
    async fn fetch_profile(&self, user: UserId) -> ScanResult<UserProfile> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        match self.profiles.lock().get(&user) {
            Some(factory) => factory(),
            None => Err(ScanError::UserNotVisible),
        }
    }

    async fn search_messages(
        &self,
        guild: GuildId,
        author: UserId,
    ) -> ScanResult<MessageSearchResponse> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let hits = self
            .searches
            .lock()
            .get(&(guild, author))
            .cloned()
            .unwrap_or_default();
        let body = serde_json::json!({
            "total_results": hits.len(),
            "messages": hits
                .iter()
                .map(|(id, content)| {
                    vec![serde_json::json!({
                        "id": id.to_string(),
                        "content": content,
                        "author": {"id": author.to_string()}
                    })]
                })
                .collect::<Vec<_>>(),
        });
        Ok(serde_json::from_value(body).unwrap())
    }

    async fn command_index(&self, guild: GuildId) -> ScanResult<ApplicationCommandIndex> {
        let body = self
            .commands
            .lock()
            .get(&guild)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"application_commands": []}));
        Ok(serde_json::from_value(body).unwrap())
    }

    async fn post_interaction(&self, payload: &serde_json::Value) -> ScanResult<()> {
        *self.last_interaction.lock() = Some(payload.clone());
        Ok(())
    }

    async fn recent_messages(&self, channel: ChannelId, _limit: u8) -> ScanResult<Vec<Message>> {
        let bodies = self
            .channel_messages
            .lock()
            .get(&channel)
            .cloned()
            .unwrap_or_default();
        Ok(bodies
            .into_iter()
            .map(|b| serde_json::from_value(b).unwrap())
            .collect())
    }
}

/// An analyzer that flags scripted message ids with scripted confidences.
#[derive(Default)]
pub struct FakeAnalyzer {
    verdicts: Mutex<HashMap<u64, (String, f64)>>,
    pub calls: AtomicUsize,
}

impl FakeAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag_message(&self, message_id: u64, reason: &str, confidence: f64) {
        self.verdicts
            .lock()
            .insert(message_id, (reason.to_string(), confidence));
    }
}

#[async_trait]
impl MessageAnalyzer for FakeAnalyzer {
    async fn process_messages(
        &self,
        _guild: GuildId,
        _guild_name: &str,
        _user: UserId,
        messages: &[MessageContent],
    ) -> ScanResult<Vec<FlaggedMessage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let verdicts = self.verdicts.lock();
        Ok(messages
            .iter()
            .filter_map(|m| {
                verdicts.get(&m.id.get()).map(|(reason, confidence)| FlaggedMessage {
                    message_id: m.id,
                    content: m.content.clone(),
                    reason: reason.clone(),
                    confidence: *confidence,
                })
            })
            .collect())
    }
}

/// A Roblox API whose profiles are seeded per id.
#[derive(Default)]
pub struct FakeRobloxApi {
    profiles: Mutex<HashMap<RobloxId, RobloxProfile>>,
    friends: Mutex<HashMap<RobloxId, Vec<RobloxId>>>,
    groups: Mutex<HashMap<RobloxId, Vec<u64>>>,
    pub profile_calls: AtomicUsize,
}

impl FakeRobloxApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_user(&self, id: RobloxId, name: &str, is_banned: bool) {
        self.profiles.lock().insert(
            id,
            RobloxProfile {
                id,
                name: name.to_string(),
                display_name: name.to_string(),
                description: String::new(),
                created_at: None,
                is_banned,
            },
        );
    }

    pub fn seed_friends(&self, id: RobloxId, friends: &[u64]) {
        self.friends
            .lock()
            .insert(id, friends.iter().map(|f| RobloxId(*f)).collect());
    }

    pub fn seed_groups(&self, id: RobloxId, groups: &[u64]) {
        self.groups.lock().insert(id, groups.to_vec());
    }
}

#[async_trait]
impl RobloxApi for FakeRobloxApi {
    async fn fetch_user(&self, id: RobloxId) -> ScanResult<RobloxProfile> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.profiles
            .lock()
            .get(&id)
            .cloned()
            .ok_or(ScanError::UserNotVisible)
    }

    async fn fetch_friends(&self, id: RobloxId) -> ScanResult<Vec<RobloxId>> {
        Ok(self.friends.lock().get(&id).cloned().unwrap_or_default())
    }

    async fn fetch_groups(&self, id: RobloxId) -> ScanResult<Vec<u64>> {
        Ok(self.groups.lock().get(&id).cloned().unwrap_or_default())
    }
}
