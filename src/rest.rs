//! Discord REST surface.
//!
//! [`DiscordApi`] is the seam the scanner and the verification executor call
//! through; [`RestClient`] is the production implementation over reqwest with
//! a spoofed desktop browser identity. Tests substitute scripted fakes.

use crate::error::{ScanError, ScanResult};
use async_trait::async_trait;
use condo_proto::gateway::BROWSER_USER_AGENT;
use condo_proto::rest::{ApplicationCommandIndex, MessageSearchResponse};
use condo_proto::{ChannelId, GuildId, Message, UserId, UserProfile};
use std::time::Duration;
use tracing::warn;

/// Per-request timeout for REST calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Discord error code: unknown user.
const ERR_UNKNOWN_USER: i64 = 10013;
/// Discord error code: unknown guild.
const ERR_UNKNOWN_GUILD: i64 = 10004;

/// The REST operations the pipeline consumes.
#[async_trait]
pub trait DiscordApi: Send + Sync {
    /// `GET /users/{id}/profile` with mutual guilds.
    async fn fetch_profile(&self, user: UserId) -> ScanResult<UserProfile>;

    /// `GET /guilds/{gid}/messages/search` for one author. An unknown guild
    /// yields an empty response rather than an error.
    async fn search_messages(
        &self,
        guild: GuildId,
        author: UserId,
    ) -> ScanResult<MessageSearchResponse>;

    /// `GET /guilds/{gid}/application-command-index`.
    async fn command_index(&self, guild: GuildId) -> ScanResult<ApplicationCommandIndex>;

    /// `POST /interactions`.
    async fn post_interaction(&self, payload: &serde_json::Value) -> ScanResult<()>;

    /// `GET /channels/{cid}/messages?limit=N`, newest first.
    async fn recent_messages(&self, channel: ChannelId, limit: u8) -> ScanResult<Vec<Message>>;
}

/// Production REST client bound to one account token.
pub struct RestClient {
    http: reqwest::Client,
    token: String,
    base: String,
}

impl RestClient {
    /// Build a client for a user-session token.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base(token, "https://discord.com/api/v9")
    }

    /// Build against an alternate base URL (tests).
    pub fn with_base(token: impl Into<String>, base: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            token: token.into(),
            base: base.into(),
        }
    }

    async fn get_json(&self, url: &str) -> ScanResult<serde_json::Value> {
        let response = self
            .http
            .get(url)
            .header("Authorization", &self.token)
            .send()
            .await?;
        Self::decode_body(response).await
    }

    /// Decode a response, mapping Discord's error envelope onto the
    /// pipeline's taxonomy.
    async fn decode_body(response: reqwest::Response) -> ScanResult<serde_json::Value> {
        let status = response.status();
        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) if status.is_success() => return Err(ScanError::Http(e)),
            Err(_) => serde_json::Value::Null,
        };

        if status.as_u16() == 429 {
            return Err(ScanError::RateLimited);
        }

        if let Some(code) = body.get("code").and_then(|c| c.as_i64()) {
            match code {
                ERR_UNKNOWN_USER => return Err(ScanError::UserNotVisible),
                ERR_UNKNOWN_GUILD => return Err(ScanError::Api(404)),
                _ => {}
            }
        }

        if !status.is_success() {
            warn!(status = status.as_u16(), "discord api error response");
            return Err(ScanError::Api(status.as_u16()));
        }

        Ok(body)
    }
}

#[async_trait]
impl DiscordApi for RestClient {
    async fn fetch_profile(&self, user: UserId) -> ScanResult<UserProfile> {
        let url = format!(
            "{}/users/{}/profile?with_mutual_guilds=true&with_mutual_friends=false",
            self.base, user
        );
        let body = self.get_json(&url).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn search_messages(
        &self,
        guild: GuildId,
        author: UserId,
    ) -> ScanResult<MessageSearchResponse> {
        let url = format!(
            "{}/guilds/{}/messages/search?author_id={}&sort_by=timestamp&sort_order=desc&offset=0&include_nsfw=true",
            self.base, guild, author
        );
        match self.get_json(&url).await {
            Ok(body) => Ok(serde_json::from_value(body)?),
            // Unknown guild: the account was removed between listing and
            // search. Treated as "no messages", not a failure.
            Err(ScanError::Api(404)) => Ok(MessageSearchResponse {
                total_results: 0,
                messages: Vec::new(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn command_index(&self, guild: GuildId) -> ScanResult<ApplicationCommandIndex> {
        let url = format!("{}/guilds/{}/application-command-index", self.base, guild);
        let body = self.get_json(&url).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn post_interaction(&self, payload: &serde_json::Value) -> ScanResult<()> {
        let url = format!("{}/interactions", self.base);
        let response = self
            .http
            .post(&url)
            .header("Authorization", &self.token)
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ScanError::RateLimited);
        }
        if !status.is_success() {
            return Err(ScanError::Api(status.as_u16()));
        }
        Ok(())
    }

    async fn recent_messages(&self, channel: ChannelId, limit: u8) -> ScanResult<Vec<Message>> {
        let url = format!("{}/channels/{}/messages?limit={}", self.base, channel, limit);
        let body = self.get_json(&url).await?;
        Ok(serde_json::from_value(body)?)
    }
}
