//! Roblox open-API collaborator.
//!
//! Profile, friends and group lookups over the public endpoints. The
//! [`RobloxApi`] seam lets tests script responses; the production client is
//! a thin reqwest wrapper with per-request timeouts.

use crate::error::{ScanError, ScanResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use condo_proto::RobloxId;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A Roblox account profile.
#[derive(Debug, Clone, Default)]
pub struct RobloxProfile {
    pub id: RobloxId,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
    pub is_banned: bool,
}

/// The Roblox lookups the pipeline performs.
#[async_trait]
pub trait RobloxApi: Send + Sync {
    /// Fetch a user profile.
    async fn fetch_user(&self, id: RobloxId) -> ScanResult<RobloxProfile>;

    /// Fetch a user's friends list (ids only).
    async fn fetch_friends(&self, id: RobloxId) -> ScanResult<Vec<RobloxId>>;

    /// Fetch the group ids a user belongs to.
    async fn fetch_groups(&self, id: RobloxId) -> ScanResult<Vec<u64>>;
}

/// Production client over the public Roblox APIs.
pub struct RobloxClient {
    http: reqwest::Client,
    users_base: String,
    friends_base: String,
    groups_base: String,
}

impl Default for RobloxClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RobloxClient {
    /// Client against the public endpoints.
    pub fn new() -> Self {
        Self::with_bases(
            "https://users.roblox.com",
            "https://friends.roblox.com",
            "https://groups.roblox.com",
        )
    }

    /// Client against alternate endpoints (tests).
    pub fn with_bases(
        users: impl Into<String>,
        friends: impl Into<String>,
        groups: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("condoscan/0.3")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            users_base: users.into(),
            friends_base: friends.into(),
            groups_base: groups.into(),
        }
    }

    async fn get_json(&self, url: &str) -> ScanResult<serde_json::Value> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ScanError::RateLimited);
        }
        if status.as_u16() == 404 {
            return Err(ScanError::UserNotVisible);
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), url = %url, "roblox api error response");
            return Err(ScanError::Api(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[derive(Deserialize)]
struct WireProfile {
    id: u64,
    name: String,
    #[serde(rename = "displayName", default)]
    display_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
    #[serde(rename = "isBanned", default)]
    is_banned: bool,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct FriendStub {
    id: u64,
}

#[derive(Deserialize)]
struct GroupRole {
    group: GroupStub,
}

#[derive(Deserialize)]
struct GroupStub {
    id: u64,
}

#[async_trait]
impl RobloxApi for RobloxClient {
    async fn fetch_user(&self, id: RobloxId) -> ScanResult<RobloxProfile> {
        let url = format!("{}/v1/users/{}", self.users_base, id);
        let body = self.get_json(&url).await?;
        let wire: WireProfile = serde_json::from_value(body)?;
        Ok(RobloxProfile {
            id: RobloxId(wire.id),
            name: wire.name,
            display_name: wire.display_name,
            description: wire.description,
            created_at: wire.created,
            is_banned: wire.is_banned,
        })
    }

    async fn fetch_friends(&self, id: RobloxId) -> ScanResult<Vec<RobloxId>> {
        let url = format!("{}/v1/users/{}/friends", self.friends_base, id);
        let body = self.get_json(&url).await?;
        let envelope: DataEnvelope<FriendStub> = serde_json::from_value(body)?;
        Ok(envelope.data.into_iter().map(|f| RobloxId(f.id)).collect())
    }

    async fn fetch_groups(&self, id: RobloxId) -> ScanResult<Vec<u64>> {
        let url = format!("{}/v2/users/{}/groups/roles", self.groups_base, id);
        let body = self.get_json(&url).await?;
        let envelope: DataEnvelope<GroupRole> = serde_json::from_value(body)?;
        Ok(envelope.data.into_iter().map(|r| r.group.id).collect())
    }
}
