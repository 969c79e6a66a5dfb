//! Gateway event intake.
//!
//! Listens to `MESSAGE_CREATE` on every session purely to keep the member
//! table warm and seed the game catalog: no flagging decisions happen here.
//! DMs, bots, webhooks and member-less payloads are dropped, then a
//! three-tier admission filter (per-user cooldown, per-guild window, global
//! window) bounds the write rate before the member upsert and game-URL
//! dispatch.

use crate::db::Database;
use crate::error::ScanResult;
use crate::gateway::GatewaySession;
use crate::limits::EventWindows;
use crate::models::ServerMember;
use async_trait::async_trait;
use chrono::Utc;
use condo_proto::gateway::Event;
use condo_proto::{GuildId, Message};
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

static GAME_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://www\.roblox\.com/games/\d+[^\s>)]*").expect("game url pattern")
});

/// Collaborator that ingests discovered game links.
#[async_trait]
pub trait GameEnricher: Send + Sync {
    /// Record a game URL sighted in `guild`.
    async fn enrich(&self, url: &str, guild: GuildId) -> ScanResult<()>;
}

/// Default enricher: records the sighting in the activity log.
pub struct ActivityGameEnricher {
    db: Database,
}

impl ActivityGameEnricher {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GameEnricher for ActivityGameEnricher {
    async fn enrich(&self, url: &str, guild: GuildId) -> ScanResult<()> {
        self.db
            .activity()
            .log(&crate::db::ActivityEntry::system(
                "game_url_sighted",
                None,
                serde_json::json!({"url": url, "server_id": guild.to_string()}),
            ))
            .await?;
        Ok(())
    }
}

/// Per-process event intake shared across session listeners.
pub struct EventIntake {
    db: Database,
    windows: EventWindows,
    enricher: Arc<dyn GameEnricher>,
}

impl EventIntake {
    pub fn new(db: Database, windows: EventWindows, enricher: Arc<dyn GameEnricher>) -> Arc<Self> {
        Arc::new(Self {
            db,
            windows,
            enricher,
        })
    }

    /// Spawn a listener task over one session's event stream.
    pub fn spawn_listener(
        self: &Arc<Self>,
        session: Arc<GatewaySession>,
        cancel: CancellationToken,
    ) {
        let intake = Arc::clone(self);
        let mut events = session.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => {
                        if let Event::MessageCreate(message) = event.as_ref()
                            && let Err(e) = intake.handle_message(message).await
                        {
                            warn!(error = %e, code = e.error_code(), "event intake failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped = skipped, "event intake lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Prune stale cooldowns and idle window limiters. Called from the
    /// worker's maintenance task.
    pub fn cleanup(&self) {
        self.windows.cleanup();
    }

    /// Process one message event end to end. Public for tests.
    pub async fn handle_message(&self, message: &Message) -> ScanResult<()> {
        let Some(guild) = message.guild_id else {
            return Ok(()); // DM
        };
        if message.author.bot || message.webhook_id.is_some() || message.member.is_none() {
            return Ok(());
        }

        if !self.windows.admit(message.author.id.get(), guild.get()) {
            return Ok(());
        }

        let joined_at = message
            .member
            .as_ref()
            .and_then(|m| m.get("joined_at"))
            .and_then(|j| j.as_str())
            .and_then(condo_proto::rest::parse_timestamp)
            .unwrap_or_else(Utc::now);

        self.db
            .sync()
            .upsert_server_members(
                &[ServerMember::sighted(guild, message.author.id, joined_at)],
                false,
            )
            .await?;

        for url in extract_game_urls(message) {
            if let Err(e) = self.enricher.enrich(&url, guild).await {
                warn!(url = %url, error = %e, "game enrichment failed");
            }
        }

        Ok(())
    }
}

/// Pull every game URL out of a message's content and embeds.
pub fn extract_game_urls(message: &Message) -> Vec<String> {
    let mut urls: Vec<String> = GAME_URL
        .find_iter(&message.content)
        .map(|m| m.as_str().to_string())
        .collect();

    for embed in &message.embeds {
        for text in embed
            .description
            .iter()
            .chain(embed.title.iter())
            .chain(embed.fields.iter().map(|f| &f.value))
        {
            urls.extend(GAME_URL.find_iter(text).map(|m| m.as_str().to_string()));
        }
    }

    urls.dedup();
    urls
}
