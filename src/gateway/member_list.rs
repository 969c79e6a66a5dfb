//! Per-guild lazy member-list streaming.
//!
//! Wraps a session's event fan-out with a guild filter and chunk-request
//! helper. The sync worker requests one chunk at a time and waits for the
//! matching `GUILD_MEMBER_LIST_UPDATE`; a missing update within the wait
//! window is the "list not found" signal that drives channel switching.

use crate::error::{ScanError, ScanResult};
use crate::gateway::GatewaySession;
use condo_proto::gateway::{Event, MemberListUpdate, member_list_subscribe_frame};
use condo_proto::{ChannelId, GuildId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A filtered view of one guild's member-list updates.
pub struct MemberListStream {
    session: Arc<GatewaySession>,
    guild: GuildId,
    rx: broadcast::Receiver<Arc<Event>>,
}

impl MemberListStream {
    /// Subscribe to `guild`'s list updates on `session`.
    pub fn new(session: Arc<GatewaySession>, guild: GuildId) -> Self {
        let rx = session.subscribe();
        Self { session, guild, rx }
    }

    /// Request one chunk of the lazy list for `channel`.
    pub async fn request_chunk(&self, channel: ChannelId, chunk: u64) -> ScanResult<()> {
        self.session
            .send(member_list_subscribe_frame(self.guild, channel, chunk))
            .await
    }

    /// Wait up to `timeout` for the next update for this guild. Returns
    /// `None` on timeout (the "list not found" case) and
    /// [`ScanError::Cancelled`] when `cancel` fires first.
    pub async fn next_update(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ScanResult<Option<MemberListUpdate>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
                event = self.rx.recv() => event,
            };

            match event {
                Ok(event) => {
                    if let Event::MemberListUpdate(update) = event.as_ref()
                        && update.guild_id == self.guild
                    {
                        return Ok(Some(update.as_ref().clone()));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(guild = %self.guild, skipped = skipped, "member list stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ScanError::Gateway("session event stream closed".to_string()));
                }
            }
        }
    }
}
