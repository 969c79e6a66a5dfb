//! Interactive slash-command invocation without a bot token.
//!
//! The account behaves like a user: it discovers the command from the guild's
//! application-command index, posts an interaction with a monotonic nonce,
//! then correlates the bot's out-of-band reply.
//!
//! Correlation is a reply-matcher state machine: the pending entry is keyed
//! by nonce first, remapped under the message id once the bot's first frame
//! arrives, and both keys are cleaned up on delivery. "Thinking" (deferred)
//! replies wait for the later `MESSAGE_UPDATE`. Gateway payloads may be
//! truncated, so the final content is re-fetched over REST before delivery.
//! Entries abandoned by a timed-out caller are swept on the next invocation.

use crate::error::{ScanError, ScanResult};
use crate::gateway::GatewaySession;
use crate::limits::CircuitBreaker;
use crate::rest::DiscordApi;
use condo_proto::gateway::Event;
use condo_proto::rest::slash_command_payload;
use condo_proto::{ApplicationCommand, ChannelId, GuildId, Message, UserId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long a caller waits for the bot's reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// How many recent channel messages to re-fetch when materializing a reply.
const REPLY_FETCH_LIMIT: u8 = 10;

/// Age after which an abandoned pending entry is swept.
const PENDING_SWEEP_AGE: Duration = Duration::from_secs(60);

struct PendingReply {
    tx: mpsc::Sender<Message>,
    /// Nonce key, retained so delivery can remove both map entries.
    nonce: String,
    created: Instant,
}

/// Shared executor state for one verification account + channel.
pub struct CommandExecutor {
    api: Arc<dyn DiscordApi>,
    session: Arc<GatewaySession>,
    breaker: Arc<CircuitBreaker>,
    guild_id: GuildId,
    channel_id: ChannelId,
    command_name: String,
    command_option: String,
    command: tokio::sync::Mutex<Option<ApplicationCommand>>,
    pending: Arc<Mutex<HashMap<String, PendingReply>>>,
    nonce_counter: AtomicU64,
}

impl CommandExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn DiscordApi>,
        session: Arc<GatewaySession>,
        breaker: Arc<CircuitBreaker>,
        guild_id: GuildId,
        channel_id: ChannelId,
        command_name: String,
        command_option: String,
    ) -> Arc<Self> {
        let executor = Arc::new(Self {
            api,
            session,
            breaker,
            guild_id,
            channel_id,
            command_name,
            command_option,
            command: tokio::sync::Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            nonce_counter: AtomicU64::new(0),
        });
        executor.spawn_router();
        executor
    }

    /// Spawn the gateway listener that routes bot replies to waiting callers.
    fn spawn_router(self: &Arc<Self>) {
        let executor = Arc::clone(self);
        let mut events = self.session.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => executor.route_event(event.as_ref()).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped = skipped, "verification router lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn route_event(&self, event: &Event) {
        let (message, is_update) = match event {
            Event::MessageCreate(message) => (message.as_ref(), false),
            Event::MessageUpdate(message) => (message.as_ref(), true),
            _ => return,
        };

        // Only bot replies to interactions in the configured channel count.
        if message.channel_id != self.channel_id
            || !message.author.bot
            || message.interaction.is_none()
        {
            return;
        }

        let message_key = message.id.to_string();

        if !is_update {
            if let Some(nonce) = message.nonce.clone().filter(|n| !n.is_empty()) {
                // First frame for this request: mirror the reply channel
                // under the message id so the eventual update can find it.
                let cloned = {
                    let pending = self.pending.lock();
                    pending.get(&nonce).map(|entry| PendingReply {
                        tx: entry.tx.clone(),
                        nonce: entry.nonce.clone(),
                        created: entry.created,
                    })
                };
                if let Some(entry) = cloned {
                    self.pending.lock().insert(message_key.clone(), entry);
                    if message.is_loading() {
                        // Deferred reply; the real content arrives as an
                        // update.
                        return;
                    }
                    self.deliver(&message_key).await;
                }
                return;
            }
        }

        // Update frames (and creates without a usable nonce) match by id.
        if self.pending.lock().contains_key(&message_key) {
            self.deliver(&message_key).await;
        }
    }

    /// Materialize the reply over REST and hand it to the waiting caller,
    /// removing both map keys.
    async fn deliver(&self, message_key: &str) {
        let full = match self
            .api
            .recent_messages(self.channel_id, REPLY_FETCH_LIMIT)
            .await
        {
            Ok(messages) => messages
                .into_iter()
                .find(|m| m.id.to_string() == message_key),
            Err(e) => {
                warn!(error = %e, "reply materialization fetch failed");
                None
            }
        };

        let entry = {
            let mut pending = self.pending.lock();
            let entry = pending.remove(message_key);
            if let Some(entry) = &entry {
                pending.remove(&entry.nonce);
            }
            entry
        };

        if let (Some(entry), Some(message)) = (entry, full) {
            let _ = entry.tx.try_send(message);
        }
    }

    /// Drop pending entries older than the sweep age (abandoned by callers
    /// that timed out).
    fn sweep_stale(&self) {
        let mut pending = self.pending.lock();
        pending.retain(|_, entry| entry.created.elapsed() < PENDING_SWEEP_AGE);
    }

    /// Lazily discover the slash command from the guild's command index.
    async fn resolve_command(&self) -> ScanResult<ApplicationCommand> {
        let mut cached = self.command.lock().await;
        if let Some(command) = cached.as_ref() {
            return Ok(command.clone());
        }

        let index = self
            .breaker
            .guard(self.api.command_index(self.guild_id))
            .await?;
        let command = index
            .application_commands
            .into_iter()
            .find(|c| c.name == self.command_name)
            .ok_or_else(|| ScanError::CommandNotFound(self.command_name.clone()))?;
        *cached = Some(command.clone());
        debug!(command = %self.command_name, id = %command.id, "slash command discovered");
        Ok(command)
    }

    fn next_nonce(&self) -> String {
        // Monotonic nanosecond base plus a counter so two invocations in the
        // same tick never collide.
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let seq = self.nonce_counter.fetch_add(1, Ordering::Relaxed);
        format!("{nanos}{seq:03}")
    }

    /// Invoke the command for `target` and await the bot's reply. One request
    /// per executor is in flight at a time in practice (the manager is
    /// sequential); the map still keys by nonce for safety.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        target: UserId,
    ) -> ScanResult<Message> {
        self.sweep_stale();
        let command = self.resolve_command().await?;

        let nonce = self.next_nonce();
        let (tx, mut rx) = mpsc::channel(1);
        self.pending.lock().insert(
            nonce.clone(),
            PendingReply {
                tx,
                nonce: nonce.clone(),
                created: Instant::now(),
            },
        );

        let payload = slash_command_payload(
            &command,
            self.guild_id,
            self.channel_id,
            &self.session.session_id(),
            &self.command_option,
            target,
            &nonce,
        );

        if let Err(e) = self
            .breaker
            .guard(self.api.post_interaction(&payload))
            .await
        {
            self.pending.lock().remove(&nonce);
            return Err(e);
        }

        tokio::select! {
            reply = rx.recv() => {
                reply.ok_or_else(|| ScanError::Gateway("reply channel closed".to_string()))
            }
            _ = tokio::time::sleep(REPLY_TIMEOUT) => {
                // Leave the entry for the sweep: a late reply must not hit a
                // recycled channel.
                Err(ScanError::ResponseTimeout)
            }
            _ = cancel.cancelled() => Err(ScanError::Cancelled),
        }
    }
}
