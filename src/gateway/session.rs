//! One authenticated gateway session.
//!
//! The session task owns the websocket: it identifies, heartbeats, tracks
//! ACKs, maintains the guild set from READY / GUILD_CREATE / GUILD_DELETE,
//! and fans every dispatch event out to subscribers. Consumers hold the
//! [`GatewaySession`] handle; the task reconnects with capped exponential
//! backoff until the session's cancellation token fires.

use crate::error::{ScanError, ScanResult};
use condo_proto::gateway::{
    self, Event, GatewayPayload, Hello, Opcode, encode_frame, heartbeat_frame, identify_frame,
};
use condo_proto::rest::{Channel, Guild};
use condo_proto::{GuildId, Intents, Permissions, UserId};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Dispatch fan-out capacity. Member-list sync bursts are the largest
/// producer; laggy subscribers drop and resubscribe.
const EVENT_CHANNEL_SIZE: usize = 2048;

/// Cached per-guild state from GUILD_CREATE.
#[derive(Debug, Clone)]
pub struct GuildRecord {
    pub name: String,
    /// `@everyone` permission base.
    pub everyone: Permissions,
    pub channels: Vec<Channel>,
}

impl GuildRecord {
    fn from_guild(guild: &Guild) -> Self {
        Self {
            name: guild.name.clone(),
            everyone: guild.everyone_permissions(),
            channels: guild.channels.clone(),
        }
    }
}

/// Handle to one account's gateway session.
pub struct GatewaySession {
    account_index: usize,
    guilds: DashMap<GuildId, GuildRecord>,
    user_id: parking_lot::RwLock<Option<UserId>>,
    session_id: parking_lot::RwLock<String>,
    events: broadcast::Sender<Arc<Event>>,
    outbound: mpsc::Sender<serde_json::Value>,
    ready_rx: watch::Receiver<bool>,
}

impl GatewaySession {
    /// Spawn a session task for `token`. The returned handle stays valid
    /// across reconnects; it dies only when `cancel` fires.
    pub fn spawn(
        token: String,
        account_index: usize,
        cancel: CancellationToken,
    ) -> Arc<GatewaySession> {
        Self::spawn_at(token, account_index, gateway::GATEWAY_URL.to_string(), cancel)
    }

    /// Spawn against an alternate gateway URL (tests).
    pub fn spawn_at(
        token: String,
        account_index: usize,
        url: String,
        cancel: CancellationToken,
    ) -> Arc<GatewaySession> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = watch::channel(false);

        let session = Arc::new(GatewaySession {
            account_index,
            guilds: DashMap::new(),
            user_id: parking_lot::RwLock::new(None),
            session_id: parking_lot::RwLock::new(String::new()),
            events: events_tx,
            outbound: outbound_tx,
            ready_rx,
        });

        let task_session = Arc::clone(&session);
        tokio::spawn(async move {
            task_session
                .run(token, url, outbound_rx, ready_tx, cancel)
                .await;
        });

        session
    }

    /// Build a session handle with canned guild state and no websocket task.
    /// Outbound frames are drained and dropped; tests inject events with
    /// [`GatewaySession::inject_event`].
    #[cfg(test)]
    pub(crate) fn stub(
        account_index: usize,
        guilds: Vec<(GuildId, GuildRecord)>,
    ) -> Arc<GatewaySession> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = watch::channel(true);
        let _ = ready_tx.send(true);
        tokio::spawn(async move { while outbound_rx.recv().await.is_some() {} });

        let session = Arc::new(GatewaySession {
            account_index,
            guilds: DashMap::new(),
            user_id: parking_lot::RwLock::new(Some(UserId(account_index as u64 + 1))),
            session_id: parking_lot::RwLock::new(format!("stub-session-{account_index}")),
            events: events_tx,
            outbound: outbound_tx,
            ready_rx,
        });
        for (id, record) in guilds {
            session.guilds.insert(id, record);
        }
        session
    }

    /// Push an event into the fan-out as if the gateway dispatched it.
    #[cfg(test)]
    pub(crate) fn inject_event(&self, event: Event) {
        let _ = self.events.send(Arc::new(event));
    }

    /// Zero-based index of the owning account in the configured token list.
    #[allow(dead_code)]
    pub fn account_index(&self) -> usize {
        self.account_index
    }

    /// Subscribe to the dispatch fan-out.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.events.subscribe()
    }

    /// Queue a client frame (heartbeats bypass this path).
    pub async fn send(&self, frame: serde_json::Value) -> ScanResult<()> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ScanError::Gateway("session task stopped".to_string()))
    }

    /// Whether the account currently sees `guild`.
    pub fn has_guild(&self, guild: GuildId) -> bool {
        self.guilds.contains_key(&guild)
    }

    /// Snapshot of visible guild ids.
    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.guilds.iter().map(|entry| *entry.key()).collect()
    }

    /// Snapshot of one guild's cached record.
    pub fn guild(&self, guild: GuildId) -> Option<GuildRecord> {
        self.guilds.get(&guild).map(|entry| entry.value().clone())
    }

    /// The session id from READY (interaction payloads require it).
    pub fn session_id(&self) -> String {
        self.session_id.read().clone()
    }

    /// The authenticated account id, once READY arrived.
    #[allow(dead_code)]
    pub fn user_id(&self) -> Option<UserId> {
        *self.user_id.read()
    }

    /// Wait until READY or `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> ScanResult<()> {
        let mut rx = self.ready_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
            .await
            .map_err(|_| ScanError::ResponseTimeout)?
            .map_err(|_| ScanError::Gateway("session task stopped".to_string()))?;
        Ok(())
    }

    async fn run(
        self: Arc<Self>,
        token: String,
        url: String,
        mut outbound_rx: mpsc::Receiver<serde_json::Value>,
        ready_tx: watch::Sender<bool>,
        cancel: CancellationToken,
    ) {
        let mut backoff_secs: u64 = 1;
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self
                .connect_once(&token, &url, &mut outbound_rx, &ready_tx, &cancel)
                .await
            {
                Ok(()) => break, // clean cancellation-driven close
                Err(e) => {
                    let _ = ready_tx.send(false);
                    warn!(
                        account = self.account_index,
                        error = %e,
                        retry_in = backoff_secs,
                        "gateway session dropped"
                    );
                }
            }

            let jitter_ms = rand::thread_rng().gen_range(0..500);
            let delay = Duration::from_secs(backoff_secs) + Duration::from_millis(jitter_ms);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
            }
            backoff_secs = (backoff_secs * 2).min(60);
        }
        info!(account = self.account_index, "gateway session stopped");
    }

    async fn connect_once(
        &self,
        token: &str,
        url: &str,
        outbound_rx: &mut mpsc::Receiver<serde_json::Value>,
        ready_tx: &watch::Sender<bool>,
        cancel: &CancellationToken,
    ) -> ScanResult<()> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| ScanError::Gateway(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        // First frame must be HELLO with the heartbeat interval.
        let hello = loop {
            let frame = tokio::time::timeout(Duration::from_secs(30), stream.next())
                .await
                .map_err(|_| ScanError::Gateway("no HELLO before timeout".to_string()))?
                .ok_or_else(|| ScanError::Gateway("closed before HELLO".to_string()))?
                .map_err(|e| ScanError::Gateway(e.to_string()))?;
            if let WsMessage::Text(raw) = frame {
                let payload = GatewayPayload::decode(&raw)?;
                if Opcode::from_u8(payload.op) == Some(Opcode::Hello) {
                    let hello: Hello = serde_json::from_value(payload.d)?;
                    break hello;
                }
            }
        };

        sink.send(WsMessage::Text(encode_frame(&identify_frame(
            token,
            Intents::SCANNER,
        ))))
        .await
        .map_err(|e| ScanError::Gateway(e.to_string()))?;

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(hello.heartbeat_interval.max(1000)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.reset(); // skip the immediate first tick
        let mut last_seq: Option<u64> = None;
        let mut acked = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    if !acked {
                        return Err(ScanError::Gateway("heartbeat not acknowledged".to_string()));
                    }
                    acked = false;
                    sink.send(WsMessage::Text(encode_frame(&heartbeat_frame(last_seq))))
                        .await
                        .map_err(|e| ScanError::Gateway(e.to_string()))?;
                }
                Some(frame) = outbound_rx.recv() => {
                    sink.send(WsMessage::Text(encode_frame(&frame)))
                        .await
                        .map_err(|e| ScanError::Gateway(e.to_string()))?;
                }
                incoming = stream.next() => {
                    let frame = incoming
                        .ok_or_else(|| ScanError::Gateway("connection closed".to_string()))?
                        .map_err(|e| ScanError::Gateway(e.to_string()))?;
                    match frame {
                        WsMessage::Text(raw) => {
                            let payload = GatewayPayload::decode(&raw)?;
                            if let Some(seq) = payload.s {
                                last_seq = Some(seq);
                            }
                            match Opcode::from_u8(payload.op) {
                                Some(Opcode::Dispatch) => {
                                    if let Some(name) = payload.t.as_deref() {
                                        self.handle_dispatch(name, payload.d, ready_tx);
                                    }
                                }
                                Some(Opcode::Heartbeat) => {
                                    sink.send(WsMessage::Text(encode_frame(&heartbeat_frame(last_seq))))
                                        .await
                                        .map_err(|e| ScanError::Gateway(e.to_string()))?;
                                }
                                Some(Opcode::HeartbeatAck) => acked = true,
                                Some(Opcode::Reconnect) => {
                                    return Err(ScanError::Gateway("reconnect requested".to_string()));
                                }
                                Some(Opcode::InvalidSession) => {
                                    return Err(ScanError::Gateway("session invalidated".to_string()));
                                }
                                _ => {}
                            }
                        }
                        WsMessage::Close(_) => {
                            return Err(ScanError::Gateway("server closed connection".to_string()));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn handle_dispatch(&self, name: &str, body: serde_json::Value, ready_tx: &watch::Sender<bool>) {
        let event = match Event::decode(name, body) {
            Ok(event) => event,
            Err(e) => {
                debug!(account = self.account_index, event = name, error = %e, "undecodable dispatch");
                return;
            }
        };

        match &event {
            Event::Ready(ready) => {
                *self.user_id.write() = Some(ready.user.id);
                *self.session_id.write() = ready.session_id.clone();
                self.guilds.clear();
                for guild in &ready.guilds {
                    self.guilds.insert(guild.id, GuildRecord::from_guild(guild));
                }
                info!(
                    account = self.account_index,
                    guilds = ready.guilds.len(),
                    "gateway session ready"
                );
                let _ = ready_tx.send(true);
            }
            Event::GuildCreate(guild) => {
                self.guilds.insert(guild.id, GuildRecord::from_guild(guild));
            }
            Event::GuildDelete(guild_id) => {
                self.guilds.remove(guild_id);
            }
            Event::Unknown(_) => return,
            _ => {}
        }

        // Fan out; a send error only means no subscriber is listening.
        let _ = self.events.send(Arc::new(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_body() -> serde_json::Value {
        serde_json::json!({
            "session_id": "sess-1",
            "user": {"id": "42", "username": "scanner"},
            "guilds": [{
                "id": "100",
                "name": "alpha",
                "roles": [{"id": "100", "permissions": "1024"}],
                "channels": [{"id": "101", "type": 0, "name": "general"}]
            }]
        })
    }

    #[tokio::test]
    async fn ready_dispatch_populates_session_state() {
        let session = GatewaySession::stub(0, vec![]);
        let (ready_tx, ready_rx) = watch::channel(false);

        session.handle_dispatch("READY", ready_body(), &ready_tx);

        assert_eq!(session.session_id(), "sess-1");
        assert_eq!(session.user_id(), Some(UserId(42)));
        assert!(session.has_guild(GuildId(100)));
        let record = session.guild(GuildId(100)).unwrap();
        assert_eq!(record.name, "alpha");
        assert!(record.everyone.contains(Permissions::VIEW_CHANNEL));
        assert!(*ready_rx.borrow());
    }

    #[tokio::test]
    async fn guild_create_and_delete_track_membership() {
        let session = GatewaySession::stub(0, vec![]);
        let (ready_tx, _ready_rx) = watch::channel(false);

        session.handle_dispatch(
            "GUILD_CREATE",
            serde_json::json!({"id": "200", "name": "beta"}),
            &ready_tx,
        );
        assert!(session.has_guild(GuildId(200)));
        assert_eq!(session.guild(GuildId(200)).unwrap().name, "beta");

        session.handle_dispatch("GUILD_DELETE", serde_json::json!({"id": "200"}), &ready_tx);
        assert!(!session.has_guild(GuildId(200)));
    }

    #[tokio::test]
    async fn dispatch_events_reach_subscribers() {
        let session = GatewaySession::stub(0, vec![]);
        let mut events = session.subscribe();
        let (ready_tx, _ready_rx) = watch::channel(false);

        session.handle_dispatch(
            "MESSAGE_CREATE",
            serde_json::json!({
                "id": "1", "channel_id": "2", "guild_id": "3",
                "author": {"id": "4", "bot": false}, "content": "hi"
            }),
            &ready_tx,
        );

        let event = events.recv().await.unwrap();
        let Event::MessageCreate(message) = event.as_ref() else {
            panic!("expected message create");
        };
        assert_eq!(message.content, "hi");
    }

    #[tokio::test]
    async fn unknown_dispatch_is_not_fanned_out() {
        let session = GatewaySession::stub(0, vec![]);
        let mut events = session.subscribe();
        let (ready_tx, _ready_rx) = watch::channel(false);

        session.handle_dispatch("TYPING_START", serde_json::json!({}), &ready_tx);

        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
