//! The member-list sync worker.
//!
//! One cycle walks every guild visible to any account, in parallel across
//! accounts, with a process-scoped claim map guaranteeing that a guild
//! shared by two accounts is walked by exactly one of them. Per guild the
//! walk requests lazy member-list chunks until the list stalls or the
//! observed count reaches the reported total, processing each chunk in a
//! fanned-out task and batch-upserting the accepted sightings at the end.

use crate::config::SyncConfig;
use crate::db::Database;
use crate::error::{ScanError, ScanResult};
use crate::gateway::{GatewaySession, MemberListStream};
use crate::limits::Pacer;
use crate::models::{ServerInfo, ServerMember};
use crate::sync::channels::select_channel;
use chrono::{Duration as ChronoDuration, Utc};
use condo_proto::gateway::{MEMBER_LIST_CHUNK_SIZE, MemberListUpdate};
use condo_proto::{GuildId, UserId};
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to wait for a member-list update before treating the channel as
/// not serving a list.
const LIST_WAIT: Duration = Duration::from_secs(10);

/// Consecutive non-advancing polls before the list is considered drained.
const MAX_STALLS: u32 = 3;

/// Outcome counters for one sync cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub guilds_walked: usize,
    pub guilds_skipped: usize,
    pub guilds_failed: usize,
    pub members_upserted: usize,
}

impl CycleStats {
    fn absorb(&mut self, other: CycleStats) {
        self.guilds_walked += other.guilds_walked;
        self.guilds_skipped += other.guilds_skipped;
        self.guilds_failed += other.guilds_failed;
        self.members_upserted += other.members_upserted;
    }
}

/// Crawls guild -> text channel -> lazy member list for every account.
pub struct SyncWorker {
    sessions: Vec<Arc<GatewaySession>>,
    pacers: Vec<Arc<Pacer>>,
    db: Database,
    config: SyncConfig,
    /// guild -> claiming account index; reset at the top of each cycle.
    seen_servers: DashMap<GuildId, usize>,
}

impl SyncWorker {
    pub fn new(
        sessions: Vec<Arc<GatewaySession>>,
        pacers: Vec<Arc<Pacer>>,
        db: Database,
        config: SyncConfig,
    ) -> Arc<Self> {
        debug_assert_eq!(sessions.len(), pacers.len());
        Arc::new(Self {
            sessions,
            pacers,
            db,
            config,
            seen_servers: DashMap::new(),
        })
    }

    /// Run one full sync cycle across every account in parallel.
    pub async fn run_cycle(self: &Arc<Self>, cancel: &CancellationToken) -> CycleStats {
        self.seen_servers.clear();

        let mut tasks = JoinSet::new();
        for account in 0..self.sessions.len() {
            let worker = Arc::clone(self);
            let cancel = cancel.clone();
            tasks.spawn(async move { worker.account_cycle(account, cancel).await });
        }

        let mut stats = CycleStats::default();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(account_stats) => stats.absorb(account_stats),
                Err(e) => warn!(error = %e, "sync account task panicked"),
            }
        }

        info!(
            walked = stats.guilds_walked,
            skipped = stats.guilds_skipped,
            failed = stats.guilds_failed,
            members = stats.members_upserted,
            "sync cycle complete"
        );
        stats
    }

    async fn account_cycle(&self, account: usize, cancel: CancellationToken) -> CycleStats {
        let session = &self.sessions[account];
        let mut stats = CycleStats::default();

        for guild in session.guild_ids() {
            if cancel.is_cancelled() {
                break;
            }

            // First claim wins; the loser skips the guild this cycle.
            match self.seen_servers.entry(guild) {
                dashmap::mapref::entry::Entry::Occupied(claimed) => {
                    debug!(
                        account = account,
                        guild = %guild,
                        claimed_by = claimed.get(),
                        "duplicate server, skipping"
                    );
                    stats.guilds_skipped += 1;
                    continue;
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(account);
                }
            }

            let walk = tokio::time::timeout(
                Duration::from_secs(self.config.guild_walk_timeout_secs),
                self.sync_guild(account, guild, &cancel),
            )
            .await;

            match walk {
                Ok(Ok(members)) => {
                    stats.guilds_walked += 1;
                    stats.members_upserted += members;
                }
                Ok(Err(ScanError::Cancelled)) => break,
                Ok(Err(e)) => {
                    warn!(account = account, guild = %guild, error = %e, "guild sync failed");
                    stats.guilds_failed += 1;
                }
                Err(_) => {
                    warn!(account = account, guild = %guild, "guild sync hit the walk timeout");
                    stats.guilds_failed += 1;
                }
            }
        }

        stats
    }

    /// Walk one guild's member list. Returns the number of members
    /// batch-upserted.
    async fn sync_guild(
        &self,
        account: usize,
        guild: GuildId,
        cancel: &CancellationToken,
    ) -> ScanResult<usize> {
        let session = &self.sessions[account];
        let pacer = &self.pacers[account];
        let Some(record) = session.guild(guild) else {
            return Ok(0);
        };

        self.db
            .sync()
            .upsert_server_info(&ServerInfo {
                server_id: guild,
                name: record.name.clone(),
                updated_at: Utc::now(),
            })
            .await?;

        let grace = ChronoDuration::hours(self.config.grace_period_hours as i64);
        // Chunk tasks append accepted rows here; the final upsert waits for
        // their join.
        let accepted: Arc<Mutex<Vec<ServerMember>>> = Arc::new(Mutex::new(Vec::new()));
        let mut chunk_tasks: JoinSet<()> = JoinSet::new();
        let mut seen_ids: HashSet<UserId> = HashSet::new();
        let mut attempted = HashSet::new();

        let max_attempts = self.config.channel_attempts();
        let mut drained = false;

        'channels: for attempt in 0..max_attempts {
            if cancel.is_cancelled() {
                break;
            }
            let Some(channel) = select_channel(guild, &record, &attempted) else {
                break;
            };
            attempted.insert(channel);

            if attempt > 0 {
                let pause = Duration::from_secs(rand::thread_rng().gen_range(5..=10));
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = cancel.cancelled() => break 'channels,
                }
            }

            let mut stream = MemberListStream::new(Arc::clone(session), guild);
            let mut max_chunk: u64 = 0;
            let mut stalls: u32 = 0;
            let mut list_retries = rand::thread_rng().gen_range(2..=4u32);

            pacer.wait_for_slot(cancel).await?;
            stream.request_chunk(channel, 0).await?;

            loop {
                match stream.next_update(LIST_WAIT, cancel).await? {
                    None => {
                        // List not found on this channel; retry a few times,
                        // then switch channels.
                        if list_retries == 0 {
                            debug!(guild = %guild, channel = %channel, "no member list, switching channel");
                            continue 'channels;
                        }
                        list_retries -= 1;
                        pacer.wait_for_slot(cancel).await?;
                        stream.request_chunk(channel, max_chunk).await?;
                    }
                    Some(update) => {
                        let total_visible = update.total_visible();
                        let top_chunk = highest_chunk(&update);
                        if top_chunk > max_chunk {
                            max_chunk = top_chunk;
                            stalls = 0;
                        } else {
                            stalls += 1;
                        }

                        self.spawn_chunk_task(
                            &mut chunk_tasks,
                            guild,
                            &update,
                            &mut seen_ids,
                            grace,
                            Arc::clone(&accepted),
                        );

                        let observed = seen_ids.len() as u64;
                        if stalls >= MAX_STALLS || (total_visible > 0 && observed >= total_visible)
                        {
                            drained = true;
                            break 'channels;
                        }

                        pacer.wait_for_slot(cancel).await?;
                        stream.request_chunk(channel, max_chunk + 1).await?;
                    }
                }
            }
        }

        // Wait for every chunk task before computing the final batch.
        while chunk_tasks.join_next().await.is_some() {}

        let rows = {
            let mut guard = accepted.lock().await;
            std::mem::take(&mut *guard)
        };
        let count = rows.len();
        self.db.sync().upsert_server_members(&rows, false).await?;

        debug!(
            account = account,
            guild = %guild,
            members = count,
            drained = drained,
            "guild walk finished"
        );
        Ok(count)
    }

    /// Fan out processing of one chunk: exclusion of bots and repeats is
    /// synchronous (it feeds the done decision); the DB-aware grace filter
    /// and the shared append run in the spawned task.
    fn spawn_chunk_task(
        &self,
        tasks: &mut JoinSet<()>,
        guild: GuildId,
        update: &MemberListUpdate,
        seen_ids: &mut HashSet<UserId>,
        grace: ChronoDuration,
        accepted: Arc<Mutex<Vec<ServerMember>>>,
    ) {
        let fresh: Vec<(UserId, Option<chrono::DateTime<Utc>>)> = update
            .members()
            .filter(|member| !member.user.bot)
            .filter(|member| seen_ids.insert(member.user.id))
            .map(|member| (member.user.id, member.joined_at))
            .collect();
        if fresh.is_empty() {
            return;
        }

        let sync = self.db.sync();
        tasks.spawn(async move {
            let ids: Vec<UserId> = fresh.iter().map(|(id, _)| *id).collect();
            let known = match sync.filter_known_users(&ids).await {
                Ok(known) => known,
                Err(e) => {
                    warn!(guild = %guild, error = %e, "known-user lookup failed, applying grace to all");
                    HashSet::new()
                }
            };

            let rows = grace_filter(guild, fresh, &known, grace, Utc::now());
            if !rows.is_empty() {
                accepted.lock().await.extend(rows);
            }
        });
    }
}

/// Apply the grace period to a chunk's fresh sightings: a user already in
/// the DB is always accepted; a never-seen user whose join falls inside the
/// grace window is skipped this cycle. Absent join dates read as old
/// accounts.
fn grace_filter(
    guild: GuildId,
    fresh: Vec<(UserId, Option<chrono::DateTime<Utc>>)>,
    known: &HashSet<UserId>,
    grace: ChronoDuration,
    now: chrono::DateTime<Utc>,
) -> Vec<ServerMember> {
    let cutoff = now - grace;
    fresh
        .into_iter()
        .filter_map(|(user, joined_at)| {
            let joined = joined_at.unwrap_or(cutoff - ChronoDuration::seconds(1));
            if !known.contains(&user) && joined > cutoff {
                return None;
            }
            Some(ServerMember::sighted(guild, user, joined))
        })
        .collect()
}

/// The highest chunk index covered by an update's synced ranges.
fn highest_chunk(update: &MemberListUpdate) -> u64 {
    update
        .ops
        .iter()
        .filter_map(|op| op.range.map(|range| range[0] / MEMBER_LIST_CHUNK_SIZE))
        .max()
        .unwrap_or(0)
}
