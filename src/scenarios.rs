//! End-to-end pipeline scenarios over the in-memory database and scripted
//! collaborator fakes: scan -> connection processing -> flag write, the driver
//! outcome policy, sync-cycle guild claiming and the re-check worker's
//! monotone-confidence guarantee.

use crate::config::GuildCountThresholds;
use crate::db::Database;
use crate::driver::MutualScanDriver;
use crate::error::{ScanError, ScanResult};
use crate::flag::checkers::ReasonChecker;
use crate::flag::recheck::RecheckWorker;
use crate::gateway::{GatewaySession, GuildRecord};
use crate::limits::{CircuitBreaker, Pacer};
use crate::models::{Reason, ReasonKind, ReviewUser, RobloxConnection, UserStatus};
use crate::scanner::{Scanner, ScannerPool};
use crate::testing::{FakeAnalyzer, FakeDiscordApi, FakeRobloxApi};
use crate::verification::VerificationManager;
use condo_proto::{GuildId, Permissions, RobloxId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn guild_record(name: &str) -> GuildRecord {
    GuildRecord {
        name: name.to_string(),
        everyone: Permissions::VIEW_CHANNEL,
        channels: Vec::new(),
    }
}

struct Harness {
    db: Database,
    api: Arc<FakeDiscordApi>,
    analyzer: Arc<FakeAnalyzer>,
    roblox: Arc<FakeRobloxApi>,
    breakers: Vec<Arc<CircuitBreaker>>,
    pool: Arc<ScannerPool>,
    cancel: CancellationToken,
}

impl Harness {
    async fn new(scanner_count: usize, guilds: &[(u64, &str)]) -> Harness {
        let db = Database::new(":memory:").await.unwrap();
        let api = Arc::new(FakeDiscordApi::new());
        let analyzer = Arc::new(FakeAnalyzer::new());
        let roblox = Arc::new(FakeRobloxApi::new());
        let thresholds = GuildCountThresholds::default();

        let mut scanners = Vec::new();
        let mut breakers = Vec::new();
        for index in 0..scanner_count {
            let session = GatewaySession::stub(
                index,
                guilds
                    .iter()
                    .map(|(id, name)| (GuildId(*id), guild_record(name)))
                    .collect(),
            );
            let breaker = Arc::new(CircuitBreaker::new("discord_api"));
            breakers.push(Arc::clone(&breaker));
            scanners.push(Arc::new(Scanner::new(
                index,
                session,
                Arc::clone(&api) as _,
                Arc::new(Pacer::from_millis(1, 0)),
                breaker,
                Arc::clone(&analyzer) as _,
                db.clone(),
                thresholds.clone(),
            )));
        }

        let pool = Arc::new(ScannerPool::new(
            scanners,
            db.clone(),
            Arc::clone(&roblox) as _,
            thresholds,
        ));

        Harness {
            db,
            api,
            analyzer,
            roblox,
            breakers,
            pool,
            cancel: CancellationToken::new(),
        }
    }

    fn scanner(&self, index: usize) -> Arc<Scanner> {
        Arc::clone(&self.pool.scanners()[index])
    }

    fn driver(&self) -> Arc<MutualScanDriver> {
        MutualScanDriver::with_backoff(
            Arc::clone(&self.pool),
            Arc::new(VerificationManager::new(vec![], CancellationToken::new())),
            self.db.clone(),
            12,
            Duration::from_millis(10),
        )
    }

    fn trip_breakers(&self) {
        for breaker in &self.breakers {
            for _ in 0..10 {
                breaker.try_acquire().unwrap();
                breaker.on_failure();
            }
        }
    }
}

// ============================================================================
// Flag pipeline scenarios
// ============================================================================

/// Four mutual condo servers and one verified connection: flagged on
/// membership alone at the four-guild confidence, auto-confirmed, mirrored.
#[tokio::test]
async fn four_guild_profile_flags_without_message_analysis() {
    let h = Harness::new(1, &[(10, "a"), (11, "b"), (12, "c"), (13, "d")]).await;
    let discord_user = UserId(500);
    h.api
        .seed_profile(discord_user, "target", &[10, 11, 12, 13], &[(9001, "r1")]);
    h.roblox.seed_user(RobloxId(9001), "r1", false);

    let (username, connections) = h
        .scanner(0)
        .perform_full_scan(&h.cancel, discord_user, false)
        .await
        .unwrap();
    assert_eq!(username, "target");
    assert_eq!(connections.len(), 1);

    h.pool
        .process_connections(&h.cancel, discord_user, connections)
        .await
        .unwrap();

    let user = h
        .db
        .users()
        .get_user_by_id(RobloxId(9001))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.status, UserStatus::Flagged);
    assert!((user.confidence - 0.90).abs() < 1e-9);
    assert_eq!(user.name, "r1");

    let condo = user.reason(ReasonKind::Condo).unwrap();
    assert_eq!(condo.source, "Discord");
    assert_eq!(condo.evidence, vec!["Discord User ID: 500".to_string()]);

    // No message analysis ran at >= 3 guilds.
    assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.api.search_calls.load(Ordering::SeqCst), 0);

    // Auto-confirm artifacts and the confirmed mirror.
    assert!(h.db.users().is_confirmed(RobloxId(9001)).await.unwrap());
    assert!(h.db.mirror().is_confirmed(RobloxId(9001)).await.unwrap());
    assert!(!h.db.mirror().is_mixed(RobloxId(9001)).await.unwrap());
    assert_eq!(h.db.activity().count_action("user_flagged").await.unwrap(), 1);
}

/// Two mutual guilds with AI findings: flagged at the mean finding
/// confidence, with message rows and a summary persisted.
#[tokio::test]
async fn ai_findings_flag_below_guild_threshold() {
    let h = Harness::new(1, &[(20, "g20"), (21, "g21")]).await;
    let discord_user = UserId(600);
    h.api
        .seed_profile(discord_user, "chatty", &[20, 21], &[(9002, "r2")]);
    h.api.seed_messages(
        GuildId(20),
        discord_user,
        &[(101, "msg one"), (102, "msg two"), (103, "msg three")],
    );
    h.analyzer.flag_message(101, "explicit content", 0.8);
    h.analyzer.flag_message(102, "explicit content", 0.9);
    h.analyzer.flag_message(103, "explicit content", 0.7);
    h.roblox.seed_user(RobloxId(9002), "r2", false);

    let (_, connections) = h
        .scanner(0)
        .perform_full_scan(&h.cancel, discord_user, false)
        .await
        .unwrap();
    h.pool
        .process_connections(&h.cancel, discord_user, connections)
        .await
        .unwrap();

    let user = h
        .db
        .users()
        .get_user_by_id(RobloxId(9002))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.status, UserStatus::Flagged);
    assert!((user.confidence - 0.8).abs() < 1e-9);

    assert_eq!(h.db.messages().count_for_user(discord_user).await.unwrap(), 3);
    let summary = h
        .db
        .messages()
        .get_user_summary(discord_user)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.message_count, 3);
    assert_eq!(summary.reason, "explicit content");
}

/// One mutual guild and clean message history: mixed at 0.4, mirrored to the
/// mixed store, never confirmed.
#[tokio::test]
async fn clean_history_resolves_mixed() {
    let h = Harness::new(1, &[(30, "g30")]).await;
    let discord_user = UserId(700);
    h.api.seed_profile(discord_user, "quiet", &[30], &[(9003, "r3")]);
    h.api
        .seed_messages(GuildId(30), discord_user, &[(201, "hello world")]);
    h.roblox.seed_user(RobloxId(9003), "r3", false);

    let (_, connections) = h
        .scanner(0)
        .perform_full_scan(&h.cancel, discord_user, false)
        .await
        .unwrap();
    h.pool
        .process_connections(&h.cancel, discord_user, connections)
        .await
        .unwrap();

    let user = h
        .db
        .users()
        .get_user_by_id(RobloxId(9003))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.status, UserStatus::Mixed);
    assert!((user.confidence - 0.4).abs() < 1e-9);
    assert!(h.db.mirror().is_mixed(RobloxId(9003)).await.unwrap());
    assert!(!h.db.mirror().is_confirmed(RobloxId(9003)).await.unwrap());
    assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 1);
}

/// Two mutual guilds with nothing flagged: still mixed at the flat 0.4,
/// not the two-guild condo tier.
#[tokio::test]
async fn two_clean_guilds_resolve_mixed() {
    let h = Harness::new(1, &[(31, "g31"), (32, "g32")]).await;
    let discord_user = UserId(750);
    h.api
        .seed_profile(discord_user, "quiet2", &[31, 32], &[(9013, "r13")]);
    h.roblox.seed_user(RobloxId(9013), "r13", false);

    let (_, connections) = h
        .scanner(0)
        .perform_full_scan(&h.cancel, discord_user, false)
        .await
        .unwrap();
    h.pool
        .process_connections(&h.cancel, discord_user, connections)
        .await
        .unwrap();

    let user = h
        .db
        .users()
        .get_user_by_id(RobloxId(9013))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.status, UserStatus::Mixed);
    assert!((user.confidence - 0.4).abs() < 1e-9);
}

/// A banned linked account aborts processing before any flag write.
#[tokio::test]
async fn banned_linked_account_is_skipped() {
    let h = Harness::new(1, &[(40, "g40")]).await;
    let discord_user = UserId(800);
    h.roblox.seed_user(RobloxId(9004), "banned-guy", true);

    h.pool
        .process_connections(
            &h.cancel,
            discord_user,
            vec![RobloxConnection::verified_now(
                discord_user,
                RobloxId(9004),
                "banned-guy",
            )],
        )
        .await
        .unwrap();

    assert!(
        h.db.users()
            .get_user_by_id(RobloxId(9004))
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(h.db.activity().count_action("skipped_banned").await.unwrap(), 1);
}

/// Duplicate connections collapse before processing: one profile fetch per
/// distinct Roblox id.
#[tokio::test]
async fn duplicate_connections_processed_once() {
    let h = Harness::new(1, &[(50, "g50")]).await;
    let discord_user = UserId(900);
    h.roblox.seed_user(RobloxId(9005), "dup", false);

    let connection =
        RobloxConnection::verified_now(discord_user, RobloxId(9005), "dup");
    h.pool
        .process_connections(
            &h.cancel,
            discord_user,
            vec![connection.clone(), connection.clone(), connection],
        )
        .await
        .unwrap();

    assert_eq!(h.roblox.profile_calls.load(Ordering::SeqCst), 1);
}

/// An open breaker fails the scan fast: no REST call, no storage write.
#[tokio::test]
async fn open_breaker_fails_fast() {
    let h = Harness::new(1, &[(60, "g60")]).await;
    h.trip_breakers();

    let err = h
        .scanner(0)
        .perform_full_scan(&h.cancel, UserId(1000), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::CircuitOpen(_)));
    assert_eq!(h.api.profile_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.db.sync().get_unique_user_count().await.unwrap(), 0);
}

// ============================================================================
// Driver outcome policy
// ============================================================================

async fn seed_scan_target(h: &Harness, user: UserId) {
    use crate::models::ServerMember;
    use chrono::{Duration as ChronoDuration, Utc};
    h.db.sync()
        .upsert_server_members(
            &[ServerMember {
                server_id: GuildId(1),
                user_id: user,
                joined_at: Utc::now() - ChronoDuration::days(30),
                updated_at: Utc::now(),
            }],
            false,
        )
        .await
        .unwrap();
}

/// Every scanner "not visible": the scan timestamp advances, and nothing
/// else is written.
#[tokio::test]
async fn all_not_visible_stamps_and_moves_on() {
    let h = Harness::new(2, &[]).await;
    let user = UserId(1100);
    seed_scan_target(&h, user).await;
    // No profile seeded: the fake returns UserNotVisible for everyone.

    h.driver().scan_user(0, user, &h.cancel).await.unwrap();

    let stamped = h.db.sync().get_user_scan_timestamp(user).await.unwrap();
    assert!(stamped.is_some());
    assert!(
        h.db.sync()
            .get_discord_users_for_roblox(RobloxId(9999))
            .await
            .unwrap()
            .is_empty()
    );
}

/// Every scanner transient: the timestamp is untouched and the driver backs
/// off before the next pull.
#[tokio::test]
async fn all_transient_leaves_user_due() {
    let h = Harness::new(2, &[]).await;
    let user = UserId(1200);
    seed_scan_target(&h, user).await;
    h.trip_breakers();

    h.driver().scan_user(0, user, &h.cancel).await.unwrap();

    assert_eq!(h.db.sync().get_user_scan_timestamp(user).await.unwrap(), None);
}

/// One success is enough to process and stamp even when the other scanner
/// cannot see the user.
#[tokio::test]
async fn partial_visibility_still_scans() {
    let h = Harness::new(2, &[]).await;
    let user = UserId(1300);
    seed_scan_target(&h, user).await;
    h.api.seed_profile(user, "half-visible", &[1], &[]);

    h.driver().scan_user(0, user, &h.cancel).await.unwrap();

    assert!(
        h.db.sync()
            .get_user_scan_timestamp(user)
            .await
            .unwrap()
            .is_some()
    );
}

/// Non-transient, non-visibility failures: no stamp, so the user is retried
/// next cycle.
#[tokio::test]
async fn hard_failures_leave_user_due() {
    let h = Harness::new(2, &[]).await;
    let user = UserId(1400);
    seed_scan_target(&h, user).await;
    h.api.seed_profile_error(user, || ScanError::Api(403));

    h.driver().scan_user(0, user, &h.cancel).await.unwrap();

    assert_eq!(h.db.sync().get_user_scan_timestamp(user).await.unwrap(), None);
}

/// Round-robin fairness: over k*N grabs every scanner is returned k times.
#[tokio::test]
async fn round_robin_is_fair() {
    let h = Harness::new(3, &[]).await;
    let mut counts = [0u32; 3];
    for _ in 0..15 {
        let (_, index) = h.pool.get_next().unwrap();
        counts[index] += 1;
    }
    assert_eq!(counts, [5, 5, 5]);
}

// ============================================================================
// Sync-cycle guild claiming (two accounts sharing a guild)
// ============================================================================

#[tokio::test]
async fn shared_guild_is_walked_by_exactly_one_account() {
    use crate::config::SyncConfig;
    use crate::sync::SyncWorker;

    let db = Database::new(":memory:").await.unwrap();
    let shared = GuildId(77);
    // Stub guilds have no channels, so the walk terminates immediately; the
    // claim map is what's under test.
    let sessions = vec![
        GatewaySession::stub(0, vec![(shared, guild_record("shared"))]),
        GatewaySession::stub(1, vec![(shared, guild_record("shared"))]),
    ];
    let pacers = vec![
        Arc::new(Pacer::from_millis(1, 0)),
        Arc::new(Pacer::from_millis(1, 0)),
    ];
    let worker = SyncWorker::new(sessions, pacers, db.clone(), SyncConfig::default());

    let stats = worker.run_cycle(&CancellationToken::new()).await;
    assert_eq!(stats.guilds_walked, 1);
    assert_eq!(stats.guilds_skipped, 1);

    // The walked guild's info row landed regardless of which account won.
    let info = db.sync().get_server_info(&[shared]).await.unwrap();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].name, "shared");
}

// ============================================================================
// Event intake: member warm-up under the cooldown tier
// ============================================================================

#[tokio::test]
async fn event_intake_upserts_member_once_per_cooldown() {
    use crate::config::EventLimitConfig;
    use crate::events::{ActivityGameEnricher, EventIntake};
    use crate::limits::EventWindows;

    let db = Database::new(":memory:").await.unwrap();
    let intake = EventIntake::new(
        db.clone(),
        EventWindows::new(EventLimitConfig::default()),
        Arc::new(ActivityGameEnricher::new(db.clone())),
    );

    let message: condo_proto::Message = serde_json::from_value(serde_json::json!({
        "id": "1",
        "channel_id": "2",
        "guild_id": "3",
        "author": {"id": "4", "bot": false},
        "content": "check https://www.roblox.com/games/42/Fun",
        "member": {"joined_at": "2024-01-01T00:00:00Z"}
    }))
    .unwrap();

    intake.handle_message(&message).await.unwrap();
    // Second message inside the 6h cooldown: dropped before any write.
    intake.handle_message(&message).await.unwrap();

    assert_eq!(db.sync().get_unique_user_count().await.unwrap(), 1);
    assert_eq!(db.activity().count_action("game_url_sighted").await.unwrap(), 1);

    // Bots and DMs never land.
    let bot: condo_proto::Message = serde_json::from_value(serde_json::json!({
        "id": "5", "channel_id": "2", "guild_id": "3",
        "author": {"id": "6", "bot": true},
        "member": {"joined_at": "2024-01-01T00:00:00Z"}
    }))
    .unwrap();
    intake.handle_message(&bot).await.unwrap();
    let dm: condo_proto::Message = serde_json::from_value(serde_json::json!({
        "id": "7", "channel_id": "2",
        "author": {"id": "8", "bot": false}
    }))
    .unwrap();
    intake.handle_message(&dm).await.unwrap();
    assert_eq!(db.sync().get_unique_user_count().await.unwrap(), 1);
}

// ============================================================================
// Verification executor: reply correlation end to end
// ============================================================================

#[tokio::test]
async fn executor_correlates_deferred_reply() {
    use crate::verification::CommandExecutor;
    use crate::verification::bloxlink;
    use condo_proto::ChannelId;
    use condo_proto::gateway::Event;
    use condo_proto::rest::MESSAGE_FLAG_LOADING;

    let guild = GuildId(70);
    let channel = ChannelId(71);
    let api = Arc::new(FakeDiscordApi::new());
    api.seed_command(guild, "getinfo");

    // The materialized reply carries the nested profile link the gateway
    // frames truncate.
    let full_reply = serde_json::json!({
        "id": "7100",
        "channel_id": channel.to_string(),
        "author": {"id": "72", "bot": true},
        "interaction": {"id": "73", "name": "getinfo"},
        "components": [{
            "type": 17,
            "components": [{
                "type": 10,
                "content": "### [builderman](https://www.roblox.com/users/156/profile) (156)"
            }]
        }]
    });
    api.seed_channel_message(channel, full_reply);

    let session = GatewaySession::stub(0, vec![(guild, guild_record("verify"))]);
    let executor = CommandExecutor::new(
        Arc::clone(&api) as _,
        Arc::clone(&session),
        Arc::new(CircuitBreaker::new("bloxlink_api")),
        guild,
        channel,
        "getinfo".to_string(),
        "user".to_string(),
    );

    let cancel = CancellationToken::new();
    let pending = {
        let executor = Arc::clone(&executor);
        let cancel = cancel.clone();
        tokio::spawn(async move { executor.execute(&cancel, UserId(77)).await })
    };

    // Wait for the interaction post, then replay the bot's frames: a
    // thinking placeholder first, the real content as an update.
    let nonce = loop {
        if let Some(payload) = api.last_interaction.lock().clone() {
            break payload["nonce"].as_str().unwrap().to_string();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    let thinking: condo_proto::Message = serde_json::from_value(serde_json::json!({
        "id": "7100",
        "channel_id": channel.to_string(),
        "author": {"id": "72", "bot": true},
        "interaction": {"id": "73", "name": "getinfo"},
        "nonce": nonce,
        "flags": MESSAGE_FLAG_LOADING
    }))
    .unwrap();
    session.inject_event(Event::MessageCreate(Box::new(thinking)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let update: condo_proto::Message = serde_json::from_value(serde_json::json!({
        "id": "7100",
        "channel_id": channel.to_string(),
        "author": {"id": "72", "bot": true},
        "interaction": {"id": "73", "name": "getinfo"},
        "content": "truncated"
    }))
    .unwrap();
    session.inject_event(Event::MessageUpdate(Box::new(update)));

    let reply = pending.await.unwrap().unwrap();
    let (roblox_id, username) = bloxlink::parse_reply(&reply).unwrap();
    assert_eq!(roblox_id, RobloxId(156));
    assert_eq!(username, "builderman");
}

// ============================================================================
// Re-check worker: monotone confidence
// ============================================================================

struct ScriptedChecker {
    confidence: f64,
}

#[async_trait::async_trait]
impl ReasonChecker for ScriptedChecker {
    fn kind(&self) -> ReasonKind {
        ReasonKind::Condo
    }

    async fn check(
        &self,
        _user: &ReviewUser,
        skip_reason_generation: bool,
    ) -> ScanResult<Option<Reason>> {
        let (message, evidence) = if skip_reason_generation {
            (String::new(), Vec::new())
        } else {
            ("recomputed".to_string(), vec!["e".to_string()])
        };
        Ok(Some(Reason {
            message,
            confidence: self.confidence,
            evidence,
            source: "Recheck".to_string(),
        }))
    }
}

async fn stored_user_with_condo(db: &Database, id: u64, confidence: f64) {
    let mut user = ReviewUser::new(RobloxId(id));
    user.status = UserStatus::Flagged;
    crate::flag::merge_reason(
        &mut user,
        ReasonKind::Condo,
        Reason::new("original", confidence, vec!["orig".into()], "Discord"),
    );
    let mut batch = HashMap::new();
    batch.insert(user.id, user);
    db.users().save_users(&batch).await.unwrap();
}

#[tokio::test]
async fn recheck_raises_but_never_lowers_confidence() {
    let db = Database::new(":memory:").await.unwrap();
    stored_user_with_condo(&db, 1, 0.85).await;
    stored_user_with_condo(&db, 2, 0.30).await;

    // A checker that now believes 0.85: user 1 stays put (not strictly
    // greater), user 2 rises.
    let worker = RecheckWorker::new(
        db.clone(),
        vec![Arc::new(ScriptedChecker { confidence: 0.85 })],
    );
    let stats = worker.run_sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(stats.confidence_raised, 1);

    let user1 = db.users().get_user_by_id(RobloxId(1)).await.unwrap().unwrap();
    let user2 = db.users().get_user_by_id(RobloxId(2)).await.unwrap().unwrap();
    assert!((user1.reason(ReasonKind::Condo).unwrap().confidence - 0.85).abs() < 1e-9);
    assert!((user2.reason(ReasonKind::Condo).unwrap().confidence - 0.85).abs() < 1e-9);
    // Recomputation keeps the stored narrative.
    assert_eq!(user2.reason(ReasonKind::Condo).unwrap().message, "original");
    assert_eq!(user2.reason(ReasonKind::Condo).unwrap().evidence, vec!["orig"]);

    // A weaker checker changes nothing.
    let worker = RecheckWorker::new(
        db.clone(),
        vec![Arc::new(ScriptedChecker { confidence: 0.10 })],
    );
    let stats = worker.run_sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(stats.confidence_raised, 0);
    let user2_after = db.users().get_user_by_id(RobloxId(2)).await.unwrap().unwrap();
    assert!((user2_after.reason(ReasonKind::Condo).unwrap().confidence - 0.85).abs() < 1e-9);
}

// ============================================================================
// Ban sweep
// ============================================================================

#[tokio::test]
async fn ban_sweep_closes_banned_reviews() {
    use crate::flag::bancheck::BanCheckWorker;

    let db = Database::new(":memory:").await.unwrap();
    let roblox = Arc::new(FakeRobloxApi::new());
    stored_user_with_condo(&db, 10, 0.9).await;
    stored_user_with_condo(&db, 11, 0.9).await;
    roblox.seed_user(RobloxId(10), "gone", true);
    roblox.seed_user(RobloxId(11), "still-here", false);

    let worker = BanCheckWorker::new(db.clone(), Arc::clone(&roblox) as _);
    let stats = worker.run_sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(stats.checked, 2);
    assert_eq!(stats.newly_banned, 1);

    let banned = db.users().get_user_by_id(RobloxId(10)).await.unwrap().unwrap();
    assert_eq!(banned.status, UserStatus::Banned);
    assert!(banned.last_ban_check.is_some());

    let kept = db.users().get_user_by_id(RobloxId(11)).await.unwrap().unwrap();
    assert_eq!(kept.status, UserStatus::Flagged);
    assert!(kept.last_ban_check.is_some());
    assert_eq!(db.activity().count_action("user_banned").await.unwrap(), 1);

    // A fresh check is not redone inside the recheck window.
    let stats = worker.run_sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(stats.checked, 0);
}

#[tokio::test]
async fn recheck_fills_missing_reasons() {
    let db = Database::new(":memory:").await.unwrap();
    // User with only a friend reason: condo pass 1 should fill condo.
    let mut user = ReviewUser::new(RobloxId(5));
    user.status = UserStatus::Flagged;
    crate::flag::merge_reason(
        &mut user,
        ReasonKind::Friend,
        Reason::new("friends", 0.5, vec![], "Recheck"),
    );
    let mut batch = HashMap::new();
    batch.insert(user.id, user);
    db.users().save_users(&batch).await.unwrap();

    let worker = RecheckWorker::new(
        db.clone(),
        vec![Arc::new(ScriptedChecker { confidence: 0.6 })],
    );
    let stats = worker.run_sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(stats.newly_flagged, 1);

    let stored = db.users().get_user_by_id(RobloxId(5)).await.unwrap().unwrap();
    let condo = stored.reason(ReasonKind::Condo).unwrap();
    assert_eq!(condo.message, "recomputed");
    assert!((condo.confidence - 0.6).abs() < 1e-9);
    // Total confidence strictly grew with the added kind.
    assert!(stored.confidence > 0.6);
}
