//! Worker top-level: session lifecycle and task scheduling.
//!
//! Opens one gateway session per configured sync token, starts the
//! verification services, spawns the event intake, the mutual-scan drivers
//! (one per verification pair) and the periodic re-check sweep, then runs
//! member-list sync cycles on the configured cadence. Shutdown cancels the
//! workers first and closes the gateway sessions last.

use crate::analyzer::AiAnalyzer;
use crate::config::Config;
use crate::db::Database;
use crate::driver::MutualScanDriver;
use crate::events::{ActivityGameEnricher, EventIntake};
use crate::flag::bancheck::BanCheckWorker;
use crate::flag::checkers::{CondoChecker, FriendChecker, GroupChecker, ReasonChecker};
use crate::flag::recheck::RecheckWorker;
use crate::gateway::GatewaySession;
use crate::limits::{CircuitBreaker, EventWindows, Pacer};
use crate::rest::RestClient;
use crate::roblox::RobloxClient;
use crate::scanner::{Scanner, ScannerPool};
use crate::sync::SyncWorker;
use crate::verification::bloxlink::BloxlinkService;
use crate::verification::manager::ServicePair;
use crate::verification::rover::RoverService;
use crate::verification::{CommandExecutor, VerificationManager, VerificationService};
use condo_proto::{ChannelId, GuildId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long to wait for each session's READY before starting without it.
const READY_TIMEOUT: Duration = Duration::from_secs(45);

/// Assembles and runs the whole pipeline until `cancel` fires.
pub async fn run(config: Config, db: Database, cancel: CancellationToken) -> anyhow::Result<()> {
    // Sessions outlive the workers: they get their own token so shutdown can
    // stop the workers first and close the gateway last.
    let session_cancel = CancellationToken::new();
    let worker_cancel = cancel.child_token();

    // ------------------------------------------------------------------
    // Sync sessions, pacers, breakers, scanners
    // ------------------------------------------------------------------
    let mut sessions = Vec::new();
    let mut pacers = Vec::new();
    let mut scanners: Vec<Arc<Scanner>> = Vec::new();

    let analyzer = Arc::new(AiAnalyzer::new(config.analyzer.clone()));
    let roblox = Arc::new(RobloxClient::new());

    for (index, token) in config.sync.tokens.iter().enumerate() {
        let session = GatewaySession::spawn(token.clone(), index, session_cancel.clone());
        if let Err(e) = session.wait_ready(READY_TIMEOUT).await {
            warn!(account = index, error = %e, "session not ready yet, continuing");
        }

        let pacer = Arc::new(Pacer::from_millis(
            config.rate_limiter.base_interval_ms,
            config.rate_limiter.jitter_ms,
        ));
        let breaker = Arc::new(CircuitBreaker::new("discord_api"));
        let api = Arc::new(RestClient::new(token.clone()));

        scanners.push(Arc::new(Scanner::new(
            index,
            Arc::clone(&session),
            api,
            Arc::clone(&pacer),
            breaker,
            Arc::clone(&analyzer) as _,
            db.clone(),
            config.thresholds.clone(),
        )));
        sessions.push(session);
        pacers.push(pacer);
    }
    info!(accounts = sessions.len(), "sync sessions started");

    let pool = Arc::new(ScannerPool::new(
        scanners,
        db.clone(),
        Arc::clone(&roblox) as _,
        config.thresholds.clone(),
    ));

    // ------------------------------------------------------------------
    // Verification services (their sessions close with everything else)
    // ------------------------------------------------------------------
    let verification_cancel = session_cancel.child_token();
    let mut pairs = Vec::new();
    for pair_config in &config.verification {
        let mut services: Vec<Arc<dyn VerificationService>> = Vec::new();
        for (service_name, service_config) in [
            ("bloxlink", &pair_config.bloxlink),
            ("rover", &pair_config.rover),
        ] {
            let Some(service_config) = service_config else {
                continue;
            };
            if service_config.token.is_empty() {
                continue;
            }

            let session = GatewaySession::spawn(
                service_config.token.clone(),
                usize::MAX, // not a scanner account
                verification_cancel.clone(),
            );
            if let Err(e) = session.wait_ready(READY_TIMEOUT).await {
                warn!(service = service_name, error = %e, "verification session not ready yet");
            }

            let executor = CommandExecutor::new(
                Arc::new(RestClient::new(service_config.token.clone())),
                session,
                Arc::new(CircuitBreaker::new(format!("{service_name}_api"))),
                GuildId(service_config.guild_id),
                ChannelId(service_config.channel_id),
                service_config.command_name.clone(),
                service_config.command_option.clone(),
            );
            let service: Arc<dyn VerificationService> = match service_name {
                "bloxlink" => Arc::new(BloxlinkService::new(executor)),
                _ => Arc::new(RoverService::new(executor)),
            };
            services.push(service);
        }
        if !services.is_empty() {
            pairs.push(ServicePair::new(services));
        }
    }
    let verification = Arc::new(VerificationManager::new(pairs, verification_cancel));
    let pair_count = verification.pair_count();
    info!(pairs = pair_count, "verification services started");

    // ------------------------------------------------------------------
    // Event intake per session
    // ------------------------------------------------------------------
    let intake = EventIntake::new(
        db.clone(),
        EventWindows::new(config.events.clone()),
        Arc::new(ActivityGameEnricher::new(db.clone())),
    );
    for session in &sessions {
        intake.spawn_listener(Arc::clone(session), worker_cancel.clone());
    }

    // Rate-window pruning task (cooldown maps grow unbounded otherwise)
    {
        let intake = Arc::clone(&intake);
        let cancel = worker_cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = interval.tick() => intake.cleanup(),
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Mutual-scan drivers: one per verification pair (at least one even
    // with verification disabled, so scanning still proceeds)
    // ------------------------------------------------------------------
    let driver = MutualScanDriver::new(
        Arc::clone(&pool),
        Arc::clone(&verification),
        db.clone(),
        config.worker.user_scan_age_hours,
    );
    for pair_index in 0..pair_count.max(1) {
        let driver = Arc::clone(&driver);
        let cancel = worker_cancel.clone();
        tokio::spawn(async move { driver.run(pair_index, cancel).await });
    }

    // ------------------------------------------------------------------
    // Periodic reason re-check and ban sweeps
    // ------------------------------------------------------------------
    {
        let checkers: Vec<Arc<dyn ReasonChecker>> = vec![
            Arc::new(CondoChecker::new(db.clone(), config.thresholds.clone())),
            Arc::new(FriendChecker::new(db.clone(), Arc::clone(&roblox) as _)),
            Arc::new(GroupChecker::new(db.clone(), Arc::clone(&roblox) as _)),
        ];
        let recheck = RecheckWorker::new(db.clone(), checkers);
        let ban_check = BanCheckWorker::new(db.clone(), Arc::clone(&roblox) as _);
        let cancel = worker_cancel.clone();
        let interval_secs = config.worker.recheck_interval_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(60)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = recheck.run_sweep(&cancel).await {
                            warn!(error = %e, "recheck sweep aborted");
                        }
                        if let Err(e) = ban_check.run_sweep(&cancel).await {
                            warn!(error = %e, "ban sweep aborted");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Main loop: member-list sync cycles
    // ------------------------------------------------------------------
    let sync_worker = SyncWorker::new(sessions, pacers, db, config.sync.clone());
    let sync_interval = Duration::from_secs(config.worker.sync_interval_secs);
    loop {
        sync_worker.run_cycle(&worker_cancel).await;
        tokio::select! {
            _ = tokio::time::sleep(sync_interval) => {}
            _ = worker_cancel.cancelled() => break,
        }
    }

    // Workers are stopping; close verification services and, last, the
    // gateway sessions.
    info!("shutting down: stopping workers, then sessions");
    verification.close();
    tokio::time::sleep(Duration::from_millis(500)).await;
    session_cancel.cancel();

    Ok(())
}
