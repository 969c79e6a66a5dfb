//! Verification service lifecycle and fan-out.
//!
//! Services are grouped into token pairs; the mutual-scan driver runs one
//! task per pair, so verification-side capacity governs scan concurrency.
//! Per service the manager executes sequentially, retrying exactly once
//! after a 10 s pause when the service reports temporary unavailability.

use super::VerificationService;
use crate::error::{ScanError, ScanResult};
use crate::models::RobloxConnection;
use condo_proto::UserId;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause before the one-shot retry on temporary unavailability.
const UNAVAILABLE_RETRY_DELAY: Duration = Duration::from_secs(10);

/// One token pair's services.
pub struct ServicePair {
    services: Vec<Arc<dyn VerificationService>>,
}

impl ServicePair {
    pub fn new(services: Vec<Arc<dyn VerificationService>>) -> Self {
        Self { services }
    }
}

/// Lifecycle owner and fan-out point for every verification service.
pub struct VerificationManager {
    pairs: Vec<ServicePair>,
    /// Cancelling this token closes every service session in unison.
    lifecycle: CancellationToken,
}

impl VerificationManager {
    /// Build from already-constructed pairs. `lifecycle` must be the token
    /// the services' gateway sessions were spawned under, so `close` stops
    /// them all together.
    pub fn new(pairs: Vec<ServicePair>, lifecycle: CancellationToken) -> Self {
        Self { pairs, lifecycle }
    }

    /// Number of configured token pairs (drives driver concurrency).
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Stop every service session.
    pub fn close(&self) {
        info!("closing verification services");
        self.lifecycle.cancel();
    }

    /// Resolve `discord_user`'s linked Roblox identities through one pair's
    /// services. Failures are logged and skipped; the result carries
    /// whatever the services could confirm.
    pub async fn fetch_verification_profiles(
        &self,
        cancel: &CancellationToken,
        discord_user: UserId,
        pair_index: usize,
    ) -> Vec<RobloxConnection> {
        let Some(pair) = self.pairs.get(pair_index) else {
            return Vec::new();
        };

        let mut connections = Vec::new();
        for service in &pair.services {
            if cancel.is_cancelled() {
                break;
            }
            match self.query_service(cancel, service.as_ref(), discord_user).await {
                Ok(Some((roblox_id, username))) => {
                    debug!(
                        service = service.name(),
                        discord_user = %discord_user,
                        roblox_user = %roblox_id,
                        "verification hit"
                    );
                    connections.push(RobloxConnection::verified_now(
                        discord_user,
                        roblox_id,
                        username,
                    ));
                }
                Ok(None) => {
                    debug!(
                        service = service.name(),
                        discord_user = %discord_user,
                        "user not verified"
                    );
                }
                Err(e) => {
                    warn!(
                        service = service.name(),
                        discord_user = %discord_user,
                        error = %e,
                        code = e.error_code(),
                        "verification query failed"
                    );
                }
            }
        }
        connections
    }

    /// One service's execute+parse, with the single unavailability retry.
    /// `Ok(None)` means the user is simply not verified there.
    async fn query_service(
        &self,
        cancel: &CancellationToken,
        service: &dyn VerificationService,
        discord_user: UserId,
    ) -> ScanResult<Option<(condo_proto::RobloxId, String)>> {
        match Self::attempt(cancel, service, discord_user).await {
            Ok(identity) => Ok(Some(identity)),
            Err(ScanError::UserNotVerified) => Ok(None),
            Err(ScanError::ServiceUnavailable) => {
                debug!(service = service.name(), "temporarily unavailable, retrying once");
                tokio::select! {
                    _ = tokio::time::sleep(UNAVAILABLE_RETRY_DELAY) => {}
                    _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                }
                match Self::attempt(cancel, service, discord_user).await {
                    Ok(identity) => Ok(Some(identity)),
                    Err(ScanError::UserNotVerified) => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn attempt(
        cancel: &CancellationToken,
        service: &dyn VerificationService,
        discord_user: UserId,
    ) -> ScanResult<(condo_proto::RobloxId, String)> {
        let reply = service.execute_command(cancel, discord_user).await?;
        service.parse_response(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use condo_proto::{Message, RobloxId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A service that fails N times with a scripted error before succeeding.
    struct ScriptedService {
        failures: AtomicUsize,
        error: fn() -> ScanError,
    }

    impl ScriptedService {
        fn new(failures: usize, error: fn() -> ScanError) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                error,
            }
        }
    }

    #[async_trait]
    impl VerificationService for ScriptedService {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute_command(
            &self,
            _cancel: &CancellationToken,
            _target: UserId,
        ) -> ScanResult<Message> {
            Ok(serde_json::from_value(serde_json::json!({
                "id": "1", "channel_id": "2", "author": {"id": "3", "bot": true}
            }))
            .unwrap())
        }

        fn parse_response(&self, _reply: &Message) -> ScanResult<(RobloxId, String)> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err((self.error)());
            }
            Ok((RobloxId(42), "builderman".to_string()))
        }
    }

    fn manager_with(service: ScriptedService) -> VerificationManager {
        VerificationManager::new(
            vec![ServicePair::new(vec![Arc::new(service)])],
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_once_after_unavailability() {
        let manager = manager_with(ScriptedService::new(1, || ScanError::ServiceUnavailable));
        let cancel = CancellationToken::new();
        let connections = manager
            .fetch_verification_profiles(&cancel, UserId(7), 0)
            .await;
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].roblox_user_id, RobloxId(42));
        assert!(connections[0].verified);
    }

    #[tokio::test(start_paused = true)]
    async fn double_unavailability_yields_nothing() {
        let manager = manager_with(ScriptedService::new(2, || ScanError::ServiceUnavailable));
        let cancel = CancellationToken::new();
        let connections = manager
            .fetch_verification_profiles(&cancel, UserId(7), 0)
            .await;
        assert!(connections.is_empty());
    }

    #[tokio::test]
    async fn unverified_user_yields_nothing() {
        let manager = manager_with(ScriptedService::new(usize::MAX, || ScanError::UserNotVerified));
        let cancel = CancellationToken::new();
        let connections = manager
            .fetch_verification_profiles(&cancel, UserId(7), 0)
            .await;
        assert!(connections.is_empty());
    }

    #[tokio::test]
    async fn unknown_pair_index_is_empty() {
        let manager = manager_with(ScriptedService::new(0, || ScanError::UserNotVerified));
        let cancel = CancellationToken::new();
        assert!(
            manager
                .fetch_verification_profiles(&cancel, UserId(7), 5)
                .await
                .is_empty()
        );
    }
}
