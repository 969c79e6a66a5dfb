//! Count-within-window admission tiers for gateway event intake.
//!
//! Three tiers, all of which must admit a message:
//! - per-(user, guild) cooldown (default 6 h between admissions)
//! - per-guild quota within a window (default 20 / 10 min)
//! - global quota within a window (default 200 / 1 min)
//!
//! The windowed tiers ride governor's token buckets; the cooldown tier is a
//! timestamp map because governor quotas cap out below multi-hour periods'
//! usefulness for a strict "once per N hours" rule.

use crate::config::EventLimitConfig;
use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovRateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::debug;

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Thread-safe tiered admission control.
pub struct EventWindows {
    user_cooldown: Duration,
    /// Last admission per (user, guild).
    user_seen: DashMap<(u64, u64), Instant>,
    /// Per-guild windowed limiters.
    guild_limiters: DashMap<u64, DirectRateLimiter>,
    /// Global windowed limiter.
    global_limiter: DirectRateLimiter,
    config: EventLimitConfig,
}

impl EventWindows {
    /// Create the tiers from config.
    pub fn new(config: EventLimitConfig) -> Self {
        let global_quota = windowed_quota(config.global_window_count, config.global_window_secs);
        Self {
            user_cooldown: Duration::from_secs(config.user_cooldown_hours * 3600),
            user_seen: DashMap::new(),
            guild_limiters: DashMap::new(),
            global_limiter: GovRateLimiter::direct(global_quota),
            config,
        }
    }

    /// Whether a message from `user` in `guild` is admitted. Admission
    /// consumes quota in every tier.
    pub fn admit(&self, user: u64, guild: u64) -> bool {
        let key = (user, guild);
        if let Some(last) = self.user_seen.get(&key)
            && last.elapsed() < self.user_cooldown
        {
            debug!(user = user, guild = guild, "user cooldown active");
            return false;
        }

        let guild_limiter = self.guild_limiters.entry(guild).or_insert_with(|| {
            GovRateLimiter::direct(windowed_quota(
                self.config.guild_window_count,
                self.config.guild_window_secs,
            ))
        });
        if guild_limiter.check().is_err() {
            debug!(guild = guild, "guild window exhausted");
            return false;
        }

        if self.global_limiter.check().is_err() {
            debug!("global window exhausted");
            return false;
        }

        self.user_seen.insert(key, Instant::now());
        true
    }

    /// Drop stale cooldown entries and idle guild limiters to bound memory.
    /// Call periodically from a maintenance task.
    pub fn cleanup(&self) {
        const MAX_GUILD_LIMITERS: usize = 10_000;

        let cooldown = self.user_cooldown;
        self.user_seen.retain(|_, last| last.elapsed() < cooldown);
        if self.guild_limiters.len() > MAX_GUILD_LIMITERS {
            self.guild_limiters.clear();
            debug!("cleared guild window limiters (exceeded {} entries)", MAX_GUILD_LIMITERS);
        }
    }

    /// Number of tracked (user, guild) cooldowns.
    #[allow(dead_code)] // test inspection
    pub fn tracked_users(&self) -> usize {
        self.user_seen.len()
    }
}

/// `count` admissions per `window_secs`, expressed as a replenish-period
/// quota with a burst of the full count.
fn windowed_quota(count: u32, window_secs: u64) -> Quota {
    let count = NonZeroU32::new(count).unwrap_or(nonzero!(1u32));
    let period = Duration::from_secs(window_secs.max(1)) / count.get();
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(nonzero!(1u32)))
        .allow_burst(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EventLimitConfig {
        EventLimitConfig {
            user_cooldown_hours: 6,
            guild_window_count: 3,
            guild_window_secs: 600,
            global_window_count: 100,
            global_window_secs: 60,
        }
    }

    #[test]
    fn user_cooldown_blocks_repeat() {
        let windows = EventWindows::new(test_config());
        assert!(windows.admit(1, 10));
        assert!(!windows.admit(1, 10));
        // Different guild is an independent cooldown key.
        assert!(windows.admit(1, 11));
    }

    #[test]
    fn guild_window_exhausts() {
        let windows = EventWindows::new(test_config());
        // Three distinct users burn the guild's burst of 3.
        assert!(windows.admit(1, 10));
        assert!(windows.admit(2, 10));
        assert!(windows.admit(3, 10));
        assert!(!windows.admit(4, 10));
        // Another guild is unaffected.
        assert!(windows.admit(4, 11));
    }

    #[test]
    fn global_window_exhausts() {
        let mut config = test_config();
        config.global_window_count = 2;
        config.guild_window_count = 100;
        let windows = EventWindows::new(config);
        assert!(windows.admit(1, 10));
        assert!(windows.admit(2, 11));
        assert!(!windows.admit(3, 12));
    }

    #[test]
    fn cleanup_retains_active_cooldowns() {
        let windows = EventWindows::new(test_config());
        windows.admit(1, 10);
        windows.cleanup();
        assert_eq!(windows.tracked_users(), 1);
    }
}
