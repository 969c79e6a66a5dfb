//! Configuration type definitions.

use super::defaults::*;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Worker-wide options.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Sync accounts and cycle cadence.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Outbound call pacing per account.
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    /// Verification token pairs; one driver task runs per entry.
    #[serde(default)]
    pub verification: Vec<VerificationPairConfig>,
    /// AI message classifier endpoint.
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    /// Storage location.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Guild-count confidence tiers.
    #[serde(default)]
    pub thresholds: GuildCountThresholds,
    /// Event-intake admission limits.
    #[serde(default)]
    pub events: EventLimitConfig,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON lines.
    Json,
    /// Human-readable console output.
    #[default]
    Pretty,
}

/// Worker-wide options.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Seconds between member-list sync cycles.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Hours after which a scanned user becomes due again.
    #[serde(default = "default_user_scan_age_hours")]
    pub user_scan_age_hours: u64,
    /// Seconds between re-check worker sweeps.
    #[serde(default = "default_recheck_interval_secs")]
    pub recheck_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            sync_interval_secs: default_sync_interval_secs(),
            user_scan_age_hours: default_user_scan_age_hours(),
            recheck_interval_secs: default_recheck_interval_secs(),
        }
    }
}

/// Sync accounts and member-list walk limits.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// One gateway session per token. Empty is a fatal config error.
    #[serde(default)]
    pub tokens: Vec<String>,
    /// Hours inside which a never-seen member is skipped. The multi-account
    /// default is 24; single-account deployments usually run 12.
    #[serde(default = "default_grace_period_hours")]
    pub grace_period_hours: u64,
    /// Total channel attempts per guild before giving up (clamped 5..=15).
    #[serde(default = "default_channel_process_threshold")]
    pub channel_process_threshold: u32,
    /// Hard cap on one guild's member-list walk, in seconds.
    #[serde(default = "default_guild_walk_timeout_secs")]
    pub guild_walk_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            grace_period_hours: default_grace_period_hours(),
            channel_process_threshold: default_channel_process_threshold(),
            guild_walk_timeout_secs: default_guild_walk_timeout_secs(),
        }
    }
}

impl SyncConfig {
    /// Channel attempts clamped into the supported range.
    pub fn channel_attempts(&self) -> u32 {
        self.channel_process_threshold.clamp(5, 15)
    }
}

/// Outbound call pacing. Every slot waits at least
/// `base_interval + Uniform(-jitter, +jitter)` after the previous grant.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: default_base_interval_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// One verification token pair. The mutual-scan driver runs one task per
/// entry; each service inside the pair holds its own account session.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VerificationPairConfig {
    /// Bloxlink-style service.
    #[serde(default)]
    pub bloxlink: Option<VerificationServiceConfig>,
    /// RoVer-style service.
    #[serde(default)]
    pub rover: Option<VerificationServiceConfig>,
}

impl VerificationPairConfig {
    /// Configured services with non-empty tokens.
    pub fn enabled_services(&self) -> Vec<&VerificationServiceConfig> {
        [self.bloxlink.as_ref(), self.rover.as_ref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.token.is_empty())
            .collect()
    }
}

/// One verification bot account. An empty token disables the service.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationServiceConfig {
    /// User-session token for the invoking account.
    #[serde(default)]
    pub token: String,
    /// Guild where the slash command is invoked.
    #[serde(default)]
    pub guild_id: u64,
    /// Channel the bot replies in.
    #[serde(default)]
    pub channel_id: u64,
    /// Slash command name to discover and invoke.
    #[serde(default = "default_command_name")]
    pub command_name: String,
    /// Name of the user option on the command.
    #[serde(default = "default_command_option")]
    pub command_option: String,
}

/// AI message classifier endpoint (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_analyzer_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_analyzer_model")]
    pub model: String,
    /// Messages per analysis batch.
    #[serde(default = "default_analyzer_batch")]
    pub max_messages: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_analyzer_endpoint(),
            api_key: String::new(),
            model: default_analyzer_model(),
            max_messages: default_analyzer_batch(),
        }
    }
}

/// Storage location.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path, `:memory:` for tests.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Guild-count confidence tiers for the condo reason. The two lowest tiers
/// only apply on the mixed path.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildCountThresholds {
    #[serde(default = "default_tier_five")]
    pub five_or_more: f64,
    #[serde(default = "default_tier_four")]
    pub four: f64,
    #[serde(default = "default_tier_three")]
    pub three: f64,
    #[serde(default = "default_tier_two")]
    pub two: f64,
    #[serde(default = "default_tier_one")]
    pub one: f64,
    /// Confidence assigned when no evidence was found (mixed outcome).
    #[serde(default = "default_mixed_confidence")]
    pub mixed: f64,
}

impl Default for GuildCountThresholds {
    fn default() -> Self {
        Self {
            five_or_more: default_tier_five(),
            four: default_tier_four(),
            three: default_tier_three(),
            two: default_tier_two(),
            one: default_tier_one(),
            mixed: default_mixed_confidence(),
        }
    }
}

impl GuildCountThresholds {
    /// The piecewise condo-confidence table.
    pub fn confidence_for(&self, guild_count: usize) -> f64 {
        match guild_count {
            n if n >= 5 => self.five_or_more,
            4 => self.four,
            3 => self.three,
            2 => self.two,
            1 => self.one,
            _ => 0.0,
        }
    }
}

/// Event-intake admission limits.
#[derive(Debug, Clone, Deserialize)]
pub struct EventLimitConfig {
    /// Per-(user, guild) message cooldown in hours.
    #[serde(default = "default_user_cooldown_hours")]
    pub user_cooldown_hours: u64,
    /// Admissions per guild within the guild window.
    #[serde(default = "default_guild_window_count")]
    pub guild_window_count: u32,
    /// Guild window length in seconds.
    #[serde(default = "default_guild_window_secs")]
    pub guild_window_secs: u64,
    /// Admissions globally within the global window.
    #[serde(default = "default_global_window_count")]
    pub global_window_count: u32,
    /// Global window length in seconds.
    #[serde(default = "default_global_window_secs")]
    pub global_window_secs: u64,
}

impl Default for EventLimitConfig {
    fn default() -> Self {
        Self {
            user_cooldown_hours: default_user_cooldown_hours(),
            guild_window_count: default_guild_window_count(),
            guild_window_secs: default_guild_window_secs(),
            global_window_count: default_global_window_count(),
            global_window_secs: default_global_window_secs(),
        }
    }
}
