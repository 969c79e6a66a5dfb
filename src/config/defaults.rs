//! Serde default functions for configuration values.

pub fn default_sync_interval_secs() -> u64 {
    900
}

pub fn default_user_scan_age_hours() -> u64 {
    12
}

pub fn default_recheck_interval_secs() -> u64 {
    3600
}

pub fn default_grace_period_hours() -> u64 {
    // Multi-account deployments use the wider window.
    24
}

pub fn default_channel_process_threshold() -> u32 {
    8
}

pub fn default_guild_walk_timeout_secs() -> u64 {
    300
}

pub fn default_base_interval_ms() -> u64 {
    800
}

pub fn default_jitter_ms() -> u64 {
    200
}

pub fn default_command_name() -> String {
    "getinfo".to_string()
}

pub fn default_command_option() -> String {
    "user".to_string()
}

pub fn default_analyzer_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

pub fn default_analyzer_model() -> String {
    "gpt-4o-mini".to_string()
}

pub fn default_analyzer_batch() -> usize {
    25
}

pub fn default_db_path() -> String {
    "condoscan.db".to_string()
}

pub fn default_tier_five() -> f64 {
    0.95
}

pub fn default_tier_four() -> f64 {
    0.90
}

pub fn default_tier_three() -> f64 {
    0.85
}

pub fn default_tier_two() -> f64 {
    0.40
}

pub fn default_tier_one() -> f64 {
    0.30
}

pub fn default_mixed_confidence() -> f64 {
    0.40
}

pub fn default_user_cooldown_hours() -> u64 {
    6
}

pub fn default_guild_window_count() -> u32 {
    20
}

pub fn default_guild_window_secs() -> u64 {
    600
}

pub fn default_global_window_count() -> u32 {
    200
}

pub fn default_global_window_secs() -> u64 {
    60
}
