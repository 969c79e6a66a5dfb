//! Configuration validation.
//!
//! Run once at startup, before any session is opened. Returns every problem
//! found rather than stopping at the first.

use super::Config;

/// Validate a configuration, collecting all errors.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.sync.tokens.is_empty() {
        errors.push("sync.tokens is empty: at least one scanner account is required".to_string());
    }
    if config.sync.tokens.iter().any(|t| t.trim().is_empty()) {
        errors.push("sync.tokens contains a blank token".to_string());
    }

    if config.rate_limiter.base_interval_ms == 0 {
        errors.push("rate_limiter.base_interval_ms must be positive".to_string());
    }
    if config.rate_limiter.jitter_ms >= config.rate_limiter.base_interval_ms {
        errors.push(format!(
            "rate_limiter.jitter_ms ({}) must be smaller than base_interval_ms ({})",
            config.rate_limiter.jitter_ms, config.rate_limiter.base_interval_ms
        ));
    }

    let tiers = &config.thresholds;
    for (name, value) in [
        ("five_or_more", tiers.five_or_more),
        ("four", tiers.four),
        ("three", tiers.three),
        ("two", tiers.two),
        ("one", tiers.one),
        ("mixed", tiers.mixed),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(format!("thresholds.{name} must lie in [0, 1], got {value}"));
        }
    }
    if !(tiers.five_or_more >= tiers.four
        && tiers.four >= tiers.three
        && tiers.three >= tiers.two
        && tiers.two >= tiers.one)
    {
        errors.push("thresholds must be non-increasing from five_or_more down to one".to_string());
    }

    for (index, pair) in config.verification.iter().enumerate() {
        for service in pair.enabled_services() {
            if service.guild_id == 0 {
                errors.push(format!("verification[{index}]: guild_id is required"));
            }
            if service.channel_id == 0 {
                errors.push(format!("verification[{index}]: channel_id is required"));
            }
            if service.command_name.trim().is_empty() {
                errors.push(format!("verification[{index}]: command_name is required"));
            }
        }
    }

    if config.database.path.trim().is_empty() {
        errors.push("database.path must not be empty".to_string());
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
