//! Configuration loading and management.
//!
//! Split into logical submodules:
//! - [`types`]: config struct definitions
//! - [`defaults`]: serde default functions
//! - [`validation`]: startup validation pass (fatal on error)

mod defaults;
mod types;
mod validation;

pub use types::{
    AnalyzerConfig, Config, DatabaseConfig, EventLimitConfig, GuildCountThresholds, LogFormat,
    RateLimiterConfig, SyncConfig, VerificationPairConfig, VerificationServiceConfig, WorkerConfig,
};
pub use validation::validate;

use anyhow::Context;
use std::path::Path;

impl Config {
    /// Load and parse a TOML config file.
    pub fn load(path: &str) -> anyhow::Result<Config> {
        let raw = std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("reading config file {path}"))?;
        let config: Config = toml::from_str(&raw).context("parsing config file")?;
        Ok(config)
    }
}
