//! Verification services: resolving a Discord user's linked Roblox identity
//! through third-party verification bots.
//!
//! - [`executor`]: generic slash-command invocation with out-of-band reply
//!   correlation by nonce and message id.
//! - [`bloxlink`] / [`rover`]: format-specific reply parsers sharing one
//!   error taxonomy.
//! - [`manager`]: sequential fan-out across the configured services with a
//!   one-shot retry on transient unavailability.

pub mod bloxlink;
pub mod executor;
pub mod manager;
pub mod rover;

pub use executor::CommandExecutor;
pub use manager::VerificationManager;

use crate::error::ScanResult;
use async_trait::async_trait;
use condo_proto::{Message, RobloxId, UserId};
use tokio_util::sync::CancellationToken;

/// One external verification bot: command invocation plus reply parsing.
#[async_trait]
pub trait VerificationService: Send + Sync {
    /// Service name for logs.
    fn name(&self) -> &'static str;

    /// Invoke the bot's lookup command for `target` and await the reply.
    async fn execute_command(
        &self,
        cancel: &CancellationToken,
        target: UserId,
    ) -> ScanResult<Message>;

    /// Parse a reply into `(roblox id, roblox username)`.
    fn parse_response(&self, reply: &Message) -> ScanResult<(RobloxId, String)>;
}
