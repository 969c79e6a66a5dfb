//! Unified error handling for condoscan.
//!
//! One taxonomy crosses every layer so the drivers can classify outcomes
//! uniformly: visibility errors are terminal per user, transient errors back
//! off and retry, parse errors are logged and skipped, storage errors bubble.

use thiserror::Error;

/// Errors produced by the scan pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum ScanError {
    // ------------------------------------------------------------------
    // Visibility (terminal per user: stamp timestamps and move on)
    // ------------------------------------------------------------------
    #[error("user not visible")]
    UserNotVisible,

    #[error("user is banned on the platform")]
    UserBanned,

    // ------------------------------------------------------------------
    // Transient (never terminal: back off and retry next cycle)
    // ------------------------------------------------------------------
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("rate limited")]
    RateLimited,

    #[error("response timeout")]
    ResponseTimeout,

    #[error("operation cancelled")]
    Cancelled,

    // ------------------------------------------------------------------
    // Verification-service specific (logged at warn and skipped)
    // ------------------------------------------------------------------
    #[error("verification service temporarily unavailable")]
    ServiceUnavailable,

    #[error("user is not verified with this service")]
    UserNotVerified,

    #[error("slash command not found: {0}")]
    CommandNotFound(String),

    #[error("reply missing expected nested component")]
    MissingNested,

    #[error("invalid reply format: {0}")]
    InvalidFormat(String),

    #[error("reply carried no content")]
    MissingContent,

    #[error("invalid roblox id: {0}")]
    InvalidRobloxId(String),

    // ------------------------------------------------------------------
    // Infrastructure
    // ------------------------------------------------------------------
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api returned status {0}")]
    Api(u16),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("wire decode error: {0}")]
    Proto(#[from] condo_proto::ProtoError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] crate::db::DbError),
}

impl ScanError {
    /// Static code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UserNotVisible => "user_not_visible",
            Self::UserBanned => "user_banned",
            Self::CircuitOpen(_) => "circuit_open",
            Self::RateLimited => "rate_limited",
            Self::ResponseTimeout => "response_timeout",
            Self::Cancelled => "cancelled",
            Self::ServiceUnavailable => "service_unavailable",
            Self::UserNotVerified => "user_not_verified",
            Self::CommandNotFound(_) => "command_not_found",
            Self::MissingNested => "missing_nested",
            Self::InvalidFormat(_) => "invalid_format",
            Self::MissingContent => "missing_content",
            Self::InvalidRobloxId(_) => "invalid_roblox_id",
            Self::Http(_) => "http_error",
            Self::Api(_) => "api_status",
            Self::Gateway(_) => "gateway_error",
            Self::Proto(_) => "proto_error",
            Self::Json(_) => "json_error",
            Self::Db(_) => "db_error",
        }
    }

    /// Whether the error is transient: the caller should back off and retry
    /// on a later cycle rather than record an outcome.
    ///
    /// reqwest exposes typed timeout errors, so HTTP errors classify without
    /// string matching; the substring fallback below exists only for
    /// third-party layers that flatten messages.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::CircuitOpen(_) | Self::RateLimited | Self::ResponseTimeout | Self::Cancelled => {
                true
            }
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api(status) => *status == 429 || *status >= 500,
            other => is_rate_limit_message(&other.to_string()),
        }
    }

    /// Whether the error means the target cannot be observed at all.
    pub fn is_visibility(&self) -> bool {
        matches!(self, Self::UserNotVisible | Self::UserBanned)
    }
}

/// Substring fallback for wrapped rate-limit errors from layers that do not
/// expose a typed kind.
pub fn is_rate_limit_message(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429")
}

/// Result alias used throughout the pipeline.
pub type ScanResult<T> = Result<T, ScanError>;
