//! Evidence reasons and confidence weighting.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The category of evidence behind a flag. Each kind maps to at most one
/// [`Reason`] on a review record; merging replaces the existing entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ReasonKind {
    /// Condo-server co-membership of a linked Discord account.
    Condo,
    /// Flagged accounts on the Roblox friends list.
    Friend,
    /// Membership in a flagged Roblox group.
    Group,
    /// Inappropriate avatar outfit.
    Outfit,
    /// AI-flagged message content.
    Message,
}

impl ReasonKind {
    /// All kinds, in merge order.
    pub const ALL: [ReasonKind; 5] = [
        ReasonKind::Condo,
        ReasonKind::Friend,
        ReasonKind::Group,
        ReasonKind::Outfit,
        ReasonKind::Message,
    ];

    /// Stable lowercase name, also the JSON map key.
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonKind::Condo => "condo",
            ReasonKind::Friend => "friend",
            ReasonKind::Group => "group",
            ReasonKind::Outfit => "outfit",
            ReasonKind::Message => "message",
        }
    }

    /// Aggregation weight for [`calculate_confidence`](crate::flag::calculate_confidence).
    /// Condo and message evidence are direct observations; the social-graph
    /// kinds are corroborating.
    pub fn weight(self) -> f64 {
        match self {
            ReasonKind::Condo => 1.0,
            ReasonKind::Message => 1.0,
            ReasonKind::Friend => 0.8,
            ReasonKind::Group => 0.6,
            ReasonKind::Outfit => 0.4,
        }
    }
}

impl fmt::Display for ReasonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "condo" => Ok(ReasonKind::Condo),
            "friend" => Ok(ReasonKind::Friend),
            "group" => Ok(ReasonKind::Group),
            "outfit" => Ok(ReasonKind::Outfit),
            "message" => Ok(ReasonKind::Message),
            other => Err(format!("unknown reason kind: {other}")),
        }
    }
}

/// One piece of evidence: a human-readable message, a confidence in `[0,1]`,
/// an ordered evidence trail and the subsystem that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    pub message: String,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub source: String,
}

impl Reason {
    /// Build a reason, clamping confidence into `[0,1]`.
    pub fn new(
        message: impl Into<String>,
        confidence: f64,
        evidence: Vec<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            confidence: confidence.clamp(0.0, 1.0),
            evidence,
            source: source.into(),
        }
    }
}

/// The reason map stored on a review record. Serialized as a JSON object
/// keyed by the lowercase kind name.
pub type Reasons = BTreeMap<ReasonKind, Reason>;
