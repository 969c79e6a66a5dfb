//! Reason aggregation and the flagging engine's pure core.
//!
//! - confidence math: noisy-or over weighted per-kind confidences
//! - reason merge: replace-with-source-tag semantics
//! - status transitions: the only automatic moves are
//!   `Unflagged->Flagged`, `Flagged->Confirmed` and `any->Mixed`
//!
//! Submodules: [`checkers`] recompute individual reason kinds; [`recheck`]
//! is the background worker that drives them; [`bancheck`] closes reviews
//! for accounts the platform has since banned.

pub mod bancheck;
pub mod checkers;
pub mod recheck;

use crate::models::{Reason, ReasonKind, Reasons, ReviewUser, UserStatus};
use chrono::Utc;

/// Total confidence across reason kinds.
///
/// Noisy-or over weighted per-kind confidences: `1 - Π (1 - wₖ·cₖ)`. A
/// single full-weight reason yields exactly its own confidence; every
/// additional kind strictly increases the total, asymptotically below 1.0.
pub fn calculate_confidence(reasons: &Reasons) -> f64 {
    let miss: f64 = reasons
        .iter()
        .map(|(kind, reason)| 1.0 - (kind.weight() * reason.confidence).clamp(0.0, 1.0))
        .product();
    (1.0 - miss).clamp(0.0, 1.0)
}

/// Replace the reason of `kind` on `user`, recompute the total confidence
/// and bump `last_updated`. Merging is replace-with-source-tag: whatever was
/// stored under `kind` before is gone.
pub fn merge_reason(user: &mut ReviewUser, kind: ReasonKind, reason: Reason) {
    user.reasons.insert(kind, reason);
    user.confidence = calculate_confidence(&user.reasons);
    user.last_updated = Some(Utc::now());
}

/// Apply a flag decision to a current status, permitting only the automatic
/// transitions. Reviewer-owned states (`Cleared`, `Banned`, `Confirmed`) are
/// never downgraded by a `Flagged` decision; a `Mixed` decision applies from
/// any state.
pub fn apply_status(current: UserStatus, decided: UserStatus) -> UserStatus {
    match decided {
        UserStatus::Mixed => UserStatus::Mixed,
        UserStatus::Flagged => match current {
            UserStatus::Unflagged | UserStatus::Flagged | UserStatus::Mixed => UserStatus::Flagged,
            reviewer_owned => reviewer_owned,
        },
        UserStatus::Confirmed => match current {
            UserStatus::Flagged | UserStatus::Confirmed => UserStatus::Confirmed,
            other => other,
        },
        _ => current,
    }
}
