use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tether_db::identity::models::{IdentitySettings, LinkMethod};
use tether_matching::LinkCandidate;

/// Confidence recorded for an exact-email link.
pub const AUTO_EMAIL_CONFIDENCE: f64 = 0.98;

/// At most this many suggestions per identity, highest confidence first.
pub const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolutionAction {
    AlreadyLinked {
        user_id: Uuid,
    },
    AutoLinked {
        user_id: Uuid,
        method: LinkMethod,
        confidence: f64,
    },
    Suggested {
        candidates: Vec<LinkCandidate>,
    },
    NoMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub external_identity_id: Uuid,
    pub action: ResolutionAction,
}

/// Split ranked candidates into auto-link-eligible and suggestion-eligible
/// bands. Order within each band follows the input ranking.
pub fn partition_candidates(
    candidates: &[LinkCandidate],
    settings: &IdentitySettings,
) -> (Vec<LinkCandidate>, Vec<LinkCandidate>) {
    let mut auto = Vec::new();
    let mut eligible = Vec::new();

    for candidate in candidates {
        if candidate.confidence >= settings.auto_link_threshold {
            auto.push(candidate.clone());
        } else if candidate.confidence >= settings.suggestion_threshold {
            eligible.push(candidate.clone());
        }
    }

    (auto, eligible)
}
