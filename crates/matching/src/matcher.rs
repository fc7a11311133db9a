use serde::{Deserialize, Serialize};

use crate::normalize::{jaccard, normalize_name, token_set};

/// Confidence assigned when two names are equal after normalization.
pub const NORMALIZED_CONFIDENCE: f64 = 0.98;
/// Minimum similarity coefficient for the similarity stage to qualify.
pub const SIMILARITY_FLOOR: f64 = 0.85;
/// Minimum Jaccard coefficient for the token-set stage to qualify.
pub const TOKEN_SET_FLOOR: f64 = 0.80;
/// Token-set matches carry weaker evidence than direct similarity.
pub const TOKEN_SET_DISCOUNT: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Normalized,
    Similarity,
    TokenSet,
    None,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Normalized => "normalized",
            Self::Similarity => "similarity",
            Self::TokenSet => "token_set",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NameMatch {
    pub method: MatchMethod,
    /// Raw coefficient of the qualifying stage; on a miss, the higher of
    /// the similarity and token-set coefficients, kept for diagnostics.
    pub score: f64,
    pub confidence: f64,
}

const NO_MATCH: NameMatch = NameMatch {
    method: MatchMethod::None,
    score: 0.0,
    confidence: 0.0,
};

/// Compare two display names through a four-stage cascade, returning on the
/// first qualifying stage: exact, normalized, similarity, token-set.
/// Deterministic and pure; empty input on either side never matches.
pub fn match_names(a: &str, b: &str) -> NameMatch {
    if a.is_empty() || b.is_empty() {
        return NO_MATCH;
    }

    if a == b {
        return NameMatch {
            method: MatchMethod::Exact,
            score: 1.0,
            confidence: 1.0,
        };
    }

    let na = normalize_name(a);
    let nb = normalize_name(b);
    if na.is_empty() || nb.is_empty() {
        return NO_MATCH;
    }
    if na == nb {
        return NameMatch {
            method: MatchMethod::Normalized,
            score: 1.0,
            confidence: NORMALIZED_CONFIDENCE,
        };
    }

    let similarity = strsim::jaro(&na, &nb);
    if similarity >= SIMILARITY_FLOOR {
        return NameMatch {
            method: MatchMethod::Similarity,
            score: similarity,
            confidence: similarity,
        };
    }

    let overlap = jaccard(&token_set(&na), &token_set(&nb));
    if overlap >= TOKEN_SET_FLOOR {
        return NameMatch {
            method: MatchMethod::TokenSet,
            score: overlap,
            confidence: overlap * TOKEN_SET_DISCOUNT,
        };
    }

    NameMatch {
        method: MatchMethod::None,
        score: similarity.max(overlap),
        confidence: 0.0,
    }
}
