use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tether_db::identity::models::OrgMember;

use crate::matcher::{match_names, MatchMethod};

/// Flat confidence boost for candidates sharing a corporate email domain.
pub const DOMAIN_BOOST: f64 = 0.10;

/// Consumer webmail domains; sharing one of these says nothing about
/// working at the same organization.
const FREE_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "live.com",
    "aol.com",
    "icloud.com",
    "protonmail.com",
    "proton.me",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkCandidate {
    pub user_id: Uuid,
    pub display_name: String,
    pub confidence: f64,
    pub method: MatchMethod,
    /// Raw coefficient from the qualifying matcher stage.
    pub score: f64,
    pub domain_boosted: bool,
}

fn email_domain(email: &str) -> Option<String> {
    let domain = email.trim().rsplit('@').next()?;
    if domain.is_empty() || !email.contains('@') {
        return None;
    }
    Some(domain.to_lowercase())
}

fn is_free_mail(domain: &str) -> bool {
    FREE_MAIL_DOMAINS.contains(&domain)
}

/// Rank every member against the profile's display name and email domain.
///
/// Members whose name match comes back at zero confidence are discarded;
/// the domain boost amplifies a real name match but never creates a
/// candidate on its own. Output is sorted by descending confidence with
/// ties broken by member id, so results are stable.
pub fn find_candidates(
    members: &[OrgMember],
    display_name: Option<&str>,
    email: Option<&str>,
) -> Vec<LinkCandidate> {
    let profile_domain = email.and_then(email_domain);
    let name = match display_name {
        Some(name) if !name.trim().is_empty() => name,
        _ => return Vec::new(),
    };

    let mut candidates: Vec<LinkCandidate> = members
        .iter()
        .filter_map(|member| {
            let name_match = match_names(name, &member.display_name);
            if name_match.confidence <= 0.0 {
                return None;
            }

            let member_domain = member.email.as_deref().and_then(email_domain);
            let domain_boosted = match (&profile_domain, &member_domain) {
                (Some(p), Some(m)) => p == m && !is_free_mail(p),
                _ => false,
            };

            let confidence = if domain_boosted {
                (name_match.confidence + DOMAIN_BOOST).min(1.0)
            } else {
                name_match.confidence
            };

            Some(LinkCandidate {
                user_id: member.id,
                display_name: member.display_name.clone(),
                confidence,
                method: name_match.method,
                score: name_match.score,
                domain_boosted,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    candidates
}
