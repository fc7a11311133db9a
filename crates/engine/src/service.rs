use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use tether_common::error::{TetherError, TetherResult};
use tether_db::identity::models::{
    ExternalIdentity, ExternalProfile, IdentitySettings, LinkAudit, LinkMethod, LinkStatus,
    LinkSuggestion, PendingSuggestionFilter, SuggestionSeed, SuggestionStatus,
    UnresolvedIdentityFilter,
};
use tether_db::identity::repositories::{
    ExternalIdentityRepository, IdentitySettingsRepository, LinkAuditRepository,
    LinkSuggestionRepository, OrgMemberRepository,
};
use tether_matching::{find_candidates, LinkCandidate};

use crate::resolution::{
    partition_candidates, ResolutionAction, ResolutionResult, AUTO_EMAIL_CONFIDENCE,
    MAX_SUGGESTIONS,
};

/// Entry point for identity resolution and link management. Holds the
/// repository seams; every public operation is one request-scoped unit of
/// work whose state transitions commit atomically in the storage layer.
pub struct LinkingService {
    identities: Arc<dyn ExternalIdentityRepository>,
    suggestions: Arc<dyn LinkSuggestionRepository>,
    audits: Arc<dyn LinkAuditRepository>,
    members: Arc<dyn OrgMemberRepository>,
    settings: Arc<dyn IdentitySettingsRepository>,
}

impl LinkingService {
    pub fn new(
        identities: Arc<dyn ExternalIdentityRepository>,
        suggestions: Arc<dyn LinkSuggestionRepository>,
        audits: Arc<dyn LinkAuditRepository>,
        members: Arc<dyn OrgMemberRepository>,
        settings: Arc<dyn IdentitySettingsRepository>,
    ) -> Self {
        Self {
            identities,
            suggestions,
            audits,
            members,
            settings,
        }
    }

    async fn load_settings(&self, org_id: Uuid) -> TetherResult<IdentitySettings> {
        let settings = self
            .settings
            .get(org_id)
            .await?
            .unwrap_or_else(|| IdentitySettings::defaults_for(org_id));
        settings.validate()?;
        Ok(settings)
    }

    /// Resolve a freshly synced provider profile against the organization:
    /// upsert, short-circuit when already linked, try the exact-email path,
    /// then rank members and auto-link, suggest or give up per thresholds.
    pub async fn resolve_identity(
        &self,
        org_id: Uuid,
        profile: &ExternalProfile,
        actor: &str,
    ) -> TetherResult<ResolutionResult> {
        if profile.provider_user_id.trim().is_empty() {
            return Err(TetherError::Validation(
                "profile is missing a provider user id".to_string(),
            ));
        }

        let settings = self.load_settings(org_id).await?;
        let identity = self.identities.upsert_by_provider_ref(org_id, profile).await?;
        identity.check_integrity()?;

        if identity.link_status == LinkStatus::Linked {
            if let Some(user_id) = identity.user_id {
                tracing::debug!(
                    identity = %identity.id,
                    user = %user_id,
                    "re-sighting of linked identity"
                );
                return Ok(ResolutionResult {
                    external_identity_id: identity.id,
                    action: ResolutionAction::AlreadyLinked { user_id },
                });
            }
        }

        if settings.email_auto_link_enabled {
            if let Some(email) = profile.email.as_deref().filter(|e| !e.trim().is_empty()) {
                let matches = self.members.find_by_email(org_id, email).await?;
                if matches.len() == 1 {
                    let user_id = matches[0].id;
                    self.identities
                        .link(
                            org_id,
                            identity.id,
                            user_id,
                            LinkMethod::AutoEmail,
                            AUTO_EMAIL_CONFIDENCE,
                            actor,
                            None,
                        )
                        .await?;
                    tracing::info!(
                        identity = %identity.id,
                        user = %user_id,
                        "auto-linked by exact email"
                    );
                    return Ok(ResolutionResult {
                        external_identity_id: identity.id,
                        action: ResolutionAction::AutoLinked {
                            user_id,
                            method: LinkMethod::AutoEmail,
                            confidence: AUTO_EMAIL_CONFIDENCE,
                        },
                    });
                }
            }
        }

        let members = self.members.list_active(org_id).await?;
        let name = profile
            .display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(profile.real_name.as_deref());
        let candidates = find_candidates(&members, name, profile.email.as_deref());
        let (auto, eligible) = partition_candidates(&candidates, &settings);

        if auto.len() == 1 {
            let winner = &auto[0];
            self.identities
                .link(
                    org_id,
                    identity.id,
                    winner.user_id,
                    LinkMethod::AutoFuzzy,
                    winner.confidence,
                    actor,
                    None,
                )
                .await?;
            tracing::info!(
                identity = %identity.id,
                user = %winner.user_id,
                confidence = winner.confidence,
                "auto-linked by name match"
            );
            return Ok(ResolutionResult {
                external_identity_id: identity.id,
                action: ResolutionAction::AutoLinked {
                    user_id: winner.user_id,
                    method: LinkMethod::AutoFuzzy,
                    confidence: winner.confidence,
                },
            });
        }

        // Multiple auto-eligible candidates are ambiguous too; blind
        // tie-breaking on confidence risks linking the wrong person.
        let shortlist: Vec<LinkCandidate> = auto
            .into_iter()
            .chain(eligible)
            .take(MAX_SUGGESTIONS)
            .collect();

        if !shortlist.is_empty() {
            let expires_at = Utc::now() + Duration::days(settings.suggestion_expiry_days);
            let seeds: Vec<SuggestionSeed> = shortlist
                .iter()
                .map(|c| SuggestionSeed {
                    user_id: c.user_id,
                    method: c.method.as_str().to_string(),
                    confidence: c.confidence,
                    details: serde_json::json!({
                        "score": c.score,
                        "domain_boosted": c.domain_boosted,
                    }),
                })
                .collect();

            self.suggestions
                .upsert_batch(org_id, identity.id, &seeds, expires_at, actor)
                .await?;
            self.identities.mark_suggested(org_id, identity.id).await?;
            tracing::info!(
                identity = %identity.id,
                count = shortlist.len(),
                "created link suggestions"
            );
            return Ok(ResolutionResult {
                external_identity_id: identity.id,
                action: ResolutionAction::Suggested {
                    candidates: shortlist,
                },
            });
        }

        Ok(ResolutionResult {
            external_identity_id: identity.id,
            action: ResolutionAction::NoMatch,
        })
    }

    pub async fn link(
        &self,
        org_id: Uuid,
        external_identity_id: Uuid,
        user_id: Uuid,
        method: LinkMethod,
        actor: &str,
        reason: Option<&str>,
    ) -> TetherResult<ExternalIdentity> {
        let confidence = match method {
            LinkMethod::AutoEmail => AUTO_EMAIL_CONFIDENCE,
            _ => 1.0,
        };
        self.identities
            .link(
                org_id,
                external_identity_id,
                user_id,
                method,
                confidence,
                actor,
                reason,
            )
            .await
    }

    pub async fn unlink(
        &self,
        org_id: Uuid,
        external_identity_id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> TetherResult<ExternalIdentity> {
        self.identities
            .unlink(org_id, external_identity_id, actor, reason)
            .await
    }

    /// The escape hatch for misattributions: unlink-then-link as one audited
    /// operation, always method `admin` at confidence 1.0. The reason is
    /// mandatory and checked before any state changes.
    pub async fn relink(
        &self,
        org_id: Uuid,
        external_identity_id: Uuid,
        new_user_id: Uuid,
        actor: &str,
        reason: &str,
    ) -> TetherResult<ExternalIdentity> {
        if reason.trim().is_empty() {
            return Err(TetherError::Validation(
                "relink requires a non-empty reason".to_string(),
            ));
        }
        self.identities
            .relink(org_id, external_identity_id, new_user_id, actor, reason)
            .await
    }

    pub async fn decide(
        &self,
        org_id: Uuid,
        suggestion_id: Uuid,
        accepted: bool,
        reviewer: &str,
        reason: Option<&str>,
    ) -> TetherResult<()> {
        let suggestion = self
            .suggestions
            .get(org_id, suggestion_id)
            .await?
            .ok_or_else(|| TetherError::NotFound(format!("suggestion {suggestion_id}")))?;

        if suggestion.status != SuggestionStatus::Pending {
            return Err(TetherError::InvalidState(format!(
                "suggestion {suggestion_id} is {}, not pending",
                suggestion.status.as_str()
            )));
        }

        if accepted {
            // The link marks this suggestion accepted in the same transaction.
            self.identities
                .link(
                    org_id,
                    suggestion.external_identity_id,
                    suggestion.suggested_user_id,
                    LinkMethod::Manual,
                    suggestion.confidence,
                    reviewer,
                    reason,
                )
                .await?;
        } else {
            self.suggestions
                .reject(org_id, suggestion_id, reviewer, reason)
                .await?;
        }
        Ok(())
    }

    pub async fn expire_due_suggestions(&self, now: DateTime<Utc>) -> TetherResult<u64> {
        let count = self.suggestions.expire_due(now).await?;
        if count > 0 {
            tracing::info!(count, "expired overdue link suggestions");
        }
        Ok(count)
    }

    pub async fn prune_audit_log(&self, cutoff: DateTime<Utc>) -> TetherResult<u64> {
        let count = self.audits.prune_older_than(cutoff).await?;
        if count > 0 {
            tracing::info!(count, "pruned audit rows past retention");
        }
        Ok(count)
    }

    // ── Query accessors ──────────────────────────────────────────

    pub async fn identities_for_user(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> TetherResult<Vec<ExternalIdentity>> {
        self.identities.list_for_user(org_id, user_id).await
    }

    pub async fn unresolved_identities(
        &self,
        org_id: Uuid,
        filter: UnresolvedIdentityFilter,
    ) -> TetherResult<Vec<ExternalIdentity>> {
        self.identities.list_unresolved(org_id, filter).await
    }

    pub async fn pending_suggestions_for_org(
        &self,
        org_id: Uuid,
        filter: PendingSuggestionFilter,
    ) -> TetherResult<Vec<LinkSuggestion>> {
        self.suggestions.list_pending_for_org(org_id, filter).await
    }

    pub async fn pending_suggestions_for_user(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> TetherResult<Vec<LinkSuggestion>> {
        self.suggestions.list_pending_for_user(org_id, user_id).await
    }

    pub async fn audit_trail(
        &self,
        org_id: Uuid,
        external_identity_id: Uuid,
    ) -> TetherResult<Vec<LinkAudit>> {
        self.audits.list_for_identity(org_id, external_identity_id).await
    }
}
