#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tether_common::error::{TetherError, TetherResult};
use tether_db::identity::models::{
    round2, AuditAction, ExternalIdentity, ExternalProfile, IdentitySettings, LinkAudit,
    LinkMethod, LinkStatus, LinkSuggestion, OrgMember, PendingSuggestionFilter, Provider,
    SuggestionSeed, SuggestionStatus, UnresolvedIdentityFilter,
};
use tether_db::identity::repositories::{
    ExternalIdentityRepository, IdentitySettingsRepository, LinkAuditRepository,
    LinkSuggestionRepository, OrgMemberRepository,
};
use tether_engine::LinkingService;

/// In-memory store implementing the repository traits with the same
/// semantics as the Postgres implementations, so the engine can be driven
/// without a database. One lock guards all tables, which also makes each
/// fake operation atomic.
#[derive(Default)]
pub struct FakeStore {
    pub state: Mutex<State>,
}

#[derive(Default)]
pub struct State {
    pub identities: Vec<ExternalIdentity>,
    pub suggestions: Vec<LinkSuggestion>,
    pub audits: Vec<LinkAudit>,
    pub members: Vec<OrgMember>,
    pub settings: HashMap<Uuid, IdentitySettings>,
}

impl FakeStore {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake store lock poisoned")
    }

    pub fn add_member(&self, org_id: Uuid, name: &str, email: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().members.push(OrgMember {
            id,
            org_id,
            email: email.map(|s| s.to_string()),
            display_name: name.to_string(),
            status: "active".to_string(),
        });
        id
    }

    pub fn set_settings(&self, settings: IdentitySettings) {
        self.lock().settings.insert(settings.org_id, settings);
    }

    pub fn identity(&self, id: Uuid) -> ExternalIdentity {
        self.lock()
            .identities
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .expect("identity should exist")
    }

    pub fn suggestions_for(&self, external_identity_id: Uuid) -> Vec<LinkSuggestion> {
        self.lock()
            .suggestions
            .iter()
            .filter(|s| s.external_identity_id == external_identity_id)
            .cloned()
            .collect()
    }

    pub fn audit_count(&self, external_identity_id: Uuid) -> usize {
        self.lock()
            .audits
            .iter()
            .filter(|a| a.external_identity_id == external_identity_id)
            .count()
    }

    pub fn backdate_suggestion(&self, suggestion_id: Uuid, expires_at: DateTime<Utc>) {
        let mut state = self.lock();
        let suggestion = state
            .suggestions
            .iter_mut()
            .find(|s| s.id == suggestion_id)
            .expect("suggestion should exist");
        suggestion.expires_at = expires_at;
    }
}

fn push_audit(
    state: &mut State,
    org_id: Uuid,
    external_identity_id: Uuid,
    suggestion_id: Option<Uuid>,
    action: AuditAction,
    previous_user_id: Option<Uuid>,
    new_user_id: Option<Uuid>,
    method: Option<String>,
    confidence: Option<f64>,
    actor: &str,
    reason: Option<&str>,
) {
    state.audits.push(LinkAudit {
        id: Uuid::new_v4(),
        org_id,
        external_identity_id,
        suggestion_id,
        action,
        previous_user_id,
        new_user_id,
        method,
        confidence,
        actor: actor.to_string(),
        reason: reason.map(|s| s.to_string()),
        metadata: serde_json::json!({}),
        created_at: Utc::now(),
    });
}

/// Mirror of the Postgres link transaction: set link fields, accept the
/// winning pending suggestion, reject rival pending suggestions.
fn apply_link_state(
    state: &mut State,
    identity_idx: usize,
    user_id: Uuid,
    method: LinkMethod,
    confidence: f64,
    actor: &str,
    now: DateTime<Utc>,
) {
    let identity = &mut state.identities[identity_idx];
    let identity_id = identity.id;
    identity.user_id = Some(user_id);
    identity.link_status = LinkStatus::Linked;
    identity.link_method = Some(method);
    identity.link_confidence = Some(round2(confidence));
    identity.linked_at = Some(now);
    identity.linked_by = Some(actor.to_string());
    identity.updated_at = now;

    for suggestion in state
        .suggestions
        .iter_mut()
        .filter(|s| s.external_identity_id == identity_id && s.status == SuggestionStatus::Pending)
    {
        if suggestion.suggested_user_id == user_id {
            suggestion.status = SuggestionStatus::Accepted;
        } else {
            suggestion.status = SuggestionStatus::Rejected;
            suggestion.rejection_reason =
                Some("superseded: identity linked to another user".to_string());
        }
        suggestion.reviewed_by = Some(actor.to_string());
        suggestion.reviewed_at = Some(now);
        suggestion.updated_at = now;
    }
}

fn find_identity_idx(state: &State, org_id: Uuid, id: Uuid) -> TetherResult<usize> {
    state
        .identities
        .iter()
        .position(|i| i.org_id == org_id && i.id == id)
        .ok_or_else(|| TetherError::NotFound(format!("external identity {id}")))
}

fn ensure_member(state: &State, org_id: Uuid, user_id: Uuid) -> TetherResult<()> {
    let found = state
        .members
        .iter()
        .any(|m| m.org_id == org_id && m.id == user_id && m.status == "active");
    if !found {
        return Err(TetherError::NotFound(format!(
            "user {user_id} in organization {org_id}"
        )));
    }
    Ok(())
}

#[async_trait]
impl ExternalIdentityRepository for FakeStore {
    async fn upsert_by_provider_ref(
        &self,
        org_id: Uuid,
        profile: &ExternalProfile,
    ) -> TetherResult<ExternalIdentity> {
        let mut state = self.lock();
        let now = Utc::now();

        let existing = state.identities.iter().position(|i| {
            i.org_id == org_id
                && i.provider == profile.provider
                && i.provider_user_id == profile.provider_user_id
        });
        if let Some(idx) = existing {
            let identity = &mut state.identities[idx];
            identity.provider_team_id = profile.provider_team_id.clone();
            identity.email = profile.email.clone();
            identity.display_name = profile.display_name.clone();
            identity.real_name = profile.real_name.clone();
            identity.avatar_url = profile.avatar_url.clone();
            identity.metadata = profile.metadata.clone();
            identity.sync_error = None;
            identity.last_synced_at = now;
            identity.updated_at = now;
            return Ok(identity.clone());
        }

        let identity = ExternalIdentity {
            id: Uuid::new_v4(),
            org_id,
            provider: profile.provider,
            provider_user_id: profile.provider_user_id.clone(),
            provider_team_id: profile.provider_team_id.clone(),
            user_id: None,
            email: profile.email.clone(),
            display_name: profile.display_name.clone(),
            real_name: profile.real_name.clone(),
            avatar_url: profile.avatar_url.clone(),
            metadata: profile.metadata.clone(),
            link_status: LinkStatus::Unlinked,
            link_method: None,
            link_confidence: None,
            linked_at: None,
            linked_by: None,
            last_synced_at: now,
            sync_error: None,
            created_at: now,
            updated_at: now,
        };
        state.identities.push(identity.clone());
        Ok(identity)
    }

    async fn get(&self, org_id: Uuid, id: Uuid) -> TetherResult<Option<ExternalIdentity>> {
        Ok(self
            .lock()
            .identities
            .iter()
            .find(|i| i.org_id == org_id && i.id == id)
            .cloned())
    }

    async fn list_for_user(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> TetherResult<Vec<ExternalIdentity>> {
        Ok(self
            .lock()
            .identities
            .iter()
            .filter(|i| i.org_id == org_id && i.user_id == Some(user_id))
            .cloned()
            .collect())
    }

    async fn list_unresolved(
        &self,
        org_id: Uuid,
        filter: UnresolvedIdentityFilter,
    ) -> TetherResult<Vec<ExternalIdentity>> {
        let state = self.lock();
        let mut rows: Vec<ExternalIdentity> = state
            .identities
            .iter()
            .filter(|i| i.org_id == org_id && i.link_status != LinkStatus::Linked)
            .filter(|i| filter.status.map_or(true, |s| i.link_status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.unwrap_or(50).max(0) as usize;
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn mark_suggested(&self, org_id: Uuid, id: Uuid) -> TetherResult<()> {
        let mut state = self.lock();
        let idx = find_identity_idx(&state, org_id, id)?;
        if state.identities[idx].link_status == LinkStatus::Linked {
            return Err(TetherError::InvalidState(format!(
                "identity {id} is linked; cannot mark suggested"
            )));
        }
        state.identities[idx].link_status = LinkStatus::Suggested;
        state.identities[idx].updated_at = Utc::now();
        Ok(())
    }

    async fn link(
        &self,
        org_id: Uuid,
        id: Uuid,
        user_id: Uuid,
        method: LinkMethod,
        confidence: f64,
        actor: &str,
        reason: Option<&str>,
    ) -> TetherResult<ExternalIdentity> {
        let mut state = self.lock();
        let idx = find_identity_idx(&state, org_id, id)?;
        if state.identities[idx].link_status == LinkStatus::Linked {
            return Err(TetherError::InvalidState(format!(
                "identity {id} is already linked"
            )));
        }
        ensure_member(&state, org_id, user_id)?;

        let now = Utc::now();
        apply_link_state(&mut state, idx, user_id, method, confidence, actor, now);
        push_audit(
            &mut state,
            org_id,
            id,
            None,
            AuditAction::Linked,
            None,
            Some(user_id),
            Some(method.as_str().to_string()),
            Some(round2(confidence)),
            actor,
            reason,
        );
        Ok(state.identities[idx].clone())
    }

    async fn unlink(
        &self,
        org_id: Uuid,
        id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> TetherResult<ExternalIdentity> {
        let mut state = self.lock();
        let idx = find_identity_idx(&state, org_id, id)?;
        if state.identities[idx].link_status != LinkStatus::Linked {
            return Err(TetherError::InvalidState(format!(
                "identity {id} is not linked"
            )));
        }

        let previous_user = state.identities[idx].user_id;
        let previous_method = state.identities[idx].link_method;
        let previous_confidence = state.identities[idx].link_confidence;
        let now = Utc::now();
        {
            let identity = &mut state.identities[idx];
            identity.user_id = None;
            identity.link_status = LinkStatus::Unlinked;
            identity.link_method = None;
            identity.link_confidence = None;
            identity.linked_at = None;
            identity.linked_by = None;
            identity.updated_at = now;
        }
        push_audit(
            &mut state,
            org_id,
            id,
            None,
            AuditAction::Unlinked,
            previous_user,
            None,
            previous_method.map(|m| m.as_str().to_string()),
            previous_confidence,
            actor,
            reason,
        );
        Ok(state.identities[idx].clone())
    }

    async fn relink(
        &self,
        org_id: Uuid,
        id: Uuid,
        new_user_id: Uuid,
        actor: &str,
        reason: &str,
    ) -> TetherResult<ExternalIdentity> {
        let mut state = self.lock();
        let idx = find_identity_idx(&state, org_id, id)?;
        if state.identities[idx].link_status != LinkStatus::Linked {
            return Err(TetherError::InvalidState(format!(
                "identity {id} is not linked; use link instead of relink"
            )));
        }
        ensure_member(&state, org_id, new_user_id)?;

        let previous_user = state.identities[idx].user_id;
        let previous_method = state.identities[idx].link_method;
        let previous_confidence = state.identities[idx].link_confidence;
        let now = Utc::now();

        push_audit(
            &mut state,
            org_id,
            id,
            None,
            AuditAction::Unlinked,
            previous_user,
            None,
            previous_method.map(|m| m.as_str().to_string()),
            previous_confidence,
            actor,
            Some(reason),
        );
        apply_link_state(&mut state, idx, new_user_id, LinkMethod::Admin, 1.0, actor, now);
        push_audit(
            &mut state,
            org_id,
            id,
            None,
            AuditAction::Linked,
            previous_user,
            Some(new_user_id),
            Some(LinkMethod::Admin.as_str().to_string()),
            Some(1.0),
            actor,
            Some(reason),
        );
        Ok(state.identities[idx].clone())
    }
}

#[async_trait]
impl LinkSuggestionRepository for FakeStore {
    async fn upsert_batch(
        &self,
        org_id: Uuid,
        external_identity_id: Uuid,
        seeds: &[SuggestionSeed],
        expires_at: DateTime<Utc>,
        actor: &str,
    ) -> TetherResult<Vec<LinkSuggestion>> {
        let mut state = self.lock();
        let now = Utc::now();
        let mut written = Vec::new();

        for seed in seeds {
            let existing = state.suggestions.iter().position(|s| {
                s.external_identity_id == external_identity_id
                    && s.suggested_user_id == seed.user_id
            });
            match existing {
                Some(idx) => {
                    let suggestion = &mut state.suggestions[idx];
                    if matches!(
                        suggestion.status,
                        SuggestionStatus::Accepted | SuggestionStatus::Rejected
                    ) {
                        continue;
                    }
                    suggestion.method = seed.method.clone();
                    suggestion.confidence = round2(seed.confidence);
                    suggestion.details = seed.details.clone();
                    suggestion.status = SuggestionStatus::Pending;
                    suggestion.reviewed_by = None;
                    suggestion.reviewed_at = None;
                    suggestion.rejection_reason = None;
                    suggestion.expires_at = expires_at;
                    suggestion.updated_at = now;
                    written.push(suggestion.clone());
                }
                None => {
                    let suggestion = LinkSuggestion {
                        id: Uuid::new_v4(),
                        org_id,
                        external_identity_id,
                        suggested_user_id: seed.user_id,
                        method: seed.method.clone(),
                        confidence: round2(seed.confidence),
                        details: seed.details.clone(),
                        status: SuggestionStatus::Pending,
                        reviewed_by: None,
                        reviewed_at: None,
                        rejection_reason: None,
                        expires_at,
                        created_at: now,
                        updated_at: now,
                    };
                    state.suggestions.push(suggestion.clone());
                    written.push(suggestion);
                }
            }
        }

        if !written.is_empty() {
            let top = written.iter().map(|s| s.confidence).fold(0.0_f64, f64::max);
            push_audit(
                &mut state,
                org_id,
                external_identity_id,
                None,
                AuditAction::SuggestionCreated,
                None,
                None,
                None,
                Some(top),
                actor,
                None,
            );
        }
        Ok(written)
    }

    async fn get(&self, org_id: Uuid, id: Uuid) -> TetherResult<Option<LinkSuggestion>> {
        Ok(self
            .lock()
            .suggestions
            .iter()
            .find(|s| s.org_id == org_id && s.id == id)
            .cloned())
    }

    async fn reject(
        &self,
        org_id: Uuid,
        id: Uuid,
        reviewer: &str,
        reason: Option<&str>,
    ) -> TetherResult<LinkSuggestion> {
        let mut state = self.lock();
        let now = Utc::now();

        let (identity_id, user_id, method, confidence) = {
            let suggestion = state
                .suggestions
                .iter_mut()
                .find(|s| s.org_id == org_id && s.id == id)
                .ok_or_else(|| TetherError::NotFound(format!("suggestion {id}")))?;

            if suggestion.status != SuggestionStatus::Pending {
                return Err(TetherError::InvalidState(format!(
                    "suggestion {id} is {}, not pending",
                    suggestion.status.as_str()
                )));
            }

            suggestion.status = SuggestionStatus::Rejected;
            suggestion.reviewed_by = Some(reviewer.to_string());
            suggestion.reviewed_at = Some(now);
            suggestion.rejection_reason = reason.map(|s| s.to_string());
            suggestion.updated_at = now;
            (
                suggestion.external_identity_id,
                suggestion.suggested_user_id,
                suggestion.method.clone(),
                suggestion.confidence,
            )
        };

        push_audit(
            &mut state,
            org_id,
            identity_id,
            Some(id),
            AuditAction::Rejected,
            None,
            Some(user_id),
            Some(method),
            Some(confidence),
            reviewer,
            reason,
        );

        Ok(state
            .suggestions
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .expect("just updated"))
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> TetherResult<u64> {
        let mut state = self.lock();
        let mut expired = Vec::new();

        for suggestion in state
            .suggestions
            .iter_mut()
            .filter(|s| s.status == SuggestionStatus::Pending && s.expires_at <= now)
        {
            suggestion.status = SuggestionStatus::Expired;
            suggestion.updated_at = now;
            expired.push((
                suggestion.org_id,
                suggestion.external_identity_id,
                suggestion.id,
                suggestion.method.clone(),
                suggestion.confidence,
            ));
        }

        for (org_id, identity_id, suggestion_id, method, confidence) in &expired {
            push_audit(
                &mut state,
                *org_id,
                *identity_id,
                Some(*suggestion_id),
                AuditAction::SuggestionExpired,
                None,
                None,
                Some(method.clone()),
                Some(*confidence),
                "system",
                None,
            );
        }

        let still_pending: std::collections::HashSet<Uuid> = state
            .suggestions
            .iter()
            .filter(|s| s.status == SuggestionStatus::Pending)
            .map(|s| s.external_identity_id)
            .collect();
        for identity in state
            .identities
            .iter_mut()
            .filter(|i| i.link_status == LinkStatus::Suggested)
        {
            if !still_pending.contains(&identity.id) {
                identity.link_status = LinkStatus::Unlinked;
                identity.updated_at = now;
            }
        }

        Ok(expired.len() as u64)
    }

    async fn list_pending_for_org(
        &self,
        org_id: Uuid,
        filter: PendingSuggestionFilter,
    ) -> TetherResult<Vec<LinkSuggestion>> {
        let state = self.lock();
        let mut rows: Vec<LinkSuggestion> = state
            .suggestions
            .iter()
            .filter(|s| s.org_id == org_id && s.status == SuggestionStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.unwrap_or(50).max(0) as usize;
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_pending_for_user(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> TetherResult<Vec<LinkSuggestion>> {
        Ok(self
            .lock()
            .suggestions
            .iter()
            .filter(|s| {
                s.org_id == org_id
                    && s.suggested_user_id == user_id
                    && s.status == SuggestionStatus::Pending
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LinkAuditRepository for FakeStore {
    async fn list_for_identity(
        &self,
        org_id: Uuid,
        external_identity_id: Uuid,
    ) -> TetherResult<Vec<LinkAudit>> {
        Ok(self
            .lock()
            .audits
            .iter()
            .filter(|a| a.org_id == org_id && a.external_identity_id == external_identity_id)
            .cloned()
            .collect())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> TetherResult<u64> {
        let mut state = self.lock();
        let before = state.audits.len();
        state.audits.retain(|a| a.created_at >= cutoff);
        Ok((before - state.audits.len()) as u64)
    }
}

#[async_trait]
impl OrgMemberRepository for FakeStore {
    async fn list_active(&self, org_id: Uuid) -> TetherResult<Vec<OrgMember>> {
        let mut members: Vec<OrgMember> = self
            .lock()
            .members
            .iter()
            .filter(|m| m.org_id == org_id && m.status == "active")
            .cloned()
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(members)
    }

    async fn find_by_email(&self, org_id: Uuid, email: &str) -> TetherResult<Vec<OrgMember>> {
        let needle = email.trim().to_lowercase();
        Ok(self
            .lock()
            .members
            .iter()
            .filter(|m| {
                m.org_id == org_id
                    && m.status == "active"
                    && m.email
                        .as_deref()
                        .is_some_and(|e| e.trim().to_lowercase() == needle)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IdentitySettingsRepository for FakeStore {
    async fn get(&self, org_id: Uuid) -> TetherResult<Option<IdentitySettings>> {
        Ok(self.lock().settings.get(&org_id).cloned())
    }
}

pub struct TestEnv {
    pub store: Arc<FakeStore>,
    pub service: LinkingService,
    pub org: Uuid,
}

pub fn test_env() -> TestEnv {
    let store = Arc::new(FakeStore::default());
    let service = LinkingService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    );
    TestEnv {
        store,
        service,
        org: Uuid::new_v4(),
    }
}

pub fn slack_profile(
    provider_user_id: &str,
    email: Option<&str>,
    display_name: Option<&str>,
) -> ExternalProfile {
    ExternalProfile {
        provider: Provider::Slack,
        provider_user_id: provider_user_id.to_string(),
        provider_team_id: Some("T001".to_string()),
        email: email.map(|s| s.to_string()),
        display_name: display_name.map(|s| s.to_string()),
        real_name: None,
        avatar_url: None,
        metadata: serde_json::json!({}),
    }
}

pub fn settings_with_thresholds(org: Uuid, auto: f64, suggest: f64) -> IdentitySettings {
    IdentitySettings {
        auto_link_threshold: auto,
        suggestion_threshold: suggest,
        ..IdentitySettings::defaults_for(org)
    }
}
