use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::identity::models::{
    ExternalIdentity, ExternalProfile, IdentitySettings, LinkAudit, LinkMethod, LinkSuggestion,
    OrgMember, PendingSuggestionFilter, SuggestionSeed, UnresolvedIdentityFilter,
};
use tether_common::error::TetherResult;

#[async_trait]
pub trait ExternalIdentityRepository: Send + Sync {
    /// Insert or refresh an identity keyed by (org_id, provider, provider_user_id).
    /// On conflict, updates the synced profile fields and last_synced_at and
    /// clears sync_error, but never touches link state.
    async fn upsert_by_provider_ref(
        &self,
        org_id: Uuid,
        profile: &ExternalProfile,
    ) -> TetherResult<ExternalIdentity>;

    async fn get(&self, org_id: Uuid, id: Uuid) -> TetherResult<Option<ExternalIdentity>>;

    async fn list_for_user(&self, org_id: Uuid, user_id: Uuid)
        -> TetherResult<Vec<ExternalIdentity>>;

    /// Unlinked and suggested identities, paginated.
    async fn list_unresolved(
        &self,
        org_id: Uuid,
        filter: UnresolvedIdentityFilter,
    ) -> TetherResult<Vec<ExternalIdentity>>;

    /// Flag an identity as having open suggestions. No-op when already
    /// suggested; fails if the identity is linked.
    async fn mark_suggested(&self, org_id: Uuid, id: Uuid) -> TetherResult<()>;

    /// Transactional link: sets the link fields, resolves pending suggestions
    /// (the linked user's becomes accepted, rivals are rejected) and appends
    /// a `linked` audit row. Fails with InvalidState when already linked.
    async fn link(
        &self,
        org_id: Uuid,
        id: Uuid,
        user_id: Uuid,
        method: LinkMethod,
        confidence: f64,
        actor: &str,
        reason: Option<&str>,
    ) -> TetherResult<ExternalIdentity>;

    /// Transactional unlink: clears the link fields and appends an `unlinked`
    /// audit row. Fails with InvalidState when not linked.
    async fn unlink(
        &self,
        org_id: Uuid,
        id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> TetherResult<ExternalIdentity>;

    /// Unlink-then-link as one transaction, method `admin`, confidence 1.0,
    /// appending both audit rows. The caller validates the mandatory reason.
    async fn relink(
        &self,
        org_id: Uuid,
        id: Uuid,
        new_user_id: Uuid,
        actor: &str,
        reason: &str,
    ) -> TetherResult<ExternalIdentity>;
}

#[async_trait]
pub trait LinkSuggestionRepository: Send + Sync {
    /// Upsert one suggestion per seed, keyed by (external_identity_id,
    /// suggested_user_id). Pending and expired rows are refreshed back to
    /// pending with the new confidence/method/details/expiry; accepted and
    /// rejected rows are never touched. Appends one `suggestion_created`
    /// audit row summarizing the batch.
    async fn upsert_batch(
        &self,
        org_id: Uuid,
        external_identity_id: Uuid,
        seeds: &[SuggestionSeed],
        expires_at: DateTime<Utc>,
        actor: &str,
    ) -> TetherResult<Vec<LinkSuggestion>>;

    async fn get(&self, org_id: Uuid, id: Uuid) -> TetherResult<Option<LinkSuggestion>>;

    /// Reject a pending suggestion, recording reviewer and reason, with a
    /// `rejected` audit row. Fails with InvalidState when not pending.
    async fn reject(
        &self,
        org_id: Uuid,
        id: Uuid,
        reviewer: &str,
        reason: Option<&str>,
    ) -> TetherResult<LinkSuggestion>;

    /// Bulk-expire pending suggestions past their expiry, appending one
    /// `suggestion_expired` audit row each; identities left suggested with
    /// no remaining pending suggestions revert to unlinked. Returns the
    /// number of suggestions expired.
    async fn expire_due(&self, now: DateTime<Utc>) -> TetherResult<u64>;

    async fn list_pending_for_org(
        &self,
        org_id: Uuid,
        filter: PendingSuggestionFilter,
    ) -> TetherResult<Vec<LinkSuggestion>>;

    async fn list_pending_for_user(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> TetherResult<Vec<LinkSuggestion>>;
}

#[async_trait]
pub trait LinkAuditRepository: Send + Sync {
    async fn list_for_identity(
        &self,
        org_id: Uuid,
        external_identity_id: Uuid,
    ) -> TetherResult<Vec<LinkAudit>>;

    /// Retention prune; the only path that ever deletes audit rows.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> TetherResult<u64>;
}

#[async_trait]
pub trait OrgMemberRepository: Send + Sync {
    async fn list_active(&self, org_id: Uuid) -> TetherResult<Vec<OrgMember>>;

    /// Active members with the given email, case-insensitive.
    async fn find_by_email(&self, org_id: Uuid, email: &str) -> TetherResult<Vec<OrgMember>>;
}

#[async_trait]
pub trait IdentitySettingsRepository: Send + Sync {
    async fn get(&self, org_id: Uuid) -> TetherResult<Option<IdentitySettings>>;
}
