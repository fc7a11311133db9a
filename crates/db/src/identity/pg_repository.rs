use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use crate::identity::models::{
    round2, AuditAction, ExternalIdentity, ExternalProfile, IdentitySettings, LinkAudit,
    LinkMethod, LinkStatus, LinkSuggestion, OrgMember, PendingSuggestionFilter, Provider,
    SuggestionSeed, SuggestionStatus, UnresolvedIdentityFilter,
};
use crate::identity::repositories::{
    ExternalIdentityRepository, IdentitySettingsRepository, LinkAuditRepository,
    LinkSuggestionRepository, OrgMemberRepository,
};
use tether_common::error::{TetherError, TetherResult};

const IDENTITY_COLS: &str = "id, org_id, provider, provider_user_id, provider_team_id, user_id, \
     email, display_name, real_name, avatar_url, metadata, link_status, link_method, \
     link_confidence::float8 as link_confidence, linked_at, linked_by, last_synced_at, \
     sync_error, created_at, updated_at";

const SUGGESTION_COLS: &str = "id, org_id, external_identity_id, suggested_user_id, method, \
     confidence::float8 as confidence, details, status, reviewed_by, reviewed_at, \
     rejection_reason, expires_at, created_at, updated_at";

const AUDIT_COLS: &str = "id, org_id, external_identity_id, suggestion_id, action, \
     previous_user_id, new_user_id, method, confidence::float8 as confidence, actor, reason, \
     metadata, created_at";

fn db_err(e: sqlx::Error) -> TetherError {
    TetherError::Database(e.to_string())
}

fn map_identity_row(row: PgRow) -> TetherResult<ExternalIdentity> {
    let provider_raw: String = row.get("provider");
    let provider = Provider::from_str(&provider_raw).map_err(TetherError::Internal)?;
    let status_raw: String = row.get("link_status");
    let link_status = LinkStatus::from_str(&status_raw).map_err(TetherError::Internal)?;
    let method_raw: Option<String> = row.get("link_method");
    let link_method = method_raw
        .as_deref()
        .map(LinkMethod::from_str)
        .transpose()
        .map_err(TetherError::Internal)?;

    Ok(ExternalIdentity {
        id: row.get("id"),
        org_id: row.get("org_id"),
        provider,
        provider_user_id: row.get("provider_user_id"),
        provider_team_id: row.get("provider_team_id"),
        user_id: row.get("user_id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        real_name: row.get("real_name"),
        avatar_url: row.get("avatar_url"),
        metadata: row.get("metadata"),
        link_status,
        link_method,
        link_confidence: row.get("link_confidence"),
        linked_at: row.get("linked_at"),
        linked_by: row.get("linked_by"),
        last_synced_at: row.get("last_synced_at"),
        sync_error: row.get("sync_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_suggestion_row(row: PgRow) -> TetherResult<LinkSuggestion> {
    let status_raw: String = row.get("status");
    let status = SuggestionStatus::from_str(&status_raw).map_err(TetherError::Internal)?;

    Ok(LinkSuggestion {
        id: row.get("id"),
        org_id: row.get("org_id"),
        external_identity_id: row.get("external_identity_id"),
        suggested_user_id: row.get("suggested_user_id"),
        method: row.get("method"),
        confidence: row.get("confidence"),
        details: row.get("details"),
        status,
        reviewed_by: row.get("reviewed_by"),
        reviewed_at: row.get("reviewed_at"),
        rejection_reason: row.get("rejection_reason"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_audit_row(row: PgRow) -> TetherResult<LinkAudit> {
    let action_raw: String = row.get("action");
    let action = AuditAction::from_str(&action_raw).map_err(TetherError::Internal)?;

    Ok(LinkAudit {
        id: row.get("id"),
        org_id: row.get("org_id"),
        external_identity_id: row.get("external_identity_id"),
        suggestion_id: row.get("suggestion_id"),
        action,
        previous_user_id: row.get("previous_user_id"),
        new_user_id: row.get("new_user_id"),
        method: row.get("method"),
        confidence: row.get("confidence"),
        actor: row.get("actor"),
        reason: row.get("reason"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
    })
}

struct AuditEntry<'a> {
    org_id: Uuid,
    external_identity_id: Uuid,
    suggestion_id: Option<Uuid>,
    action: AuditAction,
    previous_user_id: Option<Uuid>,
    new_user_id: Option<Uuid>,
    method: Option<&'a str>,
    confidence: Option<f64>,
    actor: &'a str,
    reason: Option<&'a str>,
    metadata: serde_json::Value,
}

async fn append_audit(
    tx: &mut Transaction<'_, Postgres>,
    entry: AuditEntry<'_>,
) -> TetherResult<()> {
    sqlx::query(
        "insert into link_audits (id, org_id, external_identity_id, suggestion_id, action, \
         previous_user_id, new_user_id, method, confidence, actor, reason, metadata, created_at) \
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(Uuid::new_v4())
    .bind(entry.org_id)
    .bind(entry.external_identity_id)
    .bind(entry.suggestion_id)
    .bind(entry.action.as_str())
    .bind(entry.previous_user_id)
    .bind(entry.new_user_id)
    .bind(entry.method)
    .bind(entry.confidence)
    .bind(entry.actor)
    .bind(entry.reason)
    .bind(entry.metadata)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;

    Ok(())
}

async fn fetch_identity_for_update(
    tx: &mut Transaction<'_, Postgres>,
    org_id: Uuid,
    id: Uuid,
) -> TetherResult<ExternalIdentity> {
    let row = sqlx::query(&format!(
        "select {IDENTITY_COLS} from external_identities where org_id = $1 and id = $2 for update",
    ))
    .bind(org_id)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_err)?;

    match row {
        Some(row) => map_identity_row(row),
        None => Err(TetherError::NotFound(format!("external identity {id}"))),
    }
}

async fn ensure_member_exists(
    tx: &mut Transaction<'_, Postgres>,
    org_id: Uuid,
    user_id: Uuid,
) -> TetherResult<()> {
    let exists = sqlx::query_scalar::<_, bool>(
        "select exists(select 1 from users where org_id = $1 and id = $2 and status = 'active')",
    )
    .bind(org_id)
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(db_err)?;

    if !exists {
        return Err(TetherError::NotFound(format!(
            "user {user_id} in organization {org_id}"
        )));
    }
    Ok(())
}

/// Set the link fields and resolve pending suggestions: the linked user's
/// becomes accepted, every other pending row is rejected as superseded.
async fn apply_link(
    tx: &mut Transaction<'_, Postgres>,
    org_id: Uuid,
    id: Uuid,
    user_id: Uuid,
    method: LinkMethod,
    confidence: f64,
    actor: &str,
    now: DateTime<Utc>,
) -> TetherResult<()> {
    sqlx::query(
        "update external_identities \
         set user_id = $1, link_status = 'linked', link_method = $2, link_confidence = $3, \
             linked_at = $4, linked_by = $5, updated_at = $4 \
         where org_id = $6 and id = $7",
    )
    .bind(user_id)
    .bind(method.as_str())
    .bind(round2(confidence))
    .bind(now)
    .bind(actor)
    .bind(org_id)
    .bind(id)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;

    sqlx::query(
        "update link_suggestions \
         set status = 'accepted', reviewed_by = $1, reviewed_at = $2, updated_at = $2 \
         where external_identity_id = $3 and suggested_user_id = $4 and status = 'pending'",
    )
    .bind(actor)
    .bind(now)
    .bind(id)
    .bind(user_id)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;

    sqlx::query(
        "update link_suggestions \
         set status = 'rejected', reviewed_by = $1, reviewed_at = $2, \
             rejection_reason = 'superseded: identity linked to another user', updated_at = $2 \
         where external_identity_id = $3 and suggested_user_id <> $4 and status = 'pending'",
    )
    .bind(actor)
    .bind(now)
    .bind(id)
    .bind(user_id)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;

    Ok(())
}

pub struct PgExternalIdentityRepository {
    pool: PgPool,
}

impl PgExternalIdentityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExternalIdentityRepository for PgExternalIdentityRepository {
    async fn upsert_by_provider_ref(
        &self,
        org_id: Uuid,
        profile: &ExternalProfile,
    ) -> TetherResult<ExternalIdentity> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "insert into external_identities \
             (id, org_id, provider, provider_user_id, provider_team_id, email, display_name, \
              real_name, avatar_url, metadata, link_status, last_synced_at, created_at, updated_at) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'unlinked', $11, $11, $11) \
             on conflict (org_id, provider, provider_user_id) do update \
             set provider_team_id = excluded.provider_team_id, \
                 email = excluded.email, \
                 display_name = excluded.display_name, \
                 real_name = excluded.real_name, \
                 avatar_url = excluded.avatar_url, \
                 metadata = excluded.metadata, \
                 sync_error = null, \
                 last_synced_at = excluded.last_synced_at, \
                 updated_at = excluded.updated_at \
             returning {IDENTITY_COLS}",
        ))
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(profile.provider.as_str())
        .bind(&profile.provider_user_id)
        .bind(&profile.provider_team_id)
        .bind(&profile.email)
        .bind(&profile.display_name)
        .bind(&profile.real_name)
        .bind(&profile.avatar_url)
        .bind(&profile.metadata)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        map_identity_row(row)
    }

    async fn get(&self, org_id: Uuid, id: Uuid) -> TetherResult<Option<ExternalIdentity>> {
        let row = sqlx::query(&format!(
            "select {IDENTITY_COLS} from external_identities where org_id = $1 and id = $2",
        ))
        .bind(org_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(map_identity_row).transpose()
    }

    async fn list_for_user(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> TetherResult<Vec<ExternalIdentity>> {
        let rows = sqlx::query(&format!(
            "select {IDENTITY_COLS} from external_identities \
             where org_id = $1 and user_id = $2 order by provider, provider_user_id",
        ))
        .bind(org_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(map_identity_row).collect()
    }

    async fn list_unresolved(
        &self,
        org_id: Uuid,
        filter: UnresolvedIdentityFilter,
    ) -> TetherResult<Vec<ExternalIdentity>> {
        let mut qb = QueryBuilder::new(format!(
            "select {IDENTITY_COLS} from external_identities \
             where link_status in ('unlinked', 'suggested') and org_id = ",
        ));
        qb.push_bind(org_id);

        if let Some(status) = filter.status {
            qb.push(" and link_status = ").push_bind(status.as_str());
        }

        qb.push(" order by created_at desc, id");
        qb.push(" limit ").push_bind(filter.limit.unwrap_or(50));
        qb.push(" offset ").push_bind(filter.offset.unwrap_or(0));

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;

        rows.into_iter().map(map_identity_row).collect()
    }

    async fn mark_suggested(&self, org_id: Uuid, id: Uuid) -> TetherResult<()> {
        let result = sqlx::query(
            "update external_identities set link_status = 'suggested', updated_at = $1 \
             where org_id = $2 and id = $3 and link_status <> 'linked'",
        )
        .bind(Utc::now())
        .bind(org_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, bool>(
                "select exists(select 1 from external_identities where org_id = $1 and id = $2)",
            )
            .bind(org_id)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

            return if exists {
                Err(TetherError::InvalidState(format!(
                    "identity {id} is linked; cannot mark suggested"
                )))
            } else {
                Err(TetherError::NotFound(format!("external identity {id}")))
            };
        }
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
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let identity = fetch_identity_for_update(&mut tx, org_id, id).await?;
        if identity.link_status == LinkStatus::Linked {
            return Err(TetherError::InvalidState(format!(
                "identity {id} is already linked"
            )));
        }
        ensure_member_exists(&mut tx, org_id, user_id).await?;

        let now = Utc::now();
        apply_link(&mut tx, org_id, id, user_id, method, confidence, actor, now).await?;

        append_audit(
            &mut tx,
            AuditEntry {
                org_id,
                external_identity_id: id,
                suggestion_id: None,
                action: AuditAction::Linked,
                previous_user_id: None,
                new_user_id: Some(user_id),
                method: Some(method.as_str()),
                confidence: Some(round2(confidence)),
                actor,
                reason,
                metadata: serde_json::json!({}),
            },
        )
        .await?;

        tx.commit().await.map_err(db_err)?;

        self.get(org_id, id).await?.ok_or_else(|| {
            TetherError::Internal(format!("identity {id} vanished after link"))
        })
    }

    async fn unlink(
        &self,
        org_id: Uuid,
        id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> TetherResult<ExternalIdentity> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let identity = fetch_identity_for_update(&mut tx, org_id, id).await?;
        if identity.link_status != LinkStatus::Linked {
            return Err(TetherError::InvalidState(format!(
                "identity {id} is not linked"
            )));
        }

        let now = Utc::now();
        sqlx::query(
            "update external_identities \
             set user_id = null, link_status = 'unlinked', link_method = null, \
                 link_confidence = null, linked_at = null, linked_by = null, updated_at = $1 \
             where org_id = $2 and id = $3",
        )
        .bind(now)
        .bind(org_id)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        append_audit(
            &mut tx,
            AuditEntry {
                org_id,
                external_identity_id: id,
                suggestion_id: None,
                action: AuditAction::Unlinked,
                previous_user_id: identity.user_id,
                new_user_id: None,
                method: identity.link_method.map(|m| m.as_str()),
                confidence: identity.link_confidence,
                actor,
                reason,
                metadata: serde_json::json!({}),
            },
        )
        .await?;

        tx.commit().await.map_err(db_err)?;

        self.get(org_id, id).await?.ok_or_else(|| {
            TetherError::Internal(format!("identity {id} vanished after unlink"))
        })
    }

    async fn relink(
        &self,
        org_id: Uuid,
        id: Uuid,
        new_user_id: Uuid,
        actor: &str,
        reason: &str,
    ) -> TetherResult<ExternalIdentity> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let identity = fetch_identity_for_update(&mut tx, org_id, id).await?;
        if identity.link_status != LinkStatus::Linked {
            return Err(TetherError::InvalidState(format!(
                "identity {id} is not linked; use link instead of relink"
            )));
        }
        ensure_member_exists(&mut tx, org_id, new_user_id).await?;

        let now = Utc::now();
        append_audit(
            &mut tx,
            AuditEntry {
                org_id,
                external_identity_id: id,
                suggestion_id: None,
                action: AuditAction::Unlinked,
                previous_user_id: identity.user_id,
                new_user_id: None,
                method: identity.link_method.map(|m| m.as_str()),
                confidence: identity.link_confidence,
                actor,
                reason: Some(reason),
                metadata: serde_json::json!({}),
            },
        )
        .await?;

        apply_link(
            &mut tx,
            org_id,
            id,
            new_user_id,
            LinkMethod::Admin,
            1.0,
            actor,
            now,
        )
        .await?;

        append_audit(
            &mut tx,
            AuditEntry {
                org_id,
                external_identity_id: id,
                suggestion_id: None,
                action: AuditAction::Linked,
                previous_user_id: identity.user_id,
                new_user_id: Some(new_user_id),
                method: Some(LinkMethod::Admin.as_str()),
                confidence: Some(1.0),
                actor,
                reason: Some(reason),
                metadata: serde_json::json!({}),
            },
        )
        .await?;

        tx.commit().await.map_err(db_err)?;

        self.get(org_id, id).await?.ok_or_else(|| {
            TetherError::Internal(format!("identity {id} vanished after relink"))
        })
    }
}

pub struct PgLinkSuggestionRepository {
    pool: PgPool,
}

impl PgLinkSuggestionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LinkSuggestionRepository for PgLinkSuggestionRepository {
    async fn upsert_batch(
        &self,
        org_id: Uuid,
        external_identity_id: Uuid,
        seeds: &[SuggestionSeed],
        expires_at: DateTime<Utc>,
        actor: &str,
    ) -> TetherResult<Vec<LinkSuggestion>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let now = Utc::now();
        let mut written = Vec::with_capacity(seeds.len());

        for seed in seeds {
            let row = sqlx::query(&format!(
                "insert into link_suggestions \
                 (id, org_id, external_identity_id, suggested_user_id, method, confidence, \
                  details, status, expires_at, created_at, updated_at) \
                 values ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $9) \
                 on conflict (external_identity_id, suggested_user_id) do update \
                 set method = excluded.method, \
                     confidence = excluded.confidence, \
                     details = excluded.details, \
                     status = 'pending', \
                     reviewed_by = null, \
                     reviewed_at = null, \
                     rejection_reason = null, \
                     expires_at = excluded.expires_at, \
                     updated_at = excluded.updated_at \
                 where link_suggestions.status in ('pending', 'expired') \
                 returning {SUGGESTION_COLS}",
            ))
            .bind(Uuid::new_v4())
            .bind(org_id)
            .bind(external_identity_id)
            .bind(seed.user_id)
            .bind(&seed.method)
            .bind(round2(seed.confidence))
            .bind(&seed.details)
            .bind(expires_at)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

            // None means the slot is held by an accepted or rejected row.
            if let Some(row) = row {
                written.push(map_suggestion_row(row)?);
            }
        }

        if !written.is_empty() {
            let top = written.iter().map(|s| s.confidence).fold(0.0_f64, f64::max);
            append_audit(
                &mut tx,
                AuditEntry {
                    org_id,
                    external_identity_id,
                    suggestion_id: None,
                    action: AuditAction::SuggestionCreated,
                    previous_user_id: None,
                    new_user_id: None,
                    method: None,
                    confidence: Some(top),
                    actor,
                    reason: None,
                    metadata: serde_json::json!({
                        "count": written.len(),
                        "top_confidence": top,
                    }),
                },
            )
            .await?;
        }

        tx.commit().await.map_err(db_err)?;

        Ok(written)
    }

    async fn get(&self, org_id: Uuid, id: Uuid) -> TetherResult<Option<LinkSuggestion>> {
        let row = sqlx::query(&format!(
            "select {SUGGESTION_COLS} from link_suggestions where org_id = $1 and id = $2",
        ))
        .bind(org_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(map_suggestion_row).transpose()
    }

    async fn reject(
        &self,
        org_id: Uuid,
        id: Uuid,
        reviewer: &str,
        reason: Option<&str>,
    ) -> TetherResult<LinkSuggestion> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(&format!(
            "select {SUGGESTION_COLS} from link_suggestions \
             where org_id = $1 and id = $2 for update",
        ))
        .bind(org_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let suggestion = match row {
            Some(row) => map_suggestion_row(row)?,
            None => return Err(TetherError::NotFound(format!("suggestion {id}"))),
        };
        if suggestion.status != SuggestionStatus::Pending {
            return Err(TetherError::InvalidState(format!(
                "suggestion {id} is {}, not pending",
                suggestion.status.as_str()
            )));
        }

        let now = Utc::now();
        sqlx::query(
            "update link_suggestions \
             set status = 'rejected', reviewed_by = $1, reviewed_at = $2, \
                 rejection_reason = $3, updated_at = $2 \
             where org_id = $4 and id = $5",
        )
        .bind(reviewer)
        .bind(now)
        .bind(reason)
        .bind(org_id)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        append_audit(
            &mut tx,
            AuditEntry {
                org_id,
                external_identity_id: suggestion.external_identity_id,
                suggestion_id: Some(id),
                action: AuditAction::Rejected,
                previous_user_id: None,
                new_user_id: Some(suggestion.suggested_user_id),
                method: Some(&suggestion.method),
                confidence: Some(suggestion.confidence),
                actor: reviewer,
                reason,
                metadata: serde_json::json!({}),
            },
        )
        .await?;

        tx.commit().await.map_err(db_err)?;

        self.get(org_id, id).await?.ok_or_else(|| {
            TetherError::Internal(format!("suggestion {id} vanished after reject"))
        })
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> TetherResult<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let rows = sqlx::query(
            "update link_suggestions \
             set status = 'expired', updated_at = $1 \
             where status = 'pending' and expires_at <= $1 \
             returning id, org_id, external_identity_id, method, \
                       confidence::float8 as confidence",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        for row in &rows {
            let method: String = row.get("method");
            append_audit(
                &mut tx,
                AuditEntry {
                    org_id: row.get("org_id"),
                    external_identity_id: row.get("external_identity_id"),
                    suggestion_id: Some(row.get("id")),
                    action: AuditAction::SuggestionExpired,
                    previous_user_id: None,
                    new_user_id: None,
                    method: Some(&method),
                    confidence: Some(row.get("confidence")),
                    actor: "system",
                    reason: None,
                    metadata: serde_json::json!({}),
                },
            )
            .await?;
        }

        // Identities whose last pending suggestion just expired go back to
        // unlinked so the unresolved queries stay truthful.
        sqlx::query(
            "update external_identities ei \
             set link_status = 'unlinked', updated_at = $1 \
             where ei.link_status = 'suggested' \
               and not exists (select 1 from link_suggestions ls \
                               where ls.external_identity_id = ei.id \
                                 and ls.status = 'pending')",
        )
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(rows.len() as u64)
    }

    async fn list_pending_for_org(
        &self,
        org_id: Uuid,
        filter: PendingSuggestionFilter,
    ) -> TetherResult<Vec<LinkSuggestion>> {
        let mut qb = QueryBuilder::new(format!(
            "select {SUGGESTION_COLS} from link_suggestions \
             where status = 'pending' and org_id = ",
        ));
        qb.push_bind(org_id);
        qb.push(" order by confidence desc, created_at desc, id");
        qb.push(" limit ").push_bind(filter.limit.unwrap_or(50));
        qb.push(" offset ").push_bind(filter.offset.unwrap_or(0));

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;

        rows.into_iter().map(map_suggestion_row).collect()
    }

    async fn list_pending_for_user(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> TetherResult<Vec<LinkSuggestion>> {
        let rows = sqlx::query(&format!(
            "select {SUGGESTION_COLS} from link_suggestions \
             where org_id = $1 and suggested_user_id = $2 and status = 'pending' \
             order by confidence desc, created_at desc, id",
        ))
        .bind(org_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(map_suggestion_row).collect()
    }
}

pub struct PgLinkAuditRepository {
    pool: PgPool,
}

impl PgLinkAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LinkAuditRepository for PgLinkAuditRepository {
    async fn list_for_identity(
        &self,
        org_id: Uuid,
        external_identity_id: Uuid,
    ) -> TetherResult<Vec<LinkAudit>> {
        let rows = sqlx::query(&format!(
            "select {AUDIT_COLS} from link_audits \
             where org_id = $1 and external_identity_id = $2 order by created_at, id",
        ))
        .bind(org_id)
        .bind(external_identity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(map_audit_row).collect()
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> TetherResult<u64> {
        let result = sqlx::query("delete from link_audits where created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}

pub struct PgOrgMemberRepository {
    pool: PgPool,
}

impl PgOrgMemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_member_row(row: PgRow) -> OrgMember {
        OrgMember {
            id: row.get("id"),
            org_id: row.get("org_id"),
            email: row.get("email"),
            display_name: row.get("display_name"),
            status: row.get("status"),
        }
    }
}

#[async_trait]
impl OrgMemberRepository for PgOrgMemberRepository {
    async fn list_active(&self, org_id: Uuid) -> TetherResult<Vec<OrgMember>> {
        let rows = sqlx::query(
            "select id, org_id, email, display_name, status from users \
             where org_id = $1 and status = 'active' order by id",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Self::map_member_row).collect())
    }

    async fn find_by_email(&self, org_id: Uuid, email: &str) -> TetherResult<Vec<OrgMember>> {
        let rows = sqlx::query(
            "select id, org_id, email, display_name, status from users \
             where org_id = $1 and status = 'active' and lower(email) = lower($2) order by id",
        )
        .bind(org_id)
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Self::map_member_row).collect())
    }
}

pub struct PgIdentitySettingsRepository {
    pool: PgPool,
}

impl PgIdentitySettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentitySettingsRepository for PgIdentitySettingsRepository {
    async fn get(&self, org_id: Uuid) -> TetherResult<Option<IdentitySettings>> {
        let row = sqlx::query(
            "select org_id, email_auto_link_enabled, \
                    auto_link_threshold::float8 as auto_link_threshold, \
                    suggestion_threshold::float8 as suggestion_threshold, \
                    suggestion_expiry_days, allow_self_link, allow_self_unlink \
             from identity_settings where org_id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|row| IdentitySettings {
            org_id: row.get("org_id"),
            email_auto_link_enabled: row.get("email_auto_link_enabled"),
            auto_link_threshold: row.get("auto_link_threshold"),
            suggestion_threshold: row.get("suggestion_threshold"),
            suggestion_expiry_days: row.get::<i32, _>("suggestion_expiry_days") as i64,
            allow_self_link: row.get("allow_self_link"),
            allow_self_unlink: row.get("allow_self_unlink"),
        }))
    }
}
