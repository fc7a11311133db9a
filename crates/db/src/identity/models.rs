use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tether_common::error::{TetherError, TetherResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Slack,
    Teams,
    GoogleWorkspace,
    Notion,
    Jira,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Teams => "teams",
            Self::GoogleWorkspace => "google_workspace",
            Self::Notion => "notion",
            Self::Jira => "jira",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "slack" => Ok(Self::Slack),
            "teams" => Ok(Self::Teams),
            "google_workspace" => Ok(Self::GoogleWorkspace),
            "notion" => Ok(Self::Notion),
            "jira" => Ok(Self::Jira),
            _ => Err(format!("unknown provider: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Unlinked,
    Linked,
    Suggested,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlinked => "unlinked",
            Self::Linked => "linked",
            Self::Suggested => "suggested",
        }
    }
}

impl FromStr for LinkStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unlinked" => Ok(Self::Unlinked),
            "linked" => Ok(Self::Linked),
            "suggested" => Ok(Self::Suggested),
            _ => Err(format!("unknown link status: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkMethod {
    AutoEmail,
    AutoFuzzy,
    Manual,
    Admin,
    Migration,
}

impl LinkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoEmail => "auto_email",
            Self::AutoFuzzy => "auto_fuzzy",
            Self::Manual => "manual",
            Self::Admin => "admin",
            Self::Migration => "migration",
        }
    }
}

impl FromStr for LinkMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "auto_email" => Ok(Self::AutoEmail),
            "auto_fuzzy" => Ok(Self::AutoFuzzy),
            "manual" => Ok(Self::Manual),
            "admin" => Ok(Self::Admin),
            "migration" => Ok(Self::Migration),
            _ => Err(format!("unknown link method: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

impl FromStr for SuggestionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("unknown suggestion status: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Linked,
    Unlinked,
    Rejected,
    SuggestionCreated,
    SuggestionExpired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linked => "linked",
            Self::Unlinked => "unlinked",
            Self::Rejected => "rejected",
            Self::SuggestionCreated => "suggestion_created",
            Self::SuggestionExpired => "suggestion_expired",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "linked" => Ok(Self::Linked),
            "unlinked" => Ok(Self::Unlinked),
            "rejected" => Ok(Self::Rejected),
            "suggestion_created" => Ok(Self::SuggestionCreated),
            "suggestion_expired" => Ok(Self::SuggestionExpired),
            _ => Err(format!("unknown audit action: {value}")),
        }
    }
}

/// Normalized profile reported by a provider, produced upstream by the
/// per-provider normalizers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalProfile {
    pub provider: Provider,
    pub provider_user_id: String,
    pub provider_team_id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub real_name: Option<String>,
    pub avatar_url: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub id: Uuid,
    pub org_id: Uuid,
    pub provider: Provider,
    pub provider_user_id: String,
    pub provider_team_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub real_name: Option<String>,
    pub avatar_url: Option<String>,
    pub metadata: serde_json::Value,
    pub link_status: LinkStatus,
    pub link_method: Option<LinkMethod>,
    pub link_confidence: Option<f64>,
    pub linked_at: Option<DateTime<Utc>>,
    pub linked_by: Option<String>,
    pub last_synced_at: DateTime<Utc>,
    pub sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExternalIdentity {
    /// `link_status == linked` must hold exactly when `user_id` is set.
    pub fn check_integrity(&self) -> TetherResult<()> {
        let linked = self.link_status == LinkStatus::Linked;
        if linked != self.user_id.is_some() {
            return Err(TetherError::Internal(format!(
                "identity {} integrity violation: status={} user_id={:?}",
                self.id,
                self.link_status.as_str(),
                self.user_id,
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSuggestion {
    pub id: Uuid,
    pub org_id: Uuid,
    pub external_identity_id: Uuid,
    pub suggested_user_id: Uuid,
    pub method: String,
    pub confidence: f64,
    pub details: serde_json::Value,
    pub status: SuggestionStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for one suggestion row in a batch upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionSeed {
    pub user_id: Uuid,
    pub method: String,
    pub confidence: f64,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkAudit {
    pub id: Uuid,
    pub org_id: Uuid,
    pub external_identity_id: Uuid,
    pub suggestion_id: Option<Uuid>,
    pub action: AuditAction,
    pub previous_user_id: Option<Uuid>,
    pub new_user_id: Option<Uuid>,
    pub method: Option<String>,
    pub confidence: Option<f64>,
    pub actor: String,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Per-organization linking configuration, owned by the surrounding
/// settings service; read-only here. Defaults apply when no row exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    pub org_id: Uuid,
    pub email_auto_link_enabled: bool,
    pub auto_link_threshold: f64,
    pub suggestion_threshold: f64,
    pub suggestion_expiry_days: i64,
    pub allow_self_link: bool,
    pub allow_self_unlink: bool,
}

impl IdentitySettings {
    pub fn defaults_for(org_id: Uuid) -> Self {
        Self {
            org_id,
            email_auto_link_enabled: true,
            auto_link_threshold: 0.95,
            suggestion_threshold: 0.85,
            suggestion_expiry_days: 30,
            allow_self_link: true,
            allow_self_unlink: true,
        }
    }

    pub fn validate(&self) -> TetherResult<()> {
        if self.suggestion_threshold > self.auto_link_threshold {
            return Err(TetherError::Config(format!(
                "suggestion threshold {} exceeds auto-link threshold {}",
                self.suggestion_threshold, self.auto_link_threshold,
            )));
        }
        if !(0.0..=1.0).contains(&self.auto_link_threshold)
            || !(0.0..=1.0).contains(&self.suggestion_threshold)
        {
            return Err(TetherError::Config(
                "thresholds must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.suggestion_expiry_days <= 0 {
            return Err(TetherError::Config(
                "suggestion expiry window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The slice of the org-membership table this engine reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgMember {
    pub id: Uuid,
    pub org_id: Uuid,
    pub email: Option<String>,
    pub display_name: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UnresolvedIdentityFilter {
    pub status: Option<LinkStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PendingSuggestionFilter {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Round a confidence to the two decimal places the schema stores.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
