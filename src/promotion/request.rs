//! Promotion requests and the identities that act on them

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conflict::Conflict;
use super::errors::PromotionError;
use super::state::PromotionStatus;
use crate::resource::{ChangeField, Environment, ResourceType};

/// Platform role of an acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = PromotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::Superadmin),
            other => Err(PromotionError::validation(format!("unknown role '{}'", other))),
        }
    }
}

/// The authenticated identity behind an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
    /// Organization the user belongs to; superadmins may have none.
    pub organization_id: Option<String>,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            organization_id: None,
        }
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn is_superadmin(&self) -> bool {
        self.role == Role::Superadmin
    }

    pub fn belongs_to(&self, organization_id: &str) -> bool {
        self.organization_id.as_deref() == Some(organization_id)
    }

    /// Admin of exactly this organization.
    pub fn is_org_admin(&self, organization_id: &str) -> bool {
        self.role == Role::Admin && self.belongs_to(organization_id)
    }

    /// Org admins of the owning organization and superadmins.
    pub fn can_moderate(&self, organization_id: &str) -> bool {
        self.is_superadmin() || self.is_org_admin(organization_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub user_id: String,
    pub role: Role,
    pub approved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub user_id: String,
    pub role: Role,
    pub rejected_at: DateTime<Utc>,
    pub reason: String,
}

/// Outcome recorded on the request once the engine has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production_version: Option<u64>,
}

/// Input for opening a promotion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPromotion {
    pub resource_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A request to move one resource's staging state into production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRequest {
    pub id: Uuid,
    pub organization_id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub resource_name: String,
    pub source_environment: Environment,
    pub destination_environment: Environment,
    /// Production version observed when the request was opened (0 if none).
    pub baseline_version: u64,
    pub staging_version: u64,
    pub changes: Vec<ChangeField>,
    pub status: PromotionStatus,
    pub requested_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub approvals: Vec<Approval>,
    pub rejections: Vec<Rejection>,
    pub conflicts: Vec<Conflict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<ExecutionResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PromotionRequest {
    pub fn approval_by(&self, role: Role) -> Option<&Approval> {
        self.approvals.iter().find(|a| a.role == role)
    }

    /// Whether `user_id` already approved in `role`.
    pub fn has_approval(&self, user_id: &str, role: Role) -> bool {
        self.approvals
            .iter()
            .any(|a| a.user_id == user_id && a.role == role)
    }

    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.resolved)
    }

    pub fn has_unresolved_conflicts(&self) -> bool {
        self.unresolved_conflicts().next().is_some()
    }

    /// Fully approved with nothing left to resolve.
    pub fn is_ready_to_execute(&self) -> bool {
        self.status == PromotionStatus::ApprovedSuper && !self.has_unresolved_conflicts()
    }

    /// Move back to pending after drift: approvals are void, conflicts
    /// replace the recorded set.
    pub(crate) fn return_to_pending(
        &mut self,
        conflicts: Vec<Conflict>,
        at: DateTime<Utc>,
    ) -> Result<(), PromotionError> {
        self.status = self.status.return_to_pending()?;
        self.conflicts = conflicts;
        self.approvals.clear();
        self.updated_at = at;
        Ok(())
    }

    /// One-line description for listings and notifications.
    pub fn summary(&self) -> String {
        let unresolved = self.unresolved_conflicts().count();
        let mut summary = format!(
            "{} \"{}\" | {} change{}",
            self.resource_type,
            self.resource_name,
            self.changes.len(),
            if self.changes.len() == 1 { "" } else { "s" }
        );
        if !self.conflicts.is_empty() {
            summary.push_str(&format!(
                " | {} conflict{} ({} unresolved)",
                self.conflicts.len(),
                if self.conflicts.len() == 1 { "" } else { "s" },
                unresolved
            ));
        }
        summary
    }
}
