//! Promotion Workflow State Machine
//!
//! ```text
//! pending ──admin──▶ approved-org ──superadmin──▶ approved-super
//!    ▲                    │                            │
//!    └──── drift ─────────┴────────────────────────────┤ engine
//!                                                      ▼
//!                                  failed ◀──────── executing ──▶ completed
//!                                    └──── retry ─────▲
//!
//! pending | approved-org | approved-super ──▶ rejected
//! pending | approved-org                  ──▶ cancelled
//! ```
//!
//! Transitions are explicit and event-driven; nothing moves on a timer.
//! Each transition consumes the current status and returns the next one, or
//! a `InvalidTransition` error naming the refused action.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::{PromotionError, PromotionResult};

/// Lifecycle status of a promotion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromotionStatus {
    /// Awaiting org-admin approval
    Pending,
    /// Org admin approved; awaiting superadmin
    ApprovedOrg,
    /// Fully approved; ready to execute
    ApprovedSuper,
    /// Execution engine holds the resource
    Executing,
    /// Staging state is live in production
    Completed,
    /// Execution aborted; production untouched, retriable
    Failed,
    /// Denied by an approver
    Rejected,
    /// Withdrawn by the requester
    Cancelled,
}

impl PromotionStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ApprovedOrg => "approved-org",
            Self::ApprovedSuper => "approved-super",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses are retained for audit and accept no approvals.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Rejected | Self::Cancelled
        )
    }

    /// Whether the status is one of the two approval stages.
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::ApprovedOrg | Self::ApprovedSuper)
    }

    fn refuse(self, action: &'static str) -> PromotionError {
        PromotionError::InvalidTransition { from: self, action }
    }

    // =========================================================================
    // HUMAN TRANSITIONS
    // =========================================================================

    /// pending → approved-org
    pub fn approve_org(self) -> PromotionResult<Self> {
        match self {
            Self::Pending => Ok(Self::ApprovedOrg),
            _ => Err(self.refuse("org-approve")),
        }
    }

    /// approved-org → approved-super
    pub fn approve_super(self) -> PromotionResult<Self> {
        match self {
            Self::ApprovedOrg => Ok(Self::ApprovedSuper),
            _ => Err(self.refuse("superadmin-approve")),
        }
    }

    /// pending | approved-org | approved-super → rejected
    ///
    /// `executing` belongs to the engine and is not interruptible.
    pub fn reject(self) -> PromotionResult<Self> {
        match self {
            Self::Pending | Self::ApprovedOrg | Self::ApprovedSuper => Ok(Self::Rejected),
            _ => Err(self.refuse("reject")),
        }
    }

    /// pending | approved-org → cancelled
    pub fn cancel(self) -> PromotionResult<Self> {
        match self {
            Self::Pending | Self::ApprovedOrg => Ok(Self::Cancelled),
            _ => Err(self.refuse("cancel")),
        }
    }

    // =========================================================================
    // ENGINE TRANSITIONS
    // =========================================================================

    /// approved-super | failed → executing
    pub fn begin_execution(self) -> PromotionResult<Self> {
        match self {
            Self::ApprovedSuper | Self::Failed => Ok(Self::Executing),
            _ => Err(self.refuse("execute")),
        }
    }

    /// executing → completed
    pub fn complete(self) -> PromotionResult<Self> {
        match self {
            Self::Executing => Ok(Self::Completed),
            _ => Err(self.refuse("complete")),
        }
    }

    /// executing → failed
    pub fn fail(self) -> PromotionResult<Self> {
        match self {
            Self::Executing => Ok(Self::Failed),
            _ => Err(self.refuse("fail")),
        }
    }

    /// approved-org | approved-super | executing → pending, on drift
    pub fn return_to_pending(self) -> PromotionResult<Self> {
        match self {
            Self::ApprovedOrg | Self::ApprovedSuper | Self::Executing => Ok(Self::Pending),
            _ => Err(self.refuse("return to pending")),
        }
    }
}

impl fmt::Display for PromotionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PromotionStatus {
    type Err = PromotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved-org" => Ok(Self::ApprovedOrg),
            "approved-super" => Ok(Self::ApprovedSuper),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(PromotionError::validation(format!(
                "unknown promotion status '{}'",
                other
            ))),
        }
    }
}

/// Status filter for listing requests.
///
/// `approved` matches both approval stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Exactly(PromotionStatus),
    Approved,
}

impl StatusFilter {
    pub fn matches(&self, status: PromotionStatus) -> bool {
        match self {
            Self::Exactly(expected) => *expected == status,
            Self::Approved => status.is_approved(),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = PromotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "approved" {
            return Ok(Self::Approved);
        }
        s.parse().map(Self::Exactly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_approval_path() {
        let status = PromotionStatus::Pending;
        let status = status.approve_org().unwrap();
        assert_eq!(status, PromotionStatus::ApprovedOrg);
        let status = status.approve_super().unwrap();
        assert_eq!(status, PromotionStatus::ApprovedSuper);
        let status = status.begin_execution().unwrap();
        assert_eq!(status, PromotionStatus::Executing);
        let status = status.complete().unwrap();
        assert_eq!(status, PromotionStatus::Completed);
        assert!(status.is_terminal());
    }

    #[test]
    fn test_superadmin_cannot_skip_org_stage() {
        let err = PromotionStatus::Pending.approve_super().unwrap_err();
        match err {
            PromotionError::InvalidTransition { from, .. } => {
                assert_eq!(from, PromotionStatus::Pending)
            }
            other => panic!("expected InvalidTransition, got {:?}", other),
        }
    }

    #[test]
    fn test_reject_from_non_terminal_states() {
        for status in [
            PromotionStatus::Pending,
            PromotionStatus::ApprovedOrg,
            PromotionStatus::ApprovedSuper,
        ] {
            assert_eq!(status.reject().unwrap(), PromotionStatus::Rejected);
        }
    }

    #[test]
    fn test_reject_refused_after_terminal() {
        for status in [
            PromotionStatus::Completed,
            PromotionStatus::Failed,
            PromotionStatus::Cancelled,
            PromotionStatus::Rejected,
            PromotionStatus::Executing,
        ] {
            assert!(status.reject().is_err(), "{} should not be rejectable", status);
        }
    }

    #[test]
    fn test_cancel_only_before_full_approval() {
        assert!(PromotionStatus::Pending.cancel().is_ok());
        assert!(PromotionStatus::ApprovedOrg.cancel().is_ok());
        assert!(PromotionStatus::ApprovedSuper.cancel().is_err());
        assert!(PromotionStatus::Completed.cancel().is_err());
    }

    #[test]
    fn test_failed_can_be_retried() {
        let status = PromotionStatus::Failed.begin_execution().unwrap();
        assert_eq!(status, PromotionStatus::Executing);
    }

    #[test]
    fn test_execution_requires_full_approval() {
        assert!(PromotionStatus::Pending.begin_execution().is_err());
        assert!(PromotionStatus::ApprovedOrg.begin_execution().is_err());
        assert!(PromotionStatus::Completed.begin_execution().is_err());
    }

    #[test]
    fn test_drift_returns_to_pending() {
        assert_eq!(
            PromotionStatus::Executing.return_to_pending().unwrap(),
            PromotionStatus::Pending
        );
        assert_eq!(
            PromotionStatus::ApprovedOrg.return_to_pending().unwrap(),
            PromotionStatus::Pending
        );
        assert!(PromotionStatus::Completed.return_to_pending().is_err());
    }

    #[test]
    fn test_status_round_trips_wire_names() {
        for status in [
            PromotionStatus::Pending,
            PromotionStatus::ApprovedOrg,
            PromotionStatus::ApprovedSuper,
            PromotionStatus::Executing,
            PromotionStatus::Completed,
            PromotionStatus::Failed,
            PromotionStatus::Rejected,
            PromotionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<PromotionStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_approved_filter_matches_both_stages() {
        let filter: StatusFilter = "approved".parse().unwrap();
        assert!(filter.matches(PromotionStatus::ApprovedOrg));
        assert!(filter.matches(PromotionStatus::ApprovedSuper));
        assert!(!filter.matches(PromotionStatus::Pending));

        let filter: StatusFilter = "rejected".parse().unwrap();
        assert!(filter.matches(PromotionStatus::Rejected));
        assert!("bogus".parse::<StatusFilter>().is_err());
    }
}
