//! Promotion Error Types
//!
//! Every failure is explicit. A refused transition leaves the request and
//! production untouched unless the variant says otherwise.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::conflict::Conflict;
use super::state::PromotionStatus;
use crate::store::StoreError;

/// Result type for promotion operations
pub type PromotionResult<T> = Result<T, PromotionError>;

/// Error taxonomy seen by operators and API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionErrorKind {
    /// Malformed input or a transition the current status does not allow
    Validation,
    /// Wrong role, wrong organization, or self-approval
    Authorization,
    /// Drift or concurrent execution; needs operator attention
    Conflict,
    /// Store write failure during execution
    Execution,
    /// Snapshot expired, superseded or corrupt
    Rollback,
    /// Unknown request, resource or snapshot
    NotFound,
    /// Store failures outside execution
    Internal,
}

impl PromotionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::Conflict => "conflict",
            Self::Execution => "execution",
            Self::Rollback => "rollback",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        }
    }
}

/// Promotion engine errors
#[derive(Debug, Clone, Error)]
pub enum PromotionError {
    /// Malformed or incomplete input
    #[error("validation failed: {0}")]
    Validation(String),

    /// Requested transition is not reachable from the current status
    #[error("cannot {action} a request in status {from}")]
    InvalidTransition {
        from: PromotionStatus,
        action: &'static str,
    },

    /// Request, resource or snapshot does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Caller's role does not permit the transition
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// The superadmin approval would come from the org-admin approver
    #[error("user {user_id} already approved this request as org admin")]
    SelfApproval { user_id: String },

    /// Staging and production diverged since the baseline
    #[error("{} unresolved conflict(s) between staging and production", .conflicts.len())]
    ConflictDetected { conflicts: Vec<Conflict> },

    /// Another promotion or rollback of the same resource won the race
    #[error("another promotion of {resource_id} is in progress")]
    ConcurrentExecution { resource_id: String },

    /// Execution aborted; production untouched, request marked failed
    #[error("execution failed: {0}")]
    Execution(String),

    /// Snapshot is past its retention window
    #[error("snapshot {snapshot_id} expired at {expires_at}")]
    SnapshotExpired {
        snapshot_id: Uuid,
        expires_at: DateTime<Utc>,
    },

    /// Production moved on since the snapshot's promotion
    #[error(
        "snapshot {snapshot_id} superseded: production is at version {current_version}, snapshot recorded {recorded_version}"
    )]
    SnapshotSuperseded {
        snapshot_id: Uuid,
        recorded_version: u64,
        current_version: u64,
    },

    /// Stored before-state does not match its checksum
    #[error("snapshot {0} failed its integrity check")]
    SnapshotCorrupt(Uuid),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PromotionError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an authorization error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Classify into the operator-facing taxonomy.
    pub fn kind(&self) -> PromotionErrorKind {
        match self {
            Self::Validation(_) | Self::InvalidTransition { .. } => PromotionErrorKind::Validation,
            Self::NotFound(_) => PromotionErrorKind::NotFound,
            Self::Unauthorized(_) | Self::SelfApproval { .. } => PromotionErrorKind::Authorization,
            Self::ConflictDetected { .. } | Self::ConcurrentExecution { .. } => {
                PromotionErrorKind::Conflict
            }
            Self::Execution(_) => PromotionErrorKind::Execution,
            Self::SnapshotExpired { .. }
            | Self::SnapshotSuperseded { .. }
            | Self::SnapshotCorrupt(_) => PromotionErrorKind::Rollback,
            Self::Store(err) if err.is_contention() => PromotionErrorKind::Conflict,
            Self::Store(_) => PromotionErrorKind::Internal,
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::Validation(_) => 400,
            Self::InvalidTransition { .. } => 400,

            // 403 Forbidden
            Self::Unauthorized(_) => 403,
            Self::SelfApproval { .. } => 403,

            // 404 Not Found
            Self::NotFound(_) => 404,

            // 409 Conflict
            Self::ConflictDetected { .. } => 409,
            Self::ConcurrentExecution { .. } => 409,
            Self::SnapshotSuperseded { .. } => 409,
            Self::Store(err) if err.is_contention() => 409,

            // 410 Gone
            Self::SnapshotExpired { .. } => 410,

            // 500 Internal Server Error
            Self::Execution(_) => 500,
            Self::SnapshotCorrupt(_) => 500,
            Self::Store(_) => 500,
        }
    }

    /// Returns whether this error is the caller's to fix
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }

    /// Conflicts carried by a drift error, if any.
    pub fn conflicts(&self) -> &[Conflict] {
        match self {
            Self::ConflictDetected { conflicts } => conflicts,
            _ => &[],
        }
    }
}
