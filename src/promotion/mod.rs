//! Promotion Subsystem
//!
//! Moves one resource's staging copy into production under a two-tier
//! approval workflow:
//!
//! - requests record the production version they were opened against
//! - an org admin, then a different superadmin, must approve
//! - drift in production since the baseline surfaces as field conflicts
//! - execution snapshots production, writes it and logs lineage atomically
//! - snapshots allow rollback within their retention window
//!
//! Transitions are explicit and event-driven. Nothing happens on a timer.

mod conflict;
mod errors;
mod executor;
mod lineage;
mod request;
mod service;
mod snapshot;
mod state;
mod workflow;

pub use conflict::{
    Conflict, ConflictDetector, ConflictMerge, ConflictResolution, DriftStatus, VersionComparison,
};
pub use errors::{PromotionError, PromotionErrorKind, PromotionResult};
pub use executor::ExecutionEngine;
pub use lineage::{
    DataLineageEvent, FileLineageSink, LineageAction, LineageFilter, LineageRecorder, LineageSink,
    MemoryLineageSink, DEFAULT_QUERY_LIMIT,
};
pub use request::{
    Approval, Caller, ExecutionResult, OpenPromotion, PromotionRequest, Rejection, Role,
};
pub use service::{PromotionService, PromotionServiceBuilder};
pub use snapshot::{
    checksum_state, format_checksum, PromotionSnapshot, RollbackOutcome, SnapshotManager,
    SnapshotState, DEFAULT_RETENTION_DAYS,
};
pub use state::{PromotionStatus, StatusFilter};
pub use workflow::PromotionWorkflow;
