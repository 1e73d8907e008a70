//! Resource Store
//!
//! All engine state lives here: per-environment resource documents, promotion
//! requests, snapshots, per-resource execution claims and the lineage ledger.
//! The engine itself is stateless between calls.
//!
//! # Transactions
//!
//! Every workflow transition and every execution runs inside one
//! [`Transaction`]. Transactions are optimistic:
//!
//! - reads record the revision of each record they observe
//! - writes are buffered and visible only to the same transaction
//! - `commit` validates the read set and applies everything at once, or
//!   applies nothing
//!
//! Dropping a transaction without committing discards it. Two transactions
//! that touch disjoint resources never interfere.

mod fault;
mod memory;

pub use fault::FaultPoint;
pub use memory::MemoryStore;

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::promotion::{DataLineageEvent, LineageFilter, PromotionRequest, PromotionSnapshot};
use crate::resource::{Environment, ResourceDocument};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A record read by the transaction changed before commit.
    #[error("concurrent modification of {key}")]
    Contention { key: String },

    /// A write would not advance the resource's version.
    #[error(
        "version regression for {resource_id} in {environment}: attempted {attempted}, current {current}"
    )]
    VersionRegression {
        resource_id: String,
        environment: Environment,
        attempted: u64,
        current: u64,
    },

    /// Internal lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// An armed fault point fired.
    #[error("injected fault at {0}")]
    InjectedFault(FaultPoint),
}

impl StoreError {
    /// Whether the failure came from a competing writer rather than the store.
    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::Contention { .. })
    }
}

/// Identity of a versioned record inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Resource(Environment, String),
    Request(Uuid),
    Snapshot(Uuid),
    Claim(String),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Resource(env, id) => write!(f, "resource {}/{}", env, id),
            RecordKey::Request(id) => write!(f, "promotion request {}", id),
            RecordKey::Snapshot(id) => write!(f, "snapshot {}", id),
            RecordKey::Claim(id) => write!(f, "execution claim on {}", id),
        }
    }
}

/// What a successful commit made durable.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// Lineage events appended, with their assigned sequence numbers.
    pub lineage: Vec<DataLineageEvent>,
}

/// Backing store for the promotion engine.
pub trait Store: Send + Sync {
    /// Open a new transaction.
    fn begin(&self) -> Box<dyn Transaction + '_>;
}

/// A unit of work against the store.
pub trait Transaction: Send {
    /// Read one environment's copy of a resource.
    fn resource(&mut self, env: Environment, id: &str) -> StoreResult<Option<ResourceDocument>>;

    /// The smallest version a new write of this resource may carry.
    ///
    /// Accounts for deleted copies, so version numbers are never reused.
    fn next_version(&mut self, env: Environment, id: &str) -> StoreResult<u64>;

    /// Write a resource copy. Its version must exceed every version this copy
    /// has ever had.
    fn put_resource(&mut self, env: Environment, doc: ResourceDocument) -> StoreResult<()>;

    /// Remove a resource copy. The version high-water mark is kept.
    fn delete_resource(&mut self, env: Environment, id: &str) -> StoreResult<()>;

    fn request(&mut self, id: Uuid) -> StoreResult<Option<PromotionRequest>>;

    /// All requests of one organization, in no particular order.
    fn requests(&mut self, organization_id: &str) -> StoreResult<Vec<PromotionRequest>>;

    fn put_request(&mut self, request: PromotionRequest) -> StoreResult<()>;

    fn snapshot(&mut self, id: Uuid) -> StoreResult<Option<PromotionSnapshot>>;

    fn put_snapshot(&mut self, snapshot: PromotionSnapshot) -> StoreResult<()>;

    /// The request currently executing against a resource, if any.
    fn claim(&mut self, resource_id: &str) -> StoreResult<Option<Uuid>>;

    fn set_claim(&mut self, resource_id: &str, holder: Option<Uuid>) -> StoreResult<()>;

    /// Queue a lineage event; it receives its sequence number on commit.
    fn append_lineage(&mut self, event: DataLineageEvent) -> StoreResult<()>;

    /// Committed lineage events matching `filter`, ascending by sequence.
    fn lineage(&mut self, filter: &LineageFilter) -> StoreResult<Vec<DataLineageEvent>>;

    /// Validate and apply all buffered writes atomically.
    fn commit(self: Box<Self>) -> StoreResult<CommitOutcome>;
}
