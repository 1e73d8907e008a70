//! Fault point injection for exercising store failure paths
//!
//! A fault point names one store operation. When armed on a
//! [`MemoryStore`](super::MemoryStore), that operation fails with
//! [`StoreError::InjectedFault`](super::StoreError::InjectedFault) until the
//! point is disarmed. Nothing is written when a fault fires.
//!
//! ```ignore
//! store.arm_fault(FaultPoint::SnapshotWrite);
//! assert!(engine.execute(id, &superadmin).is_err());
//! store.disarm_fault(FaultPoint::SnapshotWrite);
//! ```

use std::fmt;

/// Named store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Writing a promotion snapshot
    SnapshotWrite,
    /// Writing a production resource copy
    ProductionWrite,
    /// Appending a lineage event
    LineageAppend,
    /// Applying a transaction
    Commit,
}

impl FaultPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultPoint::SnapshotWrite => "snapshot_write",
            FaultPoint::ProductionWrite => "production_write",
            FaultPoint::LineageAppend => "lineage_append",
            FaultPoint::Commit => "commit",
        }
    }

    /// Every defined fault point.
    pub fn all() -> &'static [FaultPoint] {
        &[
            FaultPoint::SnapshotWrite,
            FaultPoint::ProductionWrite,
            FaultPoint::LineageAppend,
            FaultPoint::Commit,
        ]
    }
}

impl fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
