//! Promotion snapshots and rollback
//!
//! Before production is written, the engine captures production's current
//! copy of the resource (or its absence). After the write it records the
//! new copy alongside. Both halves are written in the execution transaction,
//! so a snapshot exists exactly when its promotion committed.
//!
//! The before-state is protected by a CRC32 checksum (`crc32:xxxxxxxx`,
//! lowercase hex) verified before any rollback.
//!
//! Rollback restores the before-state only while production still holds the
//! exact version the promotion produced; anything newer is a later change
//! that rollback must not clobber.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::errors::{PromotionError, PromotionResult};
use super::lineage::{DataLineageEvent, LineageAction, LineageRecorder};
use super::request::{Caller, PromotionRequest};
use crate::clock::Clock;
use crate::resource::{diff_fields, fields_of, Environment, ResourceDocument, ResourceType};
use crate::store::{Store, Transaction};

/// Days a snapshot remains usable for rollback.
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// A production copy of the resource at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotState {
    pub resource_id: String,
    pub resource_type: ResourceType,
    /// `None` when production had no copy.
    pub data: Option<ResourceDocument>,
    /// Version of `data`, 0 when absent.
    pub version: u64,
}

impl SnapshotState {
    fn of(resource_id: &str, resource_type: ResourceType, data: Option<ResourceDocument>) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            resource_type,
            version: data.as_ref().map(|d| d.version).unwrap_or(0),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionSnapshot {
    pub id: Uuid,
    pub promotion_request_id: Uuid,
    pub organization_id: String,
    pub before_state: SnapshotState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_state: Option<SnapshotState>,
    /// Checksum of `before_state`.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PromotionSnapshot {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Recompute the before-state checksum and compare.
    pub fn verify(&self) -> bool {
        match checksum_state(&self.before_state) {
            Ok(actual) => actual == self.checksum,
            Err(_) => false,
        }
    }
}

/// Formats a CRC32 checksum as `crc32:xxxxxxxx`.
pub fn format_checksum(checksum: u32) -> String {
    format!("crc32:{:08x}", checksum)
}

/// Checksum over the canonical JSON encoding of a snapshot state.
pub fn checksum_state(state: &SnapshotState) -> PromotionResult<String> {
    let bytes = serde_json::to_vec(state)
        .map_err(|e| PromotionError::Execution(format!("cannot encode snapshot: {}", e)))?;
    let mut hasher = Hasher::new();
    hasher.update(&bytes);
    Ok(format_checksum(hasher.finalize()))
}

/// What a rollback did to production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub snapshot_id: Uuid,
    pub resource_id: String,
    /// Version of the restored copy; `None` when the copy was removed.
    pub restored_version: Option<u64>,
    pub lineage_event: DataLineageEvent,
}

/// Captures snapshots during execution and performs rollbacks.
#[derive(Clone)]
pub struct SnapshotManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    lineage: LineageRecorder,
    retention: Duration,
}

impl SnapshotManager {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, lineage: LineageRecorder) -> Self {
        Self {
            store,
            clock,
            lineage,
            retention: Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention = Duration::days(days);
        self
    }

    /// Record production's current copy of the request's resource.
    pub fn capture_before(
        &self,
        tx: &mut dyn Transaction,
        request: &PromotionRequest,
        now: DateTime<Utc>,
    ) -> PromotionResult<Uuid> {
        let current = tx.resource(Environment::Production, &request.resource_id)?;
        let before_state = SnapshotState::of(&request.resource_id, request.resource_type, current);
        let snapshot = PromotionSnapshot {
            id: Uuid::new_v4(),
            promotion_request_id: request.id,
            organization_id: request.organization_id.clone(),
            checksum: checksum_state(&before_state)?,
            before_state,
            after_state: None,
            created_at: now,
            expires_at: now + self.retention,
        };
        let id = snapshot.id;
        tx.put_snapshot(snapshot)?;
        Ok(id)
    }

    /// Record the copy the promotion wrote.
    pub fn capture_after(
        &self,
        tx: &mut dyn Transaction,
        snapshot_id: Uuid,
        written: &ResourceDocument,
    ) -> PromotionResult<()> {
        let mut snapshot = tx
            .snapshot(snapshot_id)?
            .ok_or_else(|| PromotionError::not_found(format!("snapshot {}", snapshot_id)))?;
        snapshot.after_state = Some(SnapshotState::of(
            &written.id,
            written.resource_type,
            Some(written.clone()),
        ));
        tx.put_snapshot(snapshot)?;
        Ok(())
    }

    pub fn get(&self, snapshot_id: Uuid) -> PromotionResult<PromotionSnapshot> {
        let mut tx = self.store.begin();
        tx.snapshot(snapshot_id)?
            .ok_or_else(|| PromotionError::not_found(format!("snapshot {}", snapshot_id)))
    }

    /// Restore production to the snapshot's before-state.
    ///
    /// Requires a superadmin, an unexpired and intact snapshot, and
    /// production still at the version the promotion wrote.
    pub fn rollback(&self, snapshot_id: Uuid, caller: &Caller) -> PromotionResult<RollbackOutcome> {
        if !caller.is_superadmin() {
            return Err(PromotionError::unauthorized("rollback requires a superadmin"));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin();
        let snapshot = tx
            .snapshot(snapshot_id)?
            .ok_or_else(|| PromotionError::not_found(format!("snapshot {}", snapshot_id)))?;

        if snapshot.is_expired(now) {
            return Err(PromotionError::SnapshotExpired {
                snapshot_id,
                expires_at: snapshot.expires_at,
            });
        }
        if !snapshot.verify() {
            warn!(%snapshot_id, "snapshot checksum mismatch");
            return Err(PromotionError::SnapshotCorrupt(snapshot_id));
        }
        let after = snapshot.after_state.as_ref().ok_or_else(|| {
            PromotionError::validation(format!("snapshot {} has no recorded result", snapshot_id))
        })?;

        let resource_id = snapshot.before_state.resource_id.clone();
        if tx.claim(&resource_id)?.is_some() {
            return Err(PromotionError::ConcurrentExecution { resource_id });
        }

        let current = tx.resource(Environment::Production, &resource_id)?;
        let current_version = current.as_ref().map(|d| d.version).unwrap_or(0);
        if current_version != after.version {
            return Err(PromotionError::SnapshotSuperseded {
                snapshot_id,
                recorded_version: after.version,
                current_version,
            });
        }

        let restored = match &snapshot.before_state.data {
            Some(before) => {
                let version = tx.next_version(Environment::Production, &resource_id)?;
                let doc = ResourceDocument {
                    version,
                    last_modified_in: Environment::Production,
                    production_version: Some(version),
                    updated_at: now,
                    ..before.clone()
                };
                tx.put_resource(Environment::Production, doc.clone())?;
                Some(doc)
            }
            None => {
                tx.delete_resource(Environment::Production, &resource_id)?;
                None
            }
        };

        let subject = restored
            .as_ref()
            .or(current.as_ref())
            .ok_or_else(|| PromotionError::not_found(format!("production copy of {}", resource_id)))?;
        let mut event = DataLineageEvent::new(
            LineageAction::RolledBack,
            subject,
            Environment::Production,
            &caller.user_id,
            now,
        )
        .with_changes(diff_fields(
            &fields_of(current.as_ref()),
            &fields_of(restored.as_ref()),
        ));
        event.promotion_request_id = Some(snapshot.promotion_request_id);
        tx.append_lineage(event)?;

        let outcome = tx.commit()?;
        self.lineage.publish(&outcome.lineage);

        let restored_version = restored.as_ref().map(|d| d.version);
        info!(
            %snapshot_id,
            resource_id = %resource_id,
            restored_version = ?restored_version,
            performed_by = %caller.user_id,
            "production rolled back"
        );

        let lineage_event = outcome
            .lineage
            .into_iter()
            .next()
            .ok_or_else(|| PromotionError::Execution("rollback lineage was not committed".into()))?;
        Ok(RollbackOutcome {
            snapshot_id,
            resource_id,
            restored_version,
            lineage_event,
        })
    }
}
