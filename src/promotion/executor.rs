//! Promotion execution
//!
//! Execution is one transaction: check the request is executable, take the
//! resource's execution claim, re-detect conflicts, capture the
//! before-snapshot, write production, capture the after-snapshot, append the
//! `promoted` lineage event, mark the request `completed` and release the
//! claim. The commit applies all of it or none of it, so no request is ever
//! left holding a claim.
//!
//! Executors racing on one resource all write its claim record; the first
//! commit wins and the rest fail validation with `ConcurrentExecution`.
//!
//! When the transaction does not commit, a separate best-effort write moves
//! the request to `pending` (drift) or `failed` (anything else). If that write
//! fails too, the request stays in its approved state and can be executed
//! again once the store recovers. Production is never partially written.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use super::conflict::{Conflict, ConflictDetector};
use super::errors::{PromotionError, PromotionResult};
use super::lineage::{DataLineageEvent, LineageAction, LineageRecorder};
use super::request::{Caller, ExecutionResult};
use super::snapshot::SnapshotManager;
use super::state::PromotionStatus;
use crate::clock::Clock;
use crate::resource::{diff_fields, fields_of, Environment, ResourceDocument};
use crate::store::{Store, StoreError};

enum Outcome {
    Executed {
        resource_id: String,
        result: ExecutionResult,
        lineage: Vec<DataLineageEvent>,
    },
    AlreadyCompleted(ExecutionResult),
}

/// Why the execution transaction did not commit.
enum Abort {
    /// Preconditions failed; nothing to record.
    Refused(PromotionError),
    Drift {
        conflicts: Vec<Conflict>,
        unresolved: Vec<Conflict>,
    },
    Failed(PromotionError),
}

impl From<PromotionError> for Abort {
    fn from(err: PromotionError) -> Self {
        Abort::Failed(err)
    }
}

impl From<StoreError> for Abort {
    fn from(err: StoreError) -> Self {
        Abort::Failed(err.into())
    }
}

enum Settlement {
    Drift(Vec<Conflict>),
    Fail(String),
}

#[derive(Clone)]
pub struct ExecutionEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    snapshots: SnapshotManager,
    lineage: LineageRecorder,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        snapshots: SnapshotManager,
        lineage: LineageRecorder,
    ) -> Self {
        Self {
            store,
            clock,
            snapshots,
            lineage,
        }
    }

    /// Apply a fully approved request to production.
    ///
    /// Executing a completed request returns its recorded result without
    /// touching production again. A failed request may be executed again.
    pub fn execute(&self, request_id: Uuid, caller: &Caller) -> PromotionResult<ExecutionResult> {
        if !caller.is_superadmin() {
            return Err(PromotionError::unauthorized(
                "execution requires a superadmin",
            ));
        }

        match self.promote(request_id, caller) {
            Ok(Outcome::AlreadyCompleted(result)) => Ok(result),
            Ok(Outcome::Executed {
                resource_id,
                result,
                lineage,
            }) => {
                self.lineage.publish(&lineage);
                info!(
                    request_id = %request_id,
                    resource_id = %resource_id,
                    production_version = ?result.production_version,
                    executed_by = %caller.user_id,
                    "promotion executed"
                );
                Ok(result)
            }
            Err(Abort::Refused(err)) => Err(err),
            Err(Abort::Drift {
                conflicts,
                unresolved,
            }) => {
                warn!(
                    request_id = %request_id,
                    conflicts = unresolved.len(),
                    "production drifted before execution; request returned to pending"
                );
                self.settle(request_id, Settlement::Drift(conflicts));
                Err(PromotionError::ConflictDetected {
                    conflicts: unresolved,
                })
            }
            Err(Abort::Failed(err)) => {
                let message = err.to_string();
                error!(request_id = %request_id, error = %message, "promotion execution failed");
                self.settle(request_id, Settlement::Fail(message.clone()));
                Err(PromotionError::Execution(message))
            }
        }
    }

    fn promote(&self, request_id: Uuid, caller: &Caller) -> Result<Outcome, Abort> {
        let now = self.clock.now();
        let mut tx = self.store.begin();
        let mut request = tx
            .request(request_id)?
            .ok_or_else(|| {
                Abort::Refused(PromotionError::not_found(format!(
                    "promotion request {}",
                    request_id
                )))
            })?;
        let resource_id = request.resource_id.clone();

        if request.status == PromotionStatus::Completed {
            let result = request.execution_result.clone().unwrap_or(ExecutionResult {
                success: true,
                message: "already executed".to_string(),
                snapshot_id: None,
                production_version: None,
            });
            return Ok(Outcome::AlreadyCompleted(result));
        }
        if request.has_unresolved_conflicts() {
            return Err(Abort::Refused(PromotionError::ConflictDetected {
                conflicts: request.unresolved_conflicts().cloned().collect(),
            }));
        }
        request.status = request.status.begin_execution().map_err(Abort::Refused)?;

        if tx.claim(&resource_id)?.is_some() {
            return Err(Abort::Refused(PromotionError::ConcurrentExecution {
                resource_id,
            }));
        }
        tx.set_claim(&resource_id, Some(request_id))?;

        let staging = tx
            .resource(Environment::Staging, &resource_id)?
            .ok_or_else(|| {
                PromotionError::not_found(format!("staging copy of resource {}", resource_id))
            })?;
        let production = tx.resource(Environment::Production, &resource_id)?;

        let detected = ConflictDetector::detect(
            &resource_id,
            Some(&staging),
            production.as_ref(),
            request.baseline_version,
            now,
        );
        let merge = ConflictDetector::merge(&request.conflicts, detected);
        if !merge.unresolved.is_empty() {
            return Err(Abort::Drift {
                conflicts: merge.conflicts,
                unresolved: merge.unresolved,
            });
        }

        let snapshot_id = self.snapshots.capture_before(tx.as_mut(), &request, now)?;

        let before = fields_of(production.as_ref());
        let promoted = ConflictDetector::apply_resolutions(&staging.fields, &before, &merge.conflicts);
        let version = tx.next_version(Environment::Production, &resource_id)?;
        let doc = ResourceDocument {
            id: resource_id.clone(),
            resource_type: staging.resource_type,
            organization_id: staging.organization_id.clone(),
            name: staging.name.clone(),
            version,
            last_modified_in: Environment::Production,
            staging_version: Some(staging.version),
            production_version: Some(version),
            has_conflict: false,
            fields: promoted,
            updated_at: now,
        };
        tx.put_resource(Environment::Production, doc.clone())?;

        self.snapshots.capture_after(tx.as_mut(), snapshot_id, &doc)?;

        let event = DataLineageEvent::new(
            LineageAction::Promoted,
            &doc,
            Environment::Production,
            &caller.user_id,
            now,
        )
        .with_changes(diff_fields(&before, &doc.fields))
        .with_promotion(request_id, Environment::Staging);
        tx.append_lineage(event)?;

        let result = ExecutionResult {
            success: true,
            message: format!(
                "promoted {} to production version {}",
                resource_id, version
            ),
            snapshot_id: Some(snapshot_id),
            production_version: Some(version),
        };
        request.conflicts = merge.conflicts;
        request.status = request.status.complete()?;
        request.executed_at = Some(now);
        request.executed_by = Some(caller.user_id.clone());
        request.execution_result = Some(result.clone());
        request.updated_at = now;
        tx.put_request(request)?;
        tx.set_claim(&resource_id, None)?;

        match tx.commit() {
            Ok(outcome) => Ok(Outcome::Executed {
                resource_id,
                result,
                lineage: outcome.lineage,
            }),
            Err(err) if err.is_contention() => {
                warn!(request_id = %request_id, error = %err, "lost race on resource");
                Err(Abort::Refused(PromotionError::ConcurrentExecution {
                    resource_id,
                }))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Record why execution did not happen. Best effort: a failure here is
    /// logged and the request keeps its approved status.
    fn settle(&self, request_id: Uuid, settlement: Settlement) {
        if let Err(err) = self.try_settle(request_id, settlement) {
            warn!(
                request_id = %request_id,
                error = %err,
                "could not record execution outcome; request left as approved"
            );
        }
    }

    fn try_settle(&self, request_id: Uuid, settlement: Settlement) -> PromotionResult<()> {
        let now = self.clock.now();
        let mut tx = self.store.begin();
        let mut current = tx.request(request_id)?.ok_or_else(|| {
            PromotionError::not_found(format!("promotion request {}", request_id))
        })?;

        current.status = current.status.begin_execution()?;
        match settlement {
            Settlement::Drift(conflicts) => current.return_to_pending(conflicts, now)?,
            Settlement::Fail(message) => {
                current.status = current.status.fail()?;
                current.execution_result = Some(ExecutionResult {
                    success: false,
                    message,
                    snapshot_id: None,
                    production_version: None,
                });
            }
        }
        current.updated_at = now;
        tx.put_request(current)?;
        tx.commit()?;
        Ok(())
    }
}
