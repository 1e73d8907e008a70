//! Wiring of the promotion components over one store and clock

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::conflict::{ConflictDetector, VersionComparison};
use super::errors::{PromotionError, PromotionResult};
use super::executor::ExecutionEngine;
use super::lineage::{LineageRecorder, LineageSink, DEFAULT_QUERY_LIMIT};
use super::request::Caller;
use super::snapshot::{RollbackOutcome, SnapshotManager, DEFAULT_RETENTION_DAYS};
use super::state::PromotionStatus;
use super::workflow::PromotionWorkflow;
use crate::clock::Clock;
use crate::resource::{Environment, ResourceEditor};
use crate::store::Store;

/// Everything the API layer needs, sharing one store and clock.
#[derive(Clone)]
pub struct PromotionService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    workflow: PromotionWorkflow,
    engine: ExecutionEngine,
    snapshots: SnapshotManager,
    lineage: LineageRecorder,
    editor: ResourceEditor,
}

pub struct PromotionServiceBuilder {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    retention_days: i64,
    query_limit: usize,
    sink: Option<Arc<dyn LineageSink>>,
}

impl PromotionServiceBuilder {
    pub fn retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn lineage_query_limit(mut self, limit: usize) -> Self {
        self.query_limit = limit;
        self
    }

    pub fn lineage_sink(mut self, sink: Arc<dyn LineageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> PromotionService {
        let mut lineage =
            LineageRecorder::new(self.store.clone()).with_query_limit(self.query_limit);
        if let Some(sink) = self.sink {
            lineage = lineage.with_sink(sink);
        }
        let snapshots = SnapshotManager::new(self.store.clone(), self.clock.clone(), lineage.clone())
            .with_retention_days(self.retention_days);
        let engine = ExecutionEngine::new(
            self.store.clone(),
            self.clock.clone(),
            snapshots.clone(),
            lineage.clone(),
        );
        PromotionService {
            workflow: PromotionWorkflow::new(self.store.clone(), self.clock.clone()),
            editor: ResourceEditor::new(self.store.clone(), self.clock.clone(), lineage.clone()),
            engine,
            snapshots,
            lineage,
            store: self.store,
            clock: self.clock,
        }
    }
}

impl PromotionService {
    pub fn builder(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> PromotionServiceBuilder {
        PromotionServiceBuilder {
            store,
            clock,
            retention_days: DEFAULT_RETENTION_DAYS,
            query_limit: DEFAULT_QUERY_LIMIT,
            sink: None,
        }
    }

    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self::builder(store, clock).build()
    }

    pub fn workflow(&self) -> &PromotionWorkflow {
        &self.workflow
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn lineage(&self) -> &LineageRecorder {
        &self.lineage
    }

    pub fn editor(&self) -> &ResourceEditor {
        &self.editor
    }

    /// Roll back the production write of a completed request.
    pub fn rollback(&self, request_id: Uuid, caller: &Caller) -> PromotionResult<RollbackOutcome> {
        if !caller.is_superadmin() {
            return Err(PromotionError::unauthorized("rollback requires a superadmin"));
        }
        let request = self.workflow.get(request_id)?;
        if request.status != PromotionStatus::Completed {
            return Err(PromotionError::InvalidTransition {
                from: request.status,
                action: "roll back",
            });
        }
        let snapshot_id = request
            .execution_result
            .as_ref()
            .and_then(|r| r.snapshot_id)
            .ok_or_else(|| {
                PromotionError::not_found(format!("snapshot of promotion request {}", request_id))
            })?;

        let outcome = self.snapshots.rollback(snapshot_id, caller)?;
        info!(%request_id, %snapshot_id, "promotion rolled back");
        Ok(outcome)
    }

    /// Staging/production comparison for one resource.
    pub fn compare(&self, resource_id: &str) -> PromotionResult<VersionComparison> {
        let mut tx = self.store.begin();
        let staging = tx.resource(Environment::Staging, resource_id)?;
        let production = tx.resource(Environment::Production, resource_id)?;
        if staging.is_none() && production.is_none() {
            return Err(PromotionError::not_found(format!("resource {}", resource_id)));
        }
        Ok(ConflictDetector::compare(
            resource_id,
            staging.as_ref(),
            production.as_ref(),
            self.clock.now(),
        ))
    }
}
