//! Promotion request lifecycle
//!
//! Opening, two-tier approval, rejection, cancellation and conflict
//! resolution. Each operation is one store transaction: it reads the
//! request, checks the caller and the transition, writes the new request
//! and commits. A concurrent change to the same request makes the commit
//! fail with contention instead of silently overwriting it.
//!
//! Before the superadmin approval, conflicts are re-detected against current
//! production. New drift sends the request back to `pending`, clears its
//! approvals and surfaces the conflicts.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::conflict::{ConflictDetector, ConflictResolution};
use super::errors::{PromotionError, PromotionResult};
use super::request::{Approval, Caller, OpenPromotion, PromotionRequest, Rejection, Role};
use super::state::{PromotionStatus, StatusFilter};
use crate::clock::Clock;
use crate::resource::{diff_fields, fields_of, Environment};
use crate::store::{Store, Transaction};

#[derive(Clone)]
pub struct PromotionWorkflow {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

fn load(tx: &mut dyn Transaction, id: Uuid) -> PromotionResult<PromotionRequest> {
    tx.request(id)?
        .ok_or_else(|| PromotionError::not_found(format!("promotion request {}", id)))
}

impl PromotionWorkflow {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Open a request to promote the staging copy of a resource.
    ///
    /// The current production version becomes the request's baseline.
    pub fn open(&self, input: OpenPromotion, caller: &Caller) -> PromotionResult<PromotionRequest> {
        let resource_id = input.resource_id.trim();
        if resource_id.is_empty() {
            return Err(PromotionError::validation("resourceId is required"));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin();
        let staging = tx
            .resource(Environment::Staging, resource_id)?
            .ok_or_else(|| {
                PromotionError::not_found(format!("staging copy of resource {}", resource_id))
            })?;

        if !caller.is_superadmin() && !caller.belongs_to(&staging.organization_id) {
            return Err(PromotionError::unauthorized(format!(
                "user {} is not a member of organization {}",
                caller.user_id, staging.organization_id
            )));
        }

        let production = tx.resource(Environment::Production, resource_id)?;
        let changes = diff_fields(&fields_of(production.as_ref()), &staging.fields);
        if changes.is_empty() {
            return Err(PromotionError::validation(format!(
                "staging and production copies of {} are identical",
                resource_id
            )));
        }

        let request = PromotionRequest {
            id: Uuid::new_v4(),
            organization_id: staging.organization_id.clone(),
            resource_type: staging.resource_type,
            resource_id: resource_id.to_string(),
            resource_name: staging.name.clone(),
            source_environment: Environment::Staging,
            destination_environment: Environment::Production,
            baseline_version: production.as_ref().map(|p| p.version).unwrap_or(0),
            staging_version: staging.version,
            changes,
            status: PromotionStatus::Pending,
            requested_by: caller.user_id.clone(),
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            approvals: Vec::new(),
            rejections: Vec::new(),
            conflicts: Vec::new(),
            cancelled_at: None,
            executed_at: None,
            executed_by: None,
            execution_result: None,
            created_at: now,
            updated_at: now,
        };

        tx.put_request(request.clone())?;
        tx.commit()?;

        info!(
            request_id = %request.id,
            resource_id = %request.resource_id,
            baseline_version = request.baseline_version,
            requested_by = %request.requested_by,
            "promotion requested"
        );
        Ok(request)
    }

    pub fn get(&self, id: Uuid) -> PromotionResult<PromotionRequest> {
        let mut tx = self.store.begin();
        load(tx.as_mut(), id)
    }

    /// Requests of one organization, newest first.
    pub fn list(
        &self,
        organization_id: &str,
        filter: Option<StatusFilter>,
    ) -> PromotionResult<Vec<PromotionRequest>> {
        let mut tx = self.store.begin();
        let mut requests: Vec<PromotionRequest> = tx
            .requests(organization_id)?
            .into_iter()
            .filter(|r| filter.map_or(true, |f| f.matches(r.status)))
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(requests)
    }

    /// Record an approval at the stage the request is in.
    ///
    /// Repeating an approval already given by the same user in the same role
    /// returns the request unchanged while the request is still open.
    pub fn approve(
        &self,
        id: Uuid,
        caller: &Caller,
        notes: Option<String>,
    ) -> PromotionResult<PromotionRequest> {
        let now = self.clock.now();
        let mut tx = self.store.begin();
        let mut request = load(tx.as_mut(), id)?;

        if request.status.is_terminal() || request.status == PromotionStatus::Executing {
            return Err(PromotionError::InvalidTransition {
                from: request.status,
                action: "approve",
            });
        }
        if request.has_approval(&caller.user_id, caller.role) {
            return Ok(request);
        }

        match request.status {
            PromotionStatus::Pending => {
                if !caller.is_org_admin(&request.organization_id) {
                    return Err(PromotionError::unauthorized(format!(
                        "first approval requires an admin of organization {}",
                        request.organization_id
                    )));
                }
                if request.has_unresolved_conflicts() {
                    return Err(PromotionError::ConflictDetected {
                        conflicts: request.unresolved_conflicts().cloned().collect(),
                    });
                }
                request.status = request.status.approve_org()?;
            }
            PromotionStatus::ApprovedOrg => {
                if caller.role != Role::Superadmin {
                    return Err(PromotionError::unauthorized(
                        "second approval requires a superadmin",
                    ));
                }
                if let Some(first) = request.approval_by(Role::Admin) {
                    if first.user_id == caller.user_id {
                        return Err(PromotionError::SelfApproval {
                            user_id: caller.user_id.clone(),
                        });
                    }
                }

                let staging = tx.resource(Environment::Staging, &request.resource_id)?;
                let production = tx.resource(Environment::Production, &request.resource_id)?;
                let detected = ConflictDetector::detect(
                    &request.resource_id,
                    staging.as_ref(),
                    production.as_ref(),
                    request.baseline_version,
                    now,
                );
                let merge = ConflictDetector::merge(&request.conflicts, detected);
                if !merge.unresolved.is_empty() {
                    request.return_to_pending(merge.conflicts, now)?;
                    tx.put_request(request.clone())?;
                    tx.commit()?;
                    warn!(
                        request_id = %id,
                        conflicts = merge.unresolved.len(),
                        "production drifted before final approval; request returned to pending"
                    );
                    return Err(PromotionError::ConflictDetected {
                        conflicts: merge.unresolved,
                    });
                }
                request.conflicts = merge.conflicts;
                request.status = request.status.approve_super()?;
            }
            other => {
                return Err(PromotionError::InvalidTransition {
                    from: other,
                    action: "approve",
                })
            }
        }

        request.approvals.push(Approval {
            user_id: caller.user_id.clone(),
            role: caller.role,
            approved_at: now,
            notes: notes.filter(|n| !n.trim().is_empty()),
        });
        request.updated_at = now;
        tx.put_request(request.clone())?;
        tx.commit()?;

        info!(
            request_id = %id,
            status = %request.status,
            approved_by = %caller.user_id,
            role = %caller.role,
            "promotion approved"
        );
        Ok(request)
    }

    /// Deny a request. Terminal.
    pub fn reject(&self, id: Uuid, caller: &Caller, reason: &str) -> PromotionResult<PromotionRequest> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(PromotionError::validation("a rejection reason is required"));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin();
        let mut request = load(tx.as_mut(), id)?;

        if !caller.can_moderate(&request.organization_id) {
            return Err(PromotionError::unauthorized(
                "rejection requires an org admin or superadmin",
            ));
        }

        request.status = request.status.reject()?;
        request.rejections.push(Rejection {
            user_id: caller.user_id.clone(),
            role: caller.role,
            rejected_at: now,
            reason: reason.to_string(),
        });
        request.updated_at = now;
        tx.put_request(request.clone())?;
        tx.commit()?;

        info!(request_id = %id, rejected_by = %caller.user_id, reason, "promotion rejected");
        Ok(request)
    }

    /// Withdraw a request before it is fully approved. Requester only.
    pub fn cancel(&self, id: Uuid, caller: &Caller) -> PromotionResult<PromotionRequest> {
        let now = self.clock.now();
        let mut tx = self.store.begin();
        let mut request = load(tx.as_mut(), id)?;

        if request.requested_by != caller.user_id {
            return Err(PromotionError::unauthorized(
                "only the requester can cancel a promotion",
            ));
        }

        request.status = request.status.cancel()?;
        request.cancelled_at = Some(now);
        request.updated_at = now;
        tx.put_request(request.clone())?;
        tx.commit()?;

        info!(request_id = %id, "promotion cancelled");
        Ok(request)
    }

    /// Settle one recorded conflict on a pending request.
    pub fn resolve_conflict(
        &self,
        id: Uuid,
        caller: &Caller,
        field: &str,
        resolution: ConflictResolution,
        merged_value: Option<Value>,
    ) -> PromotionResult<PromotionRequest> {
        let now = self.clock.now();
        let mut tx = self.store.begin();
        let mut request = load(tx.as_mut(), id)?;

        if !caller.can_moderate(&request.organization_id) {
            return Err(PromotionError::unauthorized(
                "resolving conflicts requires an org admin or superadmin",
            ));
        }
        if request.status != PromotionStatus::Pending {
            return Err(PromotionError::InvalidTransition {
                from: request.status,
                action: "resolve conflicts on",
            });
        }

        let conflict = request
            .conflicts
            .iter_mut()
            .find(|c| c.field == field)
            .ok_or_else(|| {
                PromotionError::not_found(format!("conflict on field '{}' of request {}", field, id))
            })?;
        conflict.resolve(resolution, merged_value, &caller.user_id)?;

        request.updated_at = now;
        tx.put_request(request.clone())?;
        tx.commit()?;

        info!(
            request_id = %id,
            field,
            resolution = resolution.as_str(),
            resolved_by = %caller.user_id,
            "conflict resolved"
        );
        Ok(request)
    }
}
