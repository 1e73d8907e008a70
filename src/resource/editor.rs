//! Direct edits to one environment's copy of a resource
//!
//! Every save bumps the copy's version and appends a `created` or `updated`
//! lineage event in the same transaction; deletes append `deleted`. Plain
//! members may not touch production directly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::document::{diff_fields, fields_of, Fields, ResourceDocument, ResourceType};
use super::environment::Environment;
use crate::clock::Clock;
use crate::promotion::{
    Caller, DataLineageEvent, LineageAction, LineageRecorder, PromotionError, PromotionResult,
};
use crate::store::Store;

/// Desired content of a resource copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDraft {
    pub resource_type: ResourceType,
    pub organization_id: String,
    pub name: String,
    #[serde(default)]
    pub fields: Fields,
}

#[derive(Clone)]
pub struct ResourceEditor {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    lineage: LineageRecorder,
}

impl ResourceEditor {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, lineage: LineageRecorder) -> Self {
        Self {
            store,
            clock,
            lineage,
        }
    }

    /// Members edit their organization's staging and localhost copies;
    /// production outside a promotion takes an org admin or a superadmin.
    fn authorize(caller: &Caller, env: Environment, organization_id: &str) -> PromotionResult<()> {
        if !caller.is_superadmin() && !caller.belongs_to(organization_id) {
            return Err(PromotionError::unauthorized(format!(
                "user {} cannot edit resources of organization {}",
                caller.user_id, organization_id
            )));
        }
        if env == Environment::Production && !caller.can_moderate(organization_id) {
            return Err(PromotionError::unauthorized(format!(
                "user {} cannot edit production directly; open a promotion instead",
                caller.user_id
            )));
        }
        Ok(())
    }

    pub fn get(&self, env: Environment, id: &str) -> PromotionResult<ResourceDocument> {
        let mut tx = self.store.begin();
        tx.resource(env, id)?
            .ok_or_else(|| PromotionError::not_found(format!("{} copy of resource {}", env, id)))
    }

    /// Create or replace one environment's copy.
    ///
    /// Saving identical content is a no-op and returns the current copy.
    pub fn save(
        &self,
        env: Environment,
        id: &str,
        draft: ResourceDraft,
        caller: &Caller,
    ) -> PromotionResult<ResourceDocument> {
        if id.trim().is_empty() {
            return Err(PromotionError::validation("resource id must not be empty"));
        }
        if draft.name.trim().is_empty() {
            return Err(PromotionError::validation("resource name must not be empty"));
        }
        Self::authorize(caller, env, &draft.organization_id)?;

        let now = self.clock.now();
        let mut tx = self.store.begin();
        let existing = tx.resource(env, id)?;

        if let Some(ref current) = existing {
            if current.organization_id != draft.organization_id {
                return Err(PromotionError::validation(format!(
                    "resource {} belongs to organization {}",
                    id, current.organization_id
                )));
            }
            if current.resource_type != draft.resource_type {
                return Err(PromotionError::validation(format!(
                    "resource {} is a {}, not a {}",
                    id, current.resource_type, draft.resource_type
                )));
            }
            if current.fields == draft.fields && current.name == draft.name {
                return Ok(current.clone());
            }
        }

        // Each copy remembers the other environment's version at the time of
        // the edit; comparisons measure drift from there.
        let other = match env {
            Environment::Staging => tx.resource(Environment::Production, id)?,
            Environment::Production => tx.resource(Environment::Staging, id)?,
            Environment::Localhost => None,
        };
        let version = tx.next_version(env, id)?;
        let doc = ResourceDocument {
            id: id.to_string(),
            resource_type: draft.resource_type,
            organization_id: draft.organization_id,
            name: draft.name,
            version,
            last_modified_in: env,
            staging_version: match env {
                Environment::Staging => Some(version),
                _ => other.as_ref().map(|o| o.version),
            },
            production_version: match env {
                Environment::Production => Some(version),
                _ => other.as_ref().map(|o| o.version),
            },
            has_conflict: existing.as_ref().map(|e| e.has_conflict).unwrap_or(false),
            fields: draft.fields,
            updated_at: now,
        };

        let action = if existing.is_some() {
            LineageAction::Updated
        } else {
            LineageAction::Created
        };
        let event = DataLineageEvent::new(action, &doc, env, &caller.user_id, now)
            .with_changes(diff_fields(&fields_of(existing.as_ref()), &doc.fields));

        tx.put_resource(env, doc.clone())?;
        tx.append_lineage(event)?;
        let outcome = tx.commit()?;
        self.lineage.publish(&outcome.lineage);

        info!(
            resource_id = %doc.id,
            environment = %env,
            version = doc.version,
            action = %action,
            performed_by = %caller.user_id,
            "resource saved"
        );
        Ok(doc)
    }

    /// Remove one environment's copy.
    pub fn delete(&self, env: Environment, id: &str, caller: &Caller) -> PromotionResult<()> {
        let now = self.clock.now();
        let mut tx = self.store.begin();
        let existing = tx
            .resource(env, id)?
            .ok_or_else(|| PromotionError::not_found(format!("{} copy of resource {}", env, id)))?;
        Self::authorize(caller, env, &existing.organization_id)?;

        let event = DataLineageEvent::new(LineageAction::Deleted, &existing, env, &caller.user_id, now)
            .with_changes(diff_fields(&existing.fields, &Fields::new()));

        tx.delete_resource(env, id)?;
        tx.append_lineage(event)?;
        let outcome = tx.commit()?;
        self.lineage.publish(&outcome.lineage);

        info!(
            resource_id = %id,
            environment = %env,
            performed_by = %caller.user_id,
            "resource deleted"
        );
        Ok(())
    }
}
