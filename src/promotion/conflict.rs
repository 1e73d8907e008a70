//! Version comparison and field-level conflict detection
//!
//! A request records the production version it was opened against (its
//! baseline). If production has since advanced, every field where staging
//! and production now disagree is a conflict: the staging edit was made
//! without seeing the production change, and promoting blindly would
//! overwrite it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::errors::{PromotionError, PromotionResult};
use crate::resource::{fields_of, Fields, ResourceDocument};

/// How an operator settled a conflicting field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Promote the staging value
    UseStaging,
    /// Keep the production value
    UseProduction,
    /// Promote an operator-supplied value
    Merge,
    /// Leave the field out of the promotion
    Skip,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UseStaging => "use-staging",
            Self::UseProduction => "use-production",
            Self::Merge => "merge",
            Self::Skip => "skip",
        }
    }
}

/// A field changed on both sides since the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub field: String,
    pub staging_value: Option<Value>,
    pub production_value: Option<Value>,
    pub staging_version: u64,
    pub production_version: u64,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl Conflict {
    /// Record an operator's decision. `merge` needs the value to promote.
    pub fn resolve(
        &mut self,
        resolution: ConflictResolution,
        merged_value: Option<Value>,
        resolved_by: &str,
    ) -> PromotionResult<()> {
        if resolution == ConflictResolution::Merge && merged_value.is_none() {
            return Err(PromotionError::validation(format!(
                "resolving '{}' with merge requires mergedValue",
                self.field
            )));
        }
        self.resolved = true;
        self.resolution = Some(resolution);
        self.merged_value = match resolution {
            ConflictResolution::Merge => merged_value,
            _ => None,
        };
        self.resolved_by = Some(resolved_by.to_string());
        Ok(())
    }

    /// A resolution covers only the production state it was made against.
    fn covers(&self, detected: &Conflict) -> bool {
        self.resolved
            && self.field == detected.field
            && self.production_version == detected.production_version
    }
}

/// Relationship between the baseline and current production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftStatus {
    /// Production is still at the baseline
    Clean,
    /// Production advanced but agrees with staging on every field
    Stale,
    /// Production advanced and disagrees with staging
    Conflicting,
}

/// Side-by-side view of one resource across environments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionComparison {
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production_version: Option<u64>,
    pub drift: DriftStatus,
    pub has_conflict: bool,
    pub conflicts: Vec<Conflict>,
}

/// Result of folding freshly detected conflicts into a request's record.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictMerge {
    /// The request's new conflict list.
    pub conflicts: Vec<Conflict>,
    /// Detected conflicts no existing resolution covers.
    pub unresolved: Vec<Conflict>,
}

pub struct ConflictDetector;

impl ConflictDetector {
    /// Field-level conflicts between staging and production relative to
    /// `baseline_version`.
    pub fn detect(
        resource_id: &str,
        staging: Option<&ResourceDocument>,
        production: Option<&ResourceDocument>,
        baseline_version: u64,
        detected_at: DateTime<Utc>,
    ) -> Vec<Conflict> {
        let production_version = production.map(|p| p.version).unwrap_or(0);
        if production_version <= baseline_version {
            return Vec::new();
        }

        let staging_version = staging.map(|s| s.version).unwrap_or(0);
        let staging_fields = fields_of(staging);
        let production_fields = fields_of(production);

        let mut names: Vec<&String> = staging_fields
            .keys()
            .chain(production_fields.keys())
            .collect();
        names.sort();
        names.dedup();

        let conflicts: Vec<Conflict> = names
            .into_iter()
            .filter_map(|field| {
                let staging_value = staging_fields.get(field);
                let production_value = production_fields.get(field);
                if staging_value == production_value {
                    return None;
                }
                Some(Conflict {
                    field: field.clone(),
                    staging_value: staging_value.cloned(),
                    production_value: production_value.cloned(),
                    staging_version,
                    production_version,
                    detected_at,
                    resolved: false,
                    resolution: None,
                    merged_value: None,
                    resolved_by: None,
                })
            })
            .collect();

        debug!(
            resource_id,
            baseline_version,
            production_version,
            conflicts = conflicts.len(),
            "production advanced past baseline"
        );
        conflicts
    }

    pub fn classify(
        production: Option<&ResourceDocument>,
        baseline_version: u64,
        conflicts: &[Conflict],
    ) -> DriftStatus {
        let production_version = production.map(|p| p.version).unwrap_or(0);
        if production_version <= baseline_version {
            DriftStatus::Clean
        } else if conflicts.is_empty() {
            DriftStatus::Stale
        } else {
            DriftStatus::Conflicting
        }
    }

    /// Compare a resource's two copies, using the production version staging
    /// saw at its last edit as the baseline.
    pub fn compare(
        resource_id: &str,
        staging: Option<&ResourceDocument>,
        production: Option<&ResourceDocument>,
        now: DateTime<Utc>,
    ) -> VersionComparison {
        let baseline = match staging {
            Some(s) => s.production_version.unwrap_or(0),
            None => production.map(|p| p.version).unwrap_or(0),
        };
        let conflicts = Self::detect(resource_id, staging, production, baseline, now);
        let drift = Self::classify(production, baseline, &conflicts);
        VersionComparison {
            resource_id: resource_id.to_string(),
            staging_version: staging.map(|s| s.version),
            production_version: production.map(|p| p.version),
            drift,
            has_conflict: !conflicts.is_empty(),
            conflicts,
        }
    }

    /// Fold `detected` into the conflicts already recorded on a request.
    ///
    /// A recorded resolution carries over when it was made against the same
    /// production version; anything else is unresolved.
    pub fn merge(recorded: &[Conflict], detected: Vec<Conflict>) -> ConflictMerge {
        let mut conflicts = Vec::with_capacity(detected.len());
        let mut unresolved = Vec::new();
        for conflict in detected {
            match recorded.iter().find(|r| r.covers(&conflict)) {
                Some(resolution) => conflicts.push(resolution.clone()),
                None => {
                    unresolved.push(conflict.clone());
                    conflicts.push(conflict);
                }
            }
        }
        ConflictMerge {
            conflicts,
            unresolved,
        }
    }

    /// Field set to write to production: staging, overridden per resolved
    /// conflict.
    pub fn apply_resolutions(
        staging: &Fields,
        production: &Fields,
        conflicts: &[Conflict],
    ) -> Fields {
        let mut promoted = staging.clone();
        for conflict in conflicts.iter().filter(|c| c.resolved) {
            let value = match conflict.resolution {
                Some(ConflictResolution::UseStaging) | None => continue,
                Some(ConflictResolution::UseProduction) | Some(ConflictResolution::Skip) => {
                    production.get(&conflict.field).cloned()
                }
                Some(ConflictResolution::Merge) => conflict.merged_value.clone(),
            };
            match value {
                Some(value) => {
                    promoted.insert(conflict.field.clone(), value);
                }
                None => {
                    promoted.remove(&conflict.field);
                }
            }
        }
        promoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Environment, ResourceType};
    use serde_json::json;

    fn doc(env: Environment, version: u64, fields: Value) -> ResourceDocument {
        let fields: Fields = serde_json::from_value(fields).unwrap();
        ResourceDocument {
            id: "agent-42".into(),
            resource_type: ResourceType::Agent,
            organization_id: "acme".into(),
            name: "Support bot".into(),
            version,
            last_modified_in: env,
            staging_version: None,
            production_version: None,
            has_conflict: false,
            fields,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_conflicts_at_baseline() {
        let staging = doc(Environment::Staging, 9, json!({"prompt": "Hello"}));
        let production = doc(Environment::Production, 4, json!({"prompt": "Hi"}));
        let conflicts =
            ConflictDetector::detect("agent-42", Some(&staging), Some(&production), 4, Utc::now());
        assert!(conflicts.is_empty());
        assert_eq!(
            ConflictDetector::classify(Some(&production), 4, &conflicts),
            DriftStatus::Clean
        );
    }

    #[test]
    fn test_advanced_production_reports_differing_fields() {
        let staging = doc(
            Environment::Staging,
            9,
            json!({"prompt": "Hello", "temperature": 0.7, "model": "m1"}),
        );
        let production = doc(
            Environment::Production,
            5,
            json!({"prompt": "Hey", "temperature": 0.7, "tools": ["search"]}),
        );
        let conflicts =
            ConflictDetector::detect("agent-42", Some(&staging), Some(&production), 4, Utc::now());

        let fields: Vec<&str> = conflicts.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["model", "prompt", "tools"]);
        let prompt = &conflicts[1];
        assert_eq!(prompt.staging_value, Some(json!("Hello")));
        assert_eq!(prompt.production_value, Some(json!("Hey")));
        assert_eq!(prompt.production_version, 5);
        assert_eq!(prompt.staging_version, 9);
        assert!(!prompt.resolved);
        assert_eq!(conflicts[2].staging_value, None);
    }

    #[test]
    fn test_advanced_but_identical_is_stale() {
        let staging = doc(Environment::Staging, 9, json!({"prompt": "Hey"}));
        let production = doc(Environment::Production, 5, json!({"prompt": "Hey"}));
        let conflicts =
            ConflictDetector::detect("agent-42", Some(&staging), Some(&production), 4, Utc::now());
        assert!(conflicts.is_empty());
        assert_eq!(
            ConflictDetector::classify(Some(&production), 4, &conflicts),
            DriftStatus::Stale
        );
    }

    #[test]
    fn test_resolution_survives_same_production_version() {
        let staging = doc(Environment::Staging, 9, json!({"prompt": "Hello"}));
        let production = doc(Environment::Production, 5, json!({"prompt": "Hey"}));
        let now = Utc::now();
        let mut recorded =
            ConflictDetector::detect("agent-42", Some(&staging), Some(&production), 4, now);
        recorded[0]
            .resolve(ConflictResolution::UseStaging, None, "alice")
            .unwrap();

        let again = ConflictDetector::detect("agent-42", Some(&staging), Some(&production), 4, now);
        let merge = ConflictDetector::merge(&recorded, again);
        assert!(merge.unresolved.is_empty());
        assert!(merge.conflicts[0].resolved);

        // Production moves again: the old resolution no longer applies
        let production = doc(Environment::Production, 6, json!({"prompt": "Yo"}));
        let again = ConflictDetector::detect("agent-42", Some(&staging), Some(&production), 4, now);
        let merge = ConflictDetector::merge(&recorded, again);
        assert_eq!(merge.unresolved.len(), 1);
        assert_eq!(merge.unresolved[0].production_version, 6);
    }

    #[test]
    fn test_merge_requires_value() {
        let staging = doc(Environment::Staging, 9, json!({"prompt": "Hello"}));
        let production = doc(Environment::Production, 5, json!({"prompt": "Hey"}));
        let mut conflicts =
            ConflictDetector::detect("agent-42", Some(&staging), Some(&production), 4, Utc::now());

        let err = conflicts[0]
            .resolve(ConflictResolution::Merge, None, "alice")
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(!conflicts[0].resolved);
    }

    #[test]
    fn test_apply_resolutions() {
        let staging: Fields = serde_json::from_value(json!({
            "prompt": "Hello", "temperature": 0.7, "model": "m2", "tools": ["a"]
        }))
        .unwrap();
        let production: Fields = serde_json::from_value(json!({
            "prompt": "Hey", "temperature": 0.1, "model": "m1"
        }))
        .unwrap();
        let base = Conflict {
            field: String::new(),
            staging_value: None,
            production_value: None,
            staging_version: 9,
            production_version: 5,
            detected_at: Utc::now(),
            resolved: false,
            resolution: None,
            merged_value: None,
            resolved_by: None,
        };
        let mut conflicts = Vec::new();
        for (field, resolution, merged) in [
            ("prompt", ConflictResolution::UseStaging, None),
            ("temperature", ConflictResolution::UseProduction, None),
            ("model", ConflictResolution::Merge, Some(json!("m3"))),
            ("tools", ConflictResolution::Skip, None),
        ] {
            let mut conflict = Conflict {
                field: field.into(),
                ..base.clone()
            };
            conflict.resolve(resolution, merged, "alice").unwrap();
            conflicts.push(conflict);
        }

        let promoted = ConflictDetector::apply_resolutions(&staging, &production, &conflicts);
        assert_eq!(promoted["prompt"], json!("Hello"));
        assert_eq!(promoted["temperature"], json!(0.1));
        assert_eq!(promoted["model"], json!("m3"));
        assert!(!promoted.contains_key("tools"));
    }

    #[test]
    fn test_compare_uses_recorded_production_version() {
        let mut staging = doc(Environment::Staging, 9, json!({"prompt": "Hello"}));
        staging.production_version = Some(4);
        let production = doc(Environment::Production, 5, json!({"prompt": "Hey"}));

        let view =
            ConflictDetector::compare("agent-42", Some(&staging), Some(&production), Utc::now());
        assert!(view.has_conflict);
        assert_eq!(view.drift, DriftStatus::Conflicting);
        assert_eq!(view.staging_version, Some(9));
        assert_eq!(view.production_version, Some(5));

        staging.production_version = Some(5);
        let view =
            ConflictDetector::compare("agent-42", Some(&staging), Some(&production), Utc::now());
        assert!(!view.has_conflict);
        assert_eq!(view.drift, DriftStatus::Clean);
    }
}
