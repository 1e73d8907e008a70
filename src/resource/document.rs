//! Versioned resource documents and field diffs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::environment::Environment;

/// Document body: field name to JSON value, ordered for deterministic diffs.
pub type Fields = BTreeMap<String, Value>;

/// Kind of promotable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Organization,
    Agent,
    ContextSource,
    User,
    Settings,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Organization => "organization",
            ResourceType::Agent => "agent",
            ResourceType::ContextSource => "context_source",
            ResourceType::User => "user",
            ResourceType::Settings => "settings",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One environment's copy of a resource.
///
/// `id` is stable across environments; `version` is the per-environment
/// counter and only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDocument {
    pub id: String,
    pub resource_type: ResourceType,
    pub organization_id: String,
    pub name: String,
    pub version: u64,
    pub last_modified_in: Environment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production_version: Option<u64>,
    #[serde(default)]
    pub has_conflict: bool,
    #[serde(default)]
    pub fields: Fields,
    pub updated_at: DateTime<Utc>,
}

impl ResourceDocument {
    /// Value of a body field, if present.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// A single field difference between two document bodies.
///
/// `None` on either side means the field is absent there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeField {
    pub field: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Compute the field-level diff from `old` to `new`, sorted by field name.
pub fn diff_fields(old: &Fields, new: &Fields) -> Vec<ChangeField> {
    let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    names
        .into_iter()
        .filter_map(|name| {
            let before = old.get(name);
            let after = new.get(name);
            if before == after {
                return None;
            }
            Some(ChangeField {
                field: name.clone(),
                old_value: before.cloned(),
                new_value: after.cloned(),
            })
        })
        .collect()
}

/// Body of an optional document; absent documents diff as empty.
pub fn fields_of(doc: Option<&ResourceDocument>) -> Fields {
    doc.map(|d| d.fields.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_diff_reports_changed_added_and_removed() {
        let old = fields(&[("color", json!("blue")), ("logo", json!("a.png"))]);
        let new = fields(&[("color", json!("red")), ("model", json!("large"))]);

        let diff = diff_fields(&old, &new);
        let names: Vec<_> = diff.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(names, vec!["color", "logo", "model"]);

        assert_eq!(diff[0].old_value, Some(json!("blue")));
        assert_eq!(diff[0].new_value, Some(json!("red")));
        assert_eq!(diff[1].new_value, None);
        assert_eq!(diff[2].old_value, None);
    }

    #[test]
    fn test_diff_of_identical_bodies_is_empty() {
        let body = fields(&[("prompt", json!({"temperature": 0.2}))]);
        assert!(diff_fields(&body, &body.clone()).is_empty());
    }

    #[test]
    fn test_document_serializes_camel_case() {
        let doc = ResourceDocument {
            id: "agent-42".into(),
            resource_type: ResourceType::ContextSource,
            organization_id: "salfa".into(),
            name: "Docs".into(),
            version: 3,
            last_modified_in: Environment::Staging,
            staging_version: None,
            production_version: Some(2),
            has_conflict: false,
            fields: Fields::new(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["lastModifiedIn"], "staging");
        assert_eq!(json["resourceType"], "context_source");
        assert_eq!(json["productionVersion"], 2);
        assert!(json.get("stagingVersion").is_none());
    }
}
