//! Data lineage log
//!
//! An append-only record of every write to a resource: editor saves and
//! deletes, promotions and rollbacks. Events are written in the same store
//! transaction as the change they describe, so a change and its lineage are
//! committed together or not at all. Events are never updated or deleted.
//!
//! After commit, events are mirrored to an optional [`LineageSink`] (a JSON
//! lines file in production deployments). The store remains authoritative;
//! a failing sink is logged and does not undo the change.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::errors::{PromotionError, PromotionResult};
use crate::resource::{ChangeField, Environment, ResourceDocument, ResourceType};
use crate::store::Store;

/// Default cap on organization-wide lineage queries.
pub const DEFAULT_QUERY_LIMIT: usize = 1000;

/// What happened to the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineageAction {
    Created,
    Updated,
    Deleted,
    Promoted,
    RolledBack,
}

impl LineageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineageAction::Created => "created",
            LineageAction::Updated => "updated",
            LineageAction::Deleted => "deleted",
            LineageAction::Promoted => "promoted",
            LineageAction::RolledBack => "rolled-back",
        }
    }
}

impl fmt::Display for LineageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LineageAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(LineageAction::Created),
            "updated" => Ok(LineageAction::Updated),
            "deleted" => Ok(LineageAction::Deleted),
            "promoted" => Ok(LineageAction::Promoted),
            "rolled-back" => Ok(LineageAction::RolledBack),
            other => Err(format!("unknown lineage action '{}'", other)),
        }
    }
}

/// One immutable entry in the lineage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataLineageEvent {
    pub id: Uuid,
    /// Commit order across the whole log; assigned by the store.
    pub sequence: u64,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub organization_id: String,
    pub action: LineageAction,
    /// Environment that was written.
    pub source: Environment,
    pub performed_by: String,
    pub changes: Vec<ChangeField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_request_id: Option<Uuid>,
    /// Environment the data came from, for promotions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_source: Option<Environment>,
    pub timestamp: DateTime<Utc>,
}

impl DataLineageEvent {
    /// New event describing a write to `doc` in `source`.
    pub fn new(
        action: LineageAction,
        doc: &ResourceDocument,
        source: Environment,
        performed_by: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            resource_id: doc.id.clone(),
            resource_type: doc.resource_type,
            organization_id: doc.organization_id.clone(),
            action,
            source,
            performed_by: performed_by.into(),
            changes: Vec::new(),
            promotion_request_id: None,
            previous_source: None,
            timestamp,
        }
    }

    pub fn with_changes(mut self, changes: Vec<ChangeField>) -> Self {
        self.changes = changes;
        self
    }

    /// Tie the event to the promotion request that caused it.
    pub fn with_promotion(mut self, request_id: Uuid, previous_source: Environment) -> Self {
        self.promotion_request_id = Some(request_id);
        self.previous_source = Some(previous_source);
        self
    }

    /// Serialize to a single JSON line.
    pub fn to_json_line(&self) -> io::Result<String> {
        serde_json::to_string(self).map_err(io::Error::from)
    }
}

/// Selection over the lineage log. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineageFilter {
    pub resource_id: Option<String>,
    pub organization_id: Option<String>,
    pub action: Option<LineageAction>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl LineageFilter {
    pub fn for_resource(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: Some(resource_id.into()),
            ..Self::default()
        }
    }

    pub fn for_organization(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: Some(organization_id.into()),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: LineageAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Inclusive time window.
    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn matches(&self, event: &DataLineageEvent) -> bool {
        if let Some(ref id) = self.resource_id {
            if &event.resource_id != id {
                return false;
            }
        }
        if let Some(ref org) = self.organization_id {
            if &event.organization_id != org {
                return false;
            }
        }
        if let Some(action) = self.action {
            if event.action != action {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// Durable mirror for committed lineage events.
pub trait LineageSink: Send + Sync {
    /// Append one event. Must be durable when this returns.
    fn append(&self, event: &DataLineageEvent) -> io::Result<()>;

    fn sync(&self) -> io::Result<()>;
}

/// Append-only JSON lines file, synced after every event.
pub struct FileLineageSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileLineageSink {
    /// Open or create the lineage file.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, BufWriter<File>>> {
        self.writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "lineage writer lock poisoned"))
    }
}

impl fmt::Debug for FileLineageSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLineageSink")
            .field("path", &self.path)
            .finish()
    }
}

impl LineageSink for FileLineageSink {
    fn append(&self, event: &DataLineageEvent) -> io::Result<()> {
        let line = event.to_json_line()?;
        let mut writer = self.lock()?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    fn sync(&self) -> io::Result<()> {
        let writer = self.lock()?;
        writer.get_ref().sync_all()
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemoryLineageSink {
    events: Mutex<Vec<DataLineageEvent>>,
}

impl MemoryLineageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DataLineageEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LineageSink for MemoryLineageSink {
    fn append(&self, event: &DataLineageEvent) -> io::Result<()> {
        self.events
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "lineage sink lock poisoned"))?
            .push(event.clone());
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Reads the lineage log and mirrors committed events to the sink.
#[derive(Clone)]
pub struct LineageRecorder {
    store: Arc<dyn Store>,
    sink: Option<Arc<dyn LineageSink>>,
    query_limit: usize,
}

impl LineageRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            sink: None,
            query_limit: DEFAULT_QUERY_LIMIT,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn LineageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_query_limit(mut self, limit: usize) -> Self {
        self.query_limit = limit;
        self
    }

    pub fn query_limit(&self) -> usize {
        self.query_limit
    }

    /// Append a standalone event in its own transaction.
    pub fn append(&self, event: DataLineageEvent) -> PromotionResult<DataLineageEvent> {
        let mut tx = self.store.begin();
        tx.append_lineage(event)?;
        let outcome = tx.commit()?;
        self.publish(&outcome.lineage);
        outcome
            .lineage
            .into_iter()
            .next()
            .ok_or_else(|| PromotionError::Execution("lineage event was not committed".into()))
    }

    /// Full history of one resource, oldest first.
    pub fn query(&self, resource_id: &str) -> PromotionResult<Vec<DataLineageEvent>> {
        let mut tx = self.store.begin();
        let mut events = tx.lineage(&LineageFilter::for_resource(resource_id))?;
        events.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.sequence.cmp(&b.sequence))
        });
        Ok(events)
    }

    /// Organization-wide history, newest first, capped at the query limit.
    pub fn query_organization(
        &self,
        filter: &LineageFilter,
        limit: Option<usize>,
    ) -> PromotionResult<Vec<DataLineageEvent>> {
        let limit = limit
            .map(|l| l.min(self.query_limit))
            .unwrap_or(self.query_limit);
        let mut tx = self.store.begin();
        let mut events = tx.lineage(filter)?;
        events.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(b.sequence.cmp(&a.sequence))
        });
        events.truncate(limit);
        Ok(events)
    }

    /// Mirror committed events to the sink.
    pub(crate) fn publish(&self, events: &[DataLineageEvent]) {
        let Some(sink) = &self.sink else {
            return;
        };
        for event in events {
            match sink.append(event) {
                Ok(()) => debug!(
                    sequence = event.sequence,
                    action = %event.action,
                    resource_id = %event.resource_id,
                    "lineage event mirrored"
                ),
                Err(err) => warn!(
                    sequence = event.sequence,
                    resource_id = %event.resource_id,
                    error = %err,
                    "failed to mirror lineage event"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Fields;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn doc(id: &str, org: &str) -> ResourceDocument {
        ResourceDocument {
            id: id.into(),
            resource_type: ResourceType::Agent,
            organization_id: org.into(),
            name: "Support bot".into(),
            version: 1,
            last_modified_in: Environment::Staging,
            staging_version: None,
            production_version: None,
            has_conflict: false,
            fields: Fields::new(),
            updated_at: Utc::now(),
        }
    }

    fn event(id: &str, org: &str, action: LineageAction, at: DateTime<Utc>) -> DataLineageEvent {
        DataLineageEvent::new(action, &doc(id, org), Environment::Staging, "dana", at)
    }

    #[test]
    fn test_filter_matches_all_criteria() {
        let now = Utc::now();
        let e = event("agent-1", "acme", LineageAction::Promoted, now);

        assert!(LineageFilter::default().matches(&e));
        assert!(LineageFilter::for_resource("agent-1").matches(&e));
        assert!(!LineageFilter::for_resource("agent-2").matches(&e));
        assert!(LineageFilter::for_organization("acme")
            .with_action(LineageAction::Promoted)
            .matches(&e));
        assert!(!LineageFilter::for_organization("acme")
            .with_action(LineageAction::Deleted)
            .matches(&e));
        assert!(LineageFilter::default()
            .between(Some(now), Some(now))
            .matches(&e));
        assert!(!LineageFilter::default()
            .between(Some(now + Duration::seconds(1)), None)
            .matches(&e));
    }

    #[test]
    fn test_append_assigns_increasing_sequence() {
        let recorder = LineageRecorder::new(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        let first = recorder
            .append(event("agent-1", "acme", LineageAction::Created, now))
            .unwrap();
        let second = recorder
            .append(event("agent-1", "acme", LineageAction::Updated, now))
            .unwrap();
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn test_resource_history_is_oldest_first() {
        let recorder = LineageRecorder::new(Arc::new(MemoryStore::new()));
        let start = Utc::now();
        recorder
            .append(event("agent-1", "acme", LineageAction::Updated, start + Duration::minutes(5)))
            .unwrap();
        recorder
            .append(event("agent-1", "acme", LineageAction::Created, start))
            .unwrap();
        recorder
            .append(event("agent-2", "acme", LineageAction::Created, start))
            .unwrap();

        let history = recorder.query("agent-1").unwrap();
        let actions: Vec<LineageAction> = history.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![LineageAction::Created, LineageAction::Updated]);
    }

    #[test]
    fn test_organization_history_is_newest_first_and_capped() {
        let recorder = LineageRecorder::new(Arc::new(MemoryStore::new())).with_query_limit(2);
        let start = Utc::now();
        for minutes in 0..4 {
            recorder
                .append(event(
                    "agent-1",
                    "acme",
                    LineageAction::Updated,
                    start + Duration::minutes(minutes),
                ))
                .unwrap();
        }
        recorder
            .append(event("agent-9", "globex", LineageAction::Updated, start))
            .unwrap();

        let events = recorder
            .query_organization(&LineageFilter::for_organization("acme"), None)
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, start + Duration::minutes(3));
        assert!(events.iter().all(|e| e.organization_id == "acme"));

        let events = recorder
            .query_organization(&LineageFilter::for_organization("acme"), Some(1))
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_memory_sink_receives_committed_events() {
        let sink = Arc::new(MemoryLineageSink::new());
        let recorder = LineageRecorder::new(Arc::new(MemoryStore::new())).with_sink(sink.clone());
        recorder
            .append(event("agent-1", "acme", LineageAction::Created, Utc::now()))
            .unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].sequence, 1);
    }

    #[test]
    fn test_file_sink_writes_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lineage.jsonl");
        let sink = FileLineageSink::open(&path).unwrap();

        let mut e = event("agent-1", "acme", LineageAction::RolledBack, Utc::now());
        e.changes.push(ChangeField {
            field: "prompt".into(),
            old_value: Some(json!("Hello")),
            new_value: Some(json!("Hi")),
        });
        sink.append(&e).unwrap();
        sink.append(&e).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: DataLineageEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.action, LineageAction::RolledBack);
        assert!(lines[0].contains("\"rolled-back\""));
        assert_eq!(parsed.changes[0].field, "prompt");
    }
}
