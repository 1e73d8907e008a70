//! In-memory store with optimistic transactions
//!
//! Reference implementation of [`Store`]. Each record carries a revision
//! counter; a transaction remembers the revision of everything it reads or
//! writes and refuses to commit if any of them moved in the meantime.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use super::{CommitOutcome, FaultPoint, RecordKey, Store, StoreError, StoreResult, Transaction};
use crate::promotion::{DataLineageEvent, LineageFilter, PromotionRequest, PromotionSnapshot};
use crate::resource::{Environment, ResourceDocument};

type ResourceSlot = (Environment, String);

#[derive(Debug, Default)]
struct StoreState {
    resources: HashMap<ResourceSlot, ResourceDocument>,
    high_water: HashMap<ResourceSlot, u64>,
    requests: HashMap<Uuid, PromotionRequest>,
    snapshots: HashMap<Uuid, PromotionSnapshot>,
    claims: HashMap<String, Uuid>,
    lineage: Vec<DataLineageEvent>,
    revisions: HashMap<RecordKey, u64>,
    last_sequence: u64,
}

impl StoreState {
    fn revision(&self, key: &RecordKey) -> u64 {
        self.revisions.get(key).copied().unwrap_or(0)
    }

    fn high_water(&self, slot: &ResourceSlot) -> u64 {
        self.high_water.get(slot).copied().unwrap_or(0)
    }
}

/// Thread-safe in-memory [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    armed: RwLock<HashSet<FaultPoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `point` fail until disarmed.
    pub fn arm_fault(&self, point: FaultPoint) {
        self.armed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(point);
    }

    pub fn disarm_fault(&self, point: FaultPoint) {
        self.armed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&point);
    }

    fn check_fault(&self, point: FaultPoint) -> StoreResult<()> {
        let armed = self.armed.read().map_err(|_| StoreError::LockPoisoned)?;
        if armed.contains(&point) {
            return Err(StoreError::InjectedFault(point));
        }
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Box<dyn Transaction + '_> {
        Box::new(MemoryTransaction {
            store: self,
            read_set: HashMap::new(),
            writes: HashMap::new(),
            pending_high_water: HashMap::new(),
            lineage: Vec::new(),
        })
    }
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Resource(Option<ResourceDocument>),
    Request(PromotionRequest),
    Snapshot(PromotionSnapshot),
    Claim(Option<Uuid>),
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    read_set: HashMap<RecordKey, u64>,
    writes: HashMap<RecordKey, PendingWrite>,
    pending_high_water: HashMap<ResourceSlot, u64>,
    lineage: Vec<DataLineageEvent>,
}

impl MemoryTransaction<'_> {
    fn observe(&mut self, key: &RecordKey, state: &StoreState) {
        if !self.read_set.contains_key(key) {
            self.read_set.insert(key.clone(), state.revision(key));
        }
    }

    fn observe_key(&mut self, key: &RecordKey) -> StoreResult<()> {
        let store = self.store;
        let state = store.read()?;
        self.observe(key, &state);
        Ok(())
    }

    fn current_high_water(&mut self, slot: &ResourceSlot) -> StoreResult<u64> {
        let key = RecordKey::Resource(slot.0, slot.1.clone());
        let store = self.store;
        let state = store.read()?;
        self.observe(&key, &state);
        let committed = state.high_water(slot);
        let pending = self.pending_high_water.get(slot).copied().unwrap_or(0);
        Ok(committed.max(pending))
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn resource(&mut self, env: Environment, id: &str) -> StoreResult<Option<ResourceDocument>> {
        let key = RecordKey::Resource(env, id.to_string());
        if let Some(PendingWrite::Resource(doc)) = self.writes.get(&key) {
            return Ok(doc.clone());
        }
        let store = self.store;
        let state = store.read()?;
        self.observe(&key, &state);
        Ok(state.resources.get(&(env, id.to_string())).cloned())
    }

    fn next_version(&mut self, env: Environment, id: &str) -> StoreResult<u64> {
        Ok(self.current_high_water(&(env, id.to_string()))? + 1)
    }

    fn put_resource(&mut self, env: Environment, doc: ResourceDocument) -> StoreResult<()> {
        if env == Environment::Production {
            self.store.check_fault(FaultPoint::ProductionWrite)?;
        }
        let slot = (env, doc.id.clone());
        let current = self.current_high_water(&slot)?;
        if doc.version <= current {
            return Err(StoreError::VersionRegression {
                resource_id: doc.id,
                environment: env,
                attempted: doc.version,
                current,
            });
        }
        self.pending_high_water.insert(slot, doc.version);
        self.writes.insert(
            RecordKey::Resource(env, doc.id.clone()),
            PendingWrite::Resource(Some(doc)),
        );
        Ok(())
    }

    fn delete_resource(&mut self, env: Environment, id: &str) -> StoreResult<()> {
        if env == Environment::Production {
            self.store.check_fault(FaultPoint::ProductionWrite)?;
        }
        let key = RecordKey::Resource(env, id.to_string());
        self.observe_key(&key)?;
        self.writes.insert(key, PendingWrite::Resource(None));
        Ok(())
    }

    fn request(&mut self, id: Uuid) -> StoreResult<Option<PromotionRequest>> {
        let key = RecordKey::Request(id);
        if let Some(PendingWrite::Request(request)) = self.writes.get(&key) {
            return Ok(Some(request.clone()));
        }
        let store = self.store;
        let state = store.read()?;
        self.observe(&key, &state);
        Ok(state.requests.get(&id).cloned())
    }

    fn requests(&mut self, organization_id: &str) -> StoreResult<Vec<PromotionRequest>> {
        let state = self.store.read()?;
        let mut found: HashMap<Uuid, PromotionRequest> = state
            .requests
            .values()
            .filter(|r| r.organization_id == organization_id)
            .map(|r| (r.id, r.clone()))
            .collect();
        for write in self.writes.values() {
            if let PendingWrite::Request(request) = write {
                if request.organization_id == organization_id {
                    found.insert(request.id, request.clone());
                }
            }
        }
        Ok(found.into_values().collect())
    }

    fn put_request(&mut self, request: PromotionRequest) -> StoreResult<()> {
        let key = RecordKey::Request(request.id);
        self.observe_key(&key)?;
        self.writes.insert(key, PendingWrite::Request(request));
        Ok(())
    }

    fn snapshot(&mut self, id: Uuid) -> StoreResult<Option<PromotionSnapshot>> {
        let key = RecordKey::Snapshot(id);
        if let Some(PendingWrite::Snapshot(snapshot)) = self.writes.get(&key) {
            return Ok(Some(snapshot.clone()));
        }
        let store = self.store;
        let state = store.read()?;
        self.observe(&key, &state);
        Ok(state.snapshots.get(&id).cloned())
    }

    fn put_snapshot(&mut self, snapshot: PromotionSnapshot) -> StoreResult<()> {
        self.store.check_fault(FaultPoint::SnapshotWrite)?;
        let key = RecordKey::Snapshot(snapshot.id);
        self.observe_key(&key)?;
        self.writes.insert(key, PendingWrite::Snapshot(snapshot));
        Ok(())
    }

    fn claim(&mut self, resource_id: &str) -> StoreResult<Option<Uuid>> {
        let key = RecordKey::Claim(resource_id.to_string());
        if let Some(PendingWrite::Claim(holder)) = self.writes.get(&key) {
            return Ok(*holder);
        }
        let store = self.store;
        let state = store.read()?;
        self.observe(&key, &state);
        Ok(state.claims.get(resource_id).copied())
    }

    fn set_claim(&mut self, resource_id: &str, holder: Option<Uuid>) -> StoreResult<()> {
        let key = RecordKey::Claim(resource_id.to_string());
        self.observe_key(&key)?;
        self.writes.insert(key, PendingWrite::Claim(holder));
        Ok(())
    }

    fn append_lineage(&mut self, event: DataLineageEvent) -> StoreResult<()> {
        self.store.check_fault(FaultPoint::LineageAppend)?;
        self.lineage.push(event);
        Ok(())
    }

    fn lineage(&mut self, filter: &LineageFilter) -> StoreResult<Vec<DataLineageEvent>> {
        let state = self.store.read()?;
        Ok(state
            .lineage
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect())
    }

    fn commit(self: Box<Self>) -> StoreResult<CommitOutcome> {
        let this = *self;
        this.store.check_fault(FaultPoint::Commit)?;

        let mut state = this.store.write()?;

        for (key, revision) in &this.read_set {
            if state.revision(key) != *revision {
                return Err(StoreError::Contention {
                    key: key.to_string(),
                });
            }
        }

        for (key, write) in this.writes {
            match write {
                PendingWrite::Resource(Some(doc)) => {
                    if let RecordKey::Resource(env, id) = &key {
                        let slot = (*env, id.clone());
                        let high = state.high_water(&slot).max(doc.version);
                        state.high_water.insert(slot.clone(), high);
                        state.resources.insert(slot, doc);
                    }
                }
                PendingWrite::Resource(None) => {
                    if let RecordKey::Resource(env, id) = &key {
                        state.resources.remove(&(*env, id.clone()));
                    }
                }
                PendingWrite::Request(request) => {
                    state.requests.insert(request.id, request);
                }
                PendingWrite::Snapshot(snapshot) => {
                    state.snapshots.insert(snapshot.id, snapshot);
                }
                PendingWrite::Claim(holder) => {
                    if let RecordKey::Claim(resource_id) = &key {
                        match holder {
                            Some(request_id) => {
                                state.claims.insert(resource_id.clone(), request_id);
                            }
                            None => {
                                state.claims.remove(resource_id);
                            }
                        }
                    }
                }
            }
            *state.revisions.entry(key).or_insert(0) += 1;
        }

        let mut committed = Vec::with_capacity(this.lineage.len());
        for mut event in this.lineage {
            state.last_sequence += 1;
            event.sequence = state.last_sequence;
            state.lineage.push(event.clone());
            committed.push(event);
        }

        Ok(CommitOutcome { lineage: committed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Fields, ResourceType};
    use chrono::Utc;

    fn doc(id: &str, env: Environment, version: u64) -> ResourceDocument {
        ResourceDocument {
            id: id.to_string(),
            resource_type: ResourceType::Agent,
            organization_id: "acme".to_string(),
            name: "Support bot".to_string(),
            version,
            last_modified_in: env,
            staging_version: None,
            production_version: None,
            has_conflict: false,
            fields: Fields::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put_resource(Environment::Staging, doc("agent-1", Environment::Staging, 1))
            .unwrap();
        assert!(tx.resource(Environment::Staging, "agent-1").unwrap().is_some());
        drop(tx);

        let mut tx = store.begin();
        assert!(tx.resource(Environment::Staging, "agent-1").unwrap().is_none());
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put_resource(Environment::Production, doc("agent-1", Environment::Production, 1))
            .unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin();
        let found = tx.resource(Environment::Production, "agent-1").unwrap().unwrap();
        assert_eq!(found.version, 1);
    }

    #[test]
    fn test_version_must_advance() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put_resource(Environment::Staging, doc("agent-1", Environment::Staging, 3))
            .unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin();
        let err = tx
            .put_resource(Environment::Staging, doc("agent-1", Environment::Staging, 3))
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionRegression { current: 3, .. }));
        assert_eq!(tx.next_version(Environment::Staging, "agent-1").unwrap(), 4);
    }

    #[test]
    fn test_versions_are_not_reused_after_delete() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put_resource(Environment::Production, doc("agent-1", Environment::Production, 7))
            .unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin();
        tx.delete_resource(Environment::Production, "agent-1").unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin();
        assert!(tx.resource(Environment::Production, "agent-1").unwrap().is_none());
        assert_eq!(tx.next_version(Environment::Production, "agent-1").unwrap(), 8);
    }

    #[test]
    fn test_environments_are_independent() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put_resource(Environment::Staging, doc("agent-1", Environment::Staging, 5))
            .unwrap();
        tx.put_resource(Environment::Production, doc("agent-1", Environment::Production, 3))
            .unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin();
        assert_eq!(tx.next_version(Environment::Staging, "agent-1").unwrap(), 6);
        assert_eq!(tx.next_version(Environment::Production, "agent-1").unwrap(), 4);
    }

    #[test]
    fn test_conflicting_transactions_lose_at_commit() {
        let store = MemoryStore::new();
        let mut first = store.begin();
        let mut second = store.begin();

        assert_eq!(first.claim("agent-1").unwrap(), None);
        assert_eq!(second.claim("agent-1").unwrap(), None);

        let winner = Uuid::new_v4();
        first.set_claim("agent-1", Some(winner)).unwrap();
        second.set_claim("agent-1", Some(Uuid::new_v4())).unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(err.is_contention());

        let mut tx = store.begin();
        assert_eq!(tx.claim("agent-1").unwrap(), Some(winner));
    }

    #[test]
    fn test_disjoint_transactions_both_commit() {
        let store = MemoryStore::new();
        let mut first = store.begin();
        let mut second = store.begin();

        first
            .put_resource(Environment::Production, doc("agent-1", Environment::Production, 1))
            .unwrap();
        second
            .put_resource(Environment::Production, doc("agent-2", Environment::Production, 1))
            .unwrap();

        first.commit().unwrap();
        second.commit().unwrap();
    }

    #[test]
    fn test_armed_fault_blocks_write() {
        let store = MemoryStore::new();
        store.arm_fault(FaultPoint::ProductionWrite);

        let mut tx = store.begin();
        let err = tx
            .put_resource(Environment::Production, doc("agent-1", Environment::Production, 1))
            .unwrap_err();
        assert_eq!(err, StoreError::InjectedFault(FaultPoint::ProductionWrite));

        // Staging writes are unaffected
        tx.put_resource(Environment::Staging, doc("agent-1", Environment::Staging, 1))
            .unwrap();

        store.disarm_fault(FaultPoint::ProductionWrite);
        tx.put_resource(Environment::Production, doc("agent-1", Environment::Production, 1))
            .unwrap();
        tx.commit().unwrap();
    }
}
