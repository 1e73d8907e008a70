//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use promoter::clock::{Clock, ManualClock};
use promoter::promotion::{Caller, OpenPromotion, PromotionRequest, PromotionService, Role};
use promoter::resource::{Environment, Fields, ResourceDocument, ResourceType};
use promoter::store::{MemoryStore, Store};

pub const ORG: &str = "org-1";
pub const RESOURCE: &str = "agent-42";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub service: PromotionService,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let dyn_store: Arc<dyn Store> = store.clone();
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let service = PromotionService::new(dyn_store, dyn_clock);
        Self {
            store,
            clock,
            service,
        }
    }

    /// Seed `agent-42` with staging at v5 and production at v3.
    pub fn seeded() -> Self {
        let fixture = Self::new();
        fixture.put(
            Environment::Production,
            document(
                Environment::Production,
                3,
                fields(json!({"prompt": "You are helpful.", "temperature": 0.2})),
            ),
        );
        let mut staging = document(
            Environment::Staging,
            5,
            fields(json!({"prompt": "You are concise.", "temperature": 0.2, "tools": ["search"]})),
        );
        staging.production_version = Some(3);
        fixture.put(Environment::Staging, staging);
        fixture
    }

    /// Write a copy directly, bypassing the editor and its lineage.
    pub fn put(&self, env: Environment, doc: ResourceDocument) {
        let mut tx = self.store.begin();
        tx.put_resource(env, doc).unwrap();
        tx.commit().unwrap();
    }

    pub fn resource(&self, env: Environment) -> Option<ResourceDocument> {
        let mut tx = self.store.begin();
        tx.resource(env, RESOURCE).unwrap()
    }

    pub fn open(&self) -> PromotionRequest {
        self.service
            .workflow()
            .open(
                OpenPromotion {
                    resource_id: RESOURCE.to_string(),
                    notes: Some("ship the concise prompt".to_string()),
                },
                &requester(),
            )
            .unwrap()
    }

    /// Open a request and take it through both approvals.
    pub fn approved(&self) -> PromotionRequest {
        let request = self.open();
        self.service
            .workflow()
            .approve(request.id, &org_admin(), None)
            .unwrap();
        self.service
            .workflow()
            .approve(request.id, &superadmin(), Some("looks good".into()))
            .unwrap()
    }
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map.into_iter().collect::<BTreeMap<_, _>>(),
        other => panic!("expected an object, got {}", other),
    }
}

pub fn document(env: Environment, version: u64, fields: Fields) -> ResourceDocument {
    ResourceDocument {
        id: RESOURCE.to_string(),
        resource_type: ResourceType::Agent,
        organization_id: ORG.to_string(),
        name: "Support bot".to_string(),
        version,
        last_modified_in: env,
        staging_version: None,
        production_version: None,
        has_conflict: false,
        fields,
        updated_at: start_time(),
    }
}

pub fn requester() -> Caller {
    Caller::new("u-dev", Role::User).with_organization(ORG)
}

pub fn org_admin() -> Caller {
    Caller::new("u-admin", Role::Admin).with_organization(ORG)
}

pub fn other_org_admin() -> Caller {
    Caller::new("u-intruder", Role::Admin).with_organization("org-2")
}

pub fn superadmin() -> Caller {
    Caller::new("u-root", Role::Superadmin)
}
