//! Shared test fixtures and fault-injecting stores.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::AssignmentEngine;
use crate::history::HistoryLedger;
use crate::models::{
    ActorId, Group, GroupId, HistoryFilter, HistoryRecord, Member, MemberId, NewHistoryRecord,
    Resource, ResourceId, ResourceStatus,
};
use crate::store::{
    EntityStore, FieldUpdate, HistoryStore, MemoryStore, SetField, Snapshot, StoreError,
};

/// Two teams and four kids, nobody bound yet.
///
/// - red: capacity 3, roster k1 k2, fleet car-1 car-2 car-3 (car-3 in maintenance)
/// - blue: capacity 1, roster k3, fleet car-4
/// - k4 is on no team
pub fn fixture() -> Snapshot {
    let mut maya = Member::new("k1", "Maya");
    maya.group_id = Some(GroupId::new("red"));
    let mut leo = Member::new("k2", "Leo");
    leo.group_id = Some(GroupId::new("red"));
    let mut ava = Member::new("k3", "Ava");
    ava.group_id = Some(GroupId::new("blue"));
    let sam = Member::new("k4", "Sam").with_notes("Needs hand controls");

    let mut green = Resource::new("car-3", "Green Machine");
    green.status = ResourceStatus::Maintenance;

    let mut red = Group::new("red", "Red Team", 3).with_fleet([
        ResourceId::new("car-1"),
        ResourceId::new("car-2"),
        ResourceId::new("car-3"),
    ]);
    red.member_ids = vec![MemberId::new("k1"), MemberId::new("k2")];
    let mut blue = Group::new("blue", "Blue Team", 1).with_fleet([ResourceId::new("car-4")]);
    blue.member_ids = vec![MemberId::new("k3")];

    Snapshot {
        members: vec![maya, leo, ava, sam],
        resources: vec![
            Resource::new("car-1", "Red Racer"),
            Resource::new("car-2", "Blue Bolt"),
            green,
            Resource::new("car-4", "Yellow Flash"),
        ],
        groups: vec![red, blue],
        history: Vec::new(),
    }
}

pub fn admin() -> ActorId {
    ActorId::new("admin")
}

/// Engine over one in-memory store used for both entities and history.
pub fn memory_engine(snapshot: Snapshot) -> (AssignmentEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::from_snapshot(snapshot).expect("valid fixture"));
    let engine = AssignmentEngine::new(store.clone(), HistoryLedger::new(store.clone()));
    (engine, store)
}

/// `MemoryStore` that fails chosen field-level writes and counts the rest.
///
/// Writes are numbered from zero in the order they arrive, undo writes
/// included.
pub struct FlakyStore {
    inner: MemoryStore,
    writes: AtomicUsize,
    failing: HashSet<usize>,
}

impl FlakyStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            inner: MemoryStore::from_snapshot(snapshot).expect("valid fixture"),
            writes: AtomicUsize::new(0),
            failing: HashSet::new(),
        }
    }

    pub fn fail_write(mut self, index: usize) -> Self {
        self.failing.insert(index);
        self
    }

    /// Field-level writes attempted so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn next_write(&self) -> Result<(), StoreError> {
        let index = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&index) {
            return Err(StoreError::Unavailable(format!("injected failure on write {}", index)));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn get_member(&self, id: &MemberId) -> Result<Member, StoreError> {
        self.inner.get_member(id).await
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Resource, StoreError> {
        self.inner.get_resource(id).await
    }

    async fn get_group(&self, id: &GroupId) -> Result<Group, StoreError> {
        self.inner.get_group(id).await
    }

    async fn list_members(&self) -> Result<Vec<Member>, StoreError> {
        self.inner.list_members().await
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        self.inner.list_resources().await
    }

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        self.inner.list_groups().await
    }

    async fn groups_with_instructor(&self, instructor: &ActorId) -> Result<Vec<Group>, StoreError> {
        self.inner.groups_with_instructor(instructor).await
    }

    async fn put_member(&self, member: &Member) -> Result<(), StoreError> {
        self.inner.put_member(member).await
    }

    async fn put_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        self.inner.put_resource(resource).await
    }

    async fn put_group(&self, group: &Group) -> Result<(), StoreError> {
        self.inner.put_group(group).await
    }

    async fn update_fields(&self, update: &FieldUpdate) -> Result<(), StoreError> {
        self.next_write()?;
        self.inner.update_fields(update).await
    }

    async fn add_to_set(&self, field: &SetField, value: &str) -> Result<(), StoreError> {
        self.next_write()?;
        self.inner.add_to_set(field, value).await
    }

    async fn remove_from_set(&self, field: &SetField, value: &str) -> Result<(), StoreError> {
        self.next_write()?;
        self.inner.remove_from_set(field, value).await
    }
}

/// History store that is always down.
pub struct FailingHistory;

#[async_trait]
impl HistoryStore for FailingHistory {
    async fn append(&self, _entry: NewHistoryRecord) -> Result<HistoryRecord, StoreError> {
        Err(StoreError::Unavailable("history offline".to_string()))
    }

    async fn query(&self, _filter: &HistoryFilter) -> Result<Vec<HistoryRecord>, StoreError> {
        Err(StoreError::Unavailable("history offline".to_string()))
    }
}
