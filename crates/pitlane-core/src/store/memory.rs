//! In-process store backing tests and the JSON file store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{Collection, EntityStore, FieldUpdate, HistoryStore, SetField, StoreError};
use crate::models::{
    generate_document_id, ActorId, Group, GroupId, HistoryFilter, HistoryId, HistoryRecord,
    Member, MemberId, NewHistoryRecord, Resource, ResourceId,
};

/// Full contents of a store, as loaded from a seed file or saved to disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
}

#[derive(Debug, Default)]
struct State {
    members: BTreeMap<MemberId, Member>,
    resources: BTreeMap<ResourceId, Resource>,
    groups: BTreeMap<GroupId, Group>,
    /// Oldest first; timestamps never decrease along the vector.
    history: Vec<HistoryRecord>,
}

impl State {
    fn from_snapshot(snapshot: Snapshot) -> Result<Self, StoreError> {
        for group in &snapshot.groups {
            group.validate().map_err(StoreError::InvalidDocument)?;
        }
        let mut history = snapshot.history;
        history.sort_by_key(|r| r.timestamp);
        Ok(State {
            members: snapshot.members.into_iter().map(|m| (m.id.clone(), m)).collect(),
            resources: snapshot.resources.into_iter().map(|r| (r.id.clone(), r)).collect(),
            groups: snapshot.groups.into_iter().map(|g| (g.id.clone(), g)).collect(),
            history,
        })
    }

    fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.history.last().map(|r| r.timestamp)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, StoreError> {
        Ok(Self {
            state: RwLock::new(State::from_snapshot(snapshot)?),
        })
    }

    /// Replace the whole contents, e.g. to discard a change that could not be saved.
    pub async fn restore(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let state = State::from_snapshot(snapshot)?;
        *self.state.write().await = state;
        Ok(())
    }

    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.read().await;
        Snapshot {
            members: state.members.values().cloned().collect(),
            resources: state.resources.values().cloned().collect(),
            groups: state.groups.values().cloned().collect(),
            history: state.history.clone(),
        }
    }
}

fn add_unique<T: PartialEq>(items: &mut Vec<T>, value: T) {
    if !items.contains(&value) {
        items.push(value);
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_member(&self, id: &MemberId) -> Result<Member, StoreError> {
        let state = self.state.read().await;
        state
            .members
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(Collection::Members.name(), id.as_str()))
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Resource, StoreError> {
        let state = self.state.read().await;
        state
            .resources
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(Collection::Resources.name(), id.as_str()))
    }

    async fn get_group(&self, id: &GroupId) -> Result<Group, StoreError> {
        let state = self.state.read().await;
        state
            .groups
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(Collection::Groups.name(), id.as_str()))
    }

    async fn list_members(&self) -> Result<Vec<Member>, StoreError> {
        Ok(self.state.read().await.members.values().cloned().collect())
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        Ok(self.state.read().await.resources.values().cloned().collect())
    }

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        Ok(self.state.read().await.groups.values().cloned().collect())
    }

    async fn groups_with_instructor(&self, instructor: &ActorId) -> Result<Vec<Group>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .values()
            .filter(|g| g.has_instructor(instructor))
            .cloned()
            .collect())
    }

    async fn put_member(&self, member: &Member) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.members.insert(member.id.clone(), member.clone());
        Ok(())
    }

    async fn put_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.resources.insert(resource.id.clone(), resource.clone());
        Ok(())
    }

    async fn put_group(&self, group: &Group) -> Result<(), StoreError> {
        group.validate().map_err(StoreError::InvalidDocument)?;
        let mut state = self.state.write().await;
        state.groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn update_fields(&self, update: &FieldUpdate) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let missing = || StoreError::not_found(update.collection().name(), update.document_id());
        match update {
            FieldUpdate::MemberGroup { member, group } => {
                state.members.get_mut(member).ok_or_else(missing)?.group_id = group.clone();
            }
            FieldUpdate::MemberResource { member, resource } => {
                state.members.get_mut(member).ok_or_else(missing)?.resource_id = resource.clone();
            }
            FieldUpdate::ResourceStatus { resource, status } => {
                state.resources.get_mut(resource).ok_or_else(missing)?.status = *status;
            }
        }
        Ok(())
    }

    async fn add_to_set(&self, field: &SetField, value: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let missing = || StoreError::not_found(field.collection().name(), field.document_id());
        match field {
            SetField::GroupMembers(id) => {
                let group = state.groups.get_mut(id).ok_or_else(missing)?;
                add_unique(&mut group.member_ids, MemberId::new(value));
            }
            SetField::GroupFleet(id) => {
                let group = state.groups.get_mut(id).ok_or_else(missing)?;
                add_unique(&mut group.resource_ids, ResourceId::new(value));
            }
            SetField::GroupInstructors(id) => {
                let group = state.groups.get_mut(id).ok_or_else(missing)?;
                add_unique(&mut group.instructor_ids, ActorId::new(value));
            }
            SetField::ResourceBoundMembers(id) => {
                let resource = state.resources.get_mut(id).ok_or_else(missing)?;
                add_unique(&mut resource.bound_member_ids, MemberId::new(value));
            }
        }
        Ok(())
    }

    async fn remove_from_set(&self, field: &SetField, value: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let missing = || StoreError::not_found(field.collection().name(), field.document_id());
        match field {
            SetField::GroupMembers(id) => {
                let group = state.groups.get_mut(id).ok_or_else(missing)?;
                group.member_ids.retain(|m| m.as_str() != value);
            }
            SetField::GroupFleet(id) => {
                let group = state.groups.get_mut(id).ok_or_else(missing)?;
                group.resource_ids.retain(|r| r.as_str() != value);
            }
            SetField::GroupInstructors(id) => {
                let group = state.groups.get_mut(id).ok_or_else(missing)?;
                group.instructor_ids.retain(|i| i.as_str() != value);
            }
            SetField::ResourceBoundMembers(id) => {
                let resource = state.resources.get_mut(id).ok_or_else(missing)?;
                resource.bound_member_ids.retain(|m| m.as_str() != value);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, entry: NewHistoryRecord) -> Result<HistoryRecord, StoreError> {
        let mut state = self.state.write().await;
        // Wall clock can step backwards; entries must not.
        let now = Utc::now();
        let timestamp = state.last_timestamp().map_or(now, |last| last.max(now));
        let record = entry.into_record(HistoryId::new(generate_document_id()), timestamp, now);
        state.history.push(record.clone());
        Ok(record)
    }

    async fn query(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryAction, HistoryScope, ResourceStatus};

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.put_member(&Member::new("k1", "Maya")).await.unwrap();
        store.put_resource(&Resource::new("car-1", "Red Racer")).await.unwrap();
        store
            .put_group(&Group::new("red", "Red Team", 2).with_fleet([ResourceId::new("car-1")]))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_get_missing_document() {
        let store = MemoryStore::new();
        let err = store.get_member(&MemberId::new("nope")).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Document not found: kids/nope");
    }

    #[tokio::test]
    async fn test_update_fields() {
        let store = seeded().await;
        store
            .update_fields(&FieldUpdate::MemberGroup {
                member: MemberId::new("k1"),
                group: Some(GroupId::new("red")),
            })
            .await
            .unwrap();
        store
            .update_fields(&FieldUpdate::ResourceStatus {
                resource: ResourceId::new("car-1"),
                status: ResourceStatus::Maintenance,
            })
            .await
            .unwrap();

        let kid = store.get_member(&MemberId::new("k1")).await.unwrap();
        assert_eq!(kid.group_id, Some(GroupId::new("red")));
        let car = store.get_resource(&ResourceId::new("car-1")).await.unwrap();
        assert_eq!(car.status, ResourceStatus::Maintenance);

        let err = store
            .update_fields(&FieldUpdate::MemberResource {
                member: MemberId::new("ghost"),
                resource: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_sets_are_unique() {
        let store = seeded().await;
        let field = SetField::GroupMembers(GroupId::new("red"));
        store.add_to_set(&field, "k1").await.unwrap();
        store.add_to_set(&field, "k1").await.unwrap();
        assert_eq!(store.get_group(&GroupId::new("red")).await.unwrap().member_ids.len(), 1);

        store.remove_from_set(&field, "k1").await.unwrap();
        store.remove_from_set(&field, "k1").await.unwrap();
        assert!(store.get_group(&GroupId::new("red")).await.unwrap().member_ids.is_empty());
    }

    #[tokio::test]
    async fn test_groups_with_instructor() {
        let store = seeded().await;
        store
            .add_to_set(&SetField::GroupInstructors(GroupId::new("red")), "coach")
            .await
            .unwrap();
        let groups = store.groups_with_instructor(&ActorId::new("coach")).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert!(store
            .groups_with_instructor(&ActorId::new("other"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_put_group_rejects_zero_capacity() {
        let store = MemoryStore::new();
        let err = store.put_group(&Group::new("g", "Empty", 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        let kid = Member::new("k1", "Maya");
        let actor = ActorId::new("admin");
        for action in [HistoryAction::Assigned, HistoryAction::Unassigned, HistoryAction::Assigned] {
            store
                .append(NewHistoryRecord::builder(action, &kid, &actor).build())
                .await
                .unwrap();
        }

        let all = store
            .query(&HistoryFilter::new(HistoryScope::Member(kid.id.clone()), 10))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(all[1].action, HistoryAction::Unassigned);

        let limited = store.query(&HistoryFilter::new(HistoryScope::All, 2)).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, all[0].id);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let store = seeded().await;
        let snapshot = store.snapshot().await;
        let restored = MemoryStore::from_snapshot(snapshot.clone()).unwrap();
        assert_eq!(restored.snapshot().await, snapshot);
    }
}
