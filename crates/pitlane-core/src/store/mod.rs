//! Document store access for kids, vehicles, teams and history.
//!
//! The assignment engine only talks to the store through `EntityStore` and
//! `HistoryStore`. Three backends implement them:
//!
//! - `MemoryStore`: in-process, used by tests and as the base of the file store
//! - `JsonFileStore`: a JSON snapshot on disk for offline and single-operator use
//! - `FirestoreStore`: the hosted document database, over its REST API
//!
//! Writes are expressed as field-level `Write`s (partial field update,
//! add-to-set, remove-from-set) so every backend can apply them the same way.

pub mod error;
pub mod file;
pub mod firestore;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{
    ActorId, Group, GroupId, HistoryFilter, HistoryRecord, Member, MemberId, NewHistoryRecord,
    Resource, ResourceId, ResourceStatus,
};

pub use error::StoreError;
pub use file::JsonFileStore;
pub use firestore::FirestoreStore;
pub use memory::{MemoryStore, Snapshot};

/// Document collections, named as they are in the hosted database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Members,
    Resources,
    Groups,
    History,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Members => "kids",
            Collection::Resources => "vehicles",
            Collection::Groups => "teams",
            Collection::History => "assignmentHistory",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A partial update of one scalar field on one document.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    MemberGroup {
        member: MemberId,
        group: Option<GroupId>,
    },
    MemberResource {
        member: MemberId,
        resource: Option<ResourceId>,
    },
    ResourceStatus {
        resource: ResourceId,
        status: ResourceStatus,
    },
}

impl FieldUpdate {
    pub fn collection(&self) -> Collection {
        match self {
            FieldUpdate::MemberGroup { .. } | FieldUpdate::MemberResource { .. } => {
                Collection::Members
            }
            FieldUpdate::ResourceStatus { .. } => Collection::Resources,
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            FieldUpdate::MemberGroup { member, .. } | FieldUpdate::MemberResource { member, .. } => {
                member.as_str()
            }
            FieldUpdate::ResourceStatus { resource, .. } => resource.as_str(),
        }
    }

    pub fn field_path(&self) -> &'static str {
        match self {
            FieldUpdate::MemberGroup { .. } => "groupId",
            FieldUpdate::MemberResource { .. } => "resourceId",
            FieldUpdate::ResourceStatus { .. } => "status",
        }
    }

    /// New field value as it appears in the stored JSON document.
    pub fn value(&self) -> Value {
        match self {
            FieldUpdate::MemberGroup { group, .. } => {
                group.as_ref().map_or(Value::Null, |g| Value::from(g.as_str()))
            }
            FieldUpdate::MemberResource { resource, .. } => resource
                .as_ref()
                .map_or(Value::Null, |r| Value::from(r.as_str())),
            FieldUpdate::ResourceStatus { status, .. } => Value::from(status.as_str()),
        }
    }
}

/// A membership array on one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetField {
    GroupMembers(GroupId),
    GroupFleet(GroupId),
    GroupInstructors(GroupId),
    ResourceBoundMembers(ResourceId),
}

impl SetField {
    pub fn collection(&self) -> Collection {
        match self {
            SetField::GroupMembers(_) | SetField::GroupFleet(_) | SetField::GroupInstructors(_) => {
                Collection::Groups
            }
            SetField::ResourceBoundMembers(_) => Collection::Resources,
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            SetField::GroupMembers(g) | SetField::GroupFleet(g) | SetField::GroupInstructors(g) => {
                g.as_str()
            }
            SetField::ResourceBoundMembers(r) => r.as_str(),
        }
    }

    pub fn field_path(&self) -> &'static str {
        match self {
            SetField::GroupMembers(_) => "memberIds",
            SetField::GroupFleet(_) => "resourceIds",
            SetField::GroupInstructors(_) => "instructorIds",
            SetField::ResourceBoundMembers(_) => "boundMemberIds",
        }
    }
}

/// One field-level write against the entity store.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Update(FieldUpdate),
    AddToSet { field: SetField, value: String },
    RemoveFromSet { field: SetField, value: String },
}

impl Write {
    pub fn collection(&self) -> Collection {
        match self {
            Write::Update(update) => update.collection(),
            Write::AddToSet { field, .. } | Write::RemoveFromSet { field, .. } => field.collection(),
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            Write::Update(update) => update.document_id(),
            Write::AddToSet { field, .. } | Write::RemoveFromSet { field, .. } => {
                field.document_id()
            }
        }
    }
}

/// Access to kid, vehicle and team documents.
///
/// Writes are last-write-wins per document. Unless `atomic_batches`
/// returns true, a batch is applied write by write and may stop halfway;
/// callers that need all-or-nothing must undo what was applied.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_member(&self, id: &MemberId) -> Result<Member, StoreError>;

    async fn get_resource(&self, id: &ResourceId) -> Result<Resource, StoreError>;

    async fn get_group(&self, id: &GroupId) -> Result<Group, StoreError>;

    async fn list_members(&self) -> Result<Vec<Member>, StoreError>;

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError>;

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError>;

    /// Teams whose `instructorIds` contains `instructor`.
    async fn groups_with_instructor(&self, instructor: &ActorId) -> Result<Vec<Group>, StoreError>;

    /// Create or overwrite a whole kid document.
    async fn put_member(&self, member: &Member) -> Result<(), StoreError>;

    async fn put_resource(&self, resource: &Resource) -> Result<(), StoreError>;

    async fn put_group(&self, group: &Group) -> Result<(), StoreError>;

    /// Partial update of a single field; the document must exist.
    async fn update_fields(&self, update: &FieldUpdate) -> Result<(), StoreError>;

    /// Add `value` to a membership array unless already present.
    async fn add_to_set(&self, field: &SetField, value: &str) -> Result<(), StoreError>;

    /// Remove every occurrence of `value` from a membership array.
    async fn remove_from_set(&self, field: &SetField, value: &str) -> Result<(), StoreError>;

    async fn apply(&self, write: &Write) -> Result<(), StoreError> {
        match write {
            Write::Update(update) => self.update_fields(update).await,
            Write::AddToSet { field, value } => self.add_to_set(field, value).await,
            Write::RemoveFromSet { field, value } => self.remove_from_set(field, value).await,
        }
    }

    /// True when `apply_batch` commits all writes or none.
    fn atomic_batches(&self) -> bool {
        false
    }

    async fn apply_batch(&self, writes: &[Write]) -> Result<(), StoreError> {
        for write in writes {
            self.apply(write).await?;
        }
        Ok(())
    }
}

/// Append-only storage for assignment history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a new entry; the store assigns its id and timestamps.
    async fn append(&self, entry: NewHistoryRecord) -> Result<HistoryRecord, StoreError>;

    /// Entries matching `filter`, newest first, at most `filter.limit`.
    async fn query(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_update_paths_and_values() {
        let update = FieldUpdate::MemberResource {
            member: MemberId::new("k1"),
            resource: None,
        };
        assert_eq!(update.collection(), Collection::Members);
        assert_eq!(update.document_id(), "k1");
        assert_eq!(update.field_path(), "resourceId");
        assert_eq!(update.value(), Value::Null);

        let update = FieldUpdate::ResourceStatus {
            resource: ResourceId::new("car-1"),
            status: ResourceStatus::InUse,
        };
        assert_eq!(update.collection(), Collection::Resources);
        assert_eq!(update.value(), Value::from("in-use"));
    }

    #[test]
    fn test_set_field_paths() {
        let field = SetField::GroupFleet(GroupId::new("red"));
        assert_eq!(field.collection(), Collection::Groups);
        assert_eq!(field.field_path(), "resourceIds");

        let write = Write::AddToSet {
            field: SetField::ResourceBoundMembers(ResourceId::new("car-1")),
            value: "k1".to_string(),
        };
        assert_eq!(write.collection(), Collection::Resources);
        assert_eq!(write.document_id(), "car-1");
    }
}
