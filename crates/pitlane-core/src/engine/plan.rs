//! Change sets: the writes one operation makes, each paired with its undo.

use tracing::{error, warn};

use crate::error::{AssignmentError, RollbackOutcome};
use crate::models::{ActorId, Group, GroupId, Member, Resource, ResourceId, ResourceStatus};
use crate::store::{EntityStore, FieldUpdate, SetField, Write};

#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub forward: Write,
    pub undo: Write,
}

/// Writes planned from state read under the operation's locks.
///
/// Builders only emit a set write when it changes the set, so every undo
/// restores exactly what was there before.
#[derive(Debug, Default)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn forward_writes(&self) -> Vec<Write> {
        self.changes.iter().map(|c| c.forward.clone()).collect()
    }

    fn push(&mut self, forward: Write, undo: Write) {
        self.changes.push(Change { forward, undo });
    }

    fn add(&mut self, field: SetField, value: &str) {
        self.push(
            Write::AddToSet {
                field: field.clone(),
                value: value.to_string(),
            },
            Write::RemoveFromSet {
                field,
                value: value.to_string(),
            },
        );
    }

    fn remove(&mut self, field: SetField, value: &str) {
        self.push(
            Write::RemoveFromSet {
                field: field.clone(),
                value: value.to_string(),
            },
            Write::AddToSet {
                field,
                value: value.to_string(),
            },
        );
    }

    pub fn set_member_resource(&mut self, member: &Member, resource: Option<ResourceId>) {
        if member.resource_id == resource {
            return;
        }
        self.push(
            Write::Update(FieldUpdate::MemberResource {
                member: member.id.clone(),
                resource,
            }),
            Write::Update(FieldUpdate::MemberResource {
                member: member.id.clone(),
                resource: member.resource_id.clone(),
            }),
        );
    }

    pub fn set_member_group(&mut self, member: &Member, group: Option<GroupId>) {
        if member.group_id == group {
            return;
        }
        self.push(
            Write::Update(FieldUpdate::MemberGroup {
                member: member.id.clone(),
                group,
            }),
            Write::Update(FieldUpdate::MemberGroup {
                member: member.id.clone(),
                group: member.group_id.clone(),
            }),
        );
    }

    fn set_status(&mut self, resource: &Resource, status: ResourceStatus) {
        if resource.status == status {
            return;
        }
        self.push(
            Write::Update(FieldUpdate::ResourceStatus {
                resource: resource.id.clone(),
                status,
            }),
            Write::Update(FieldUpdate::ResourceStatus {
                resource: resource.id.clone(),
                status: resource.status,
            }),
        );
    }

    /// Bind `member` to `resource` and recompute its status.
    pub fn bind(&mut self, member: &Member, resource: &Resource) {
        if !resource.is_bound_to(&member.id) {
            self.add(SetField::ResourceBoundMembers(resource.id.clone()), member.id.as_str());
        }
        self.set_status(resource, resource.status_for(resource.bound_excluding(&member.id) + 1));
    }

    /// Drop `member` from `resource` and recompute its status.
    pub fn release(&mut self, member: &Member, resource: &Resource) {
        if resource.is_bound_to(&member.id) {
            self.remove(SetField::ResourceBoundMembers(resource.id.clone()), member.id.as_str());
        }
        self.set_status(resource, resource.status_for(resource.bound_excluding(&member.id)));
    }

    pub fn join_group(&mut self, member: &Member, group: &Group) {
        if !group.has_member(&member.id) {
            self.add(SetField::GroupMembers(group.id.clone()), member.id.as_str());
        }
    }

    pub fn leave_group(&mut self, member: &Member, group: &Group) {
        if group.has_member(&member.id) {
            self.remove(SetField::GroupMembers(group.id.clone()), member.id.as_str());
        }
    }

    pub fn add_instructor(&mut self, group: &Group, instructor: &ActorId) {
        if !group.has_instructor(instructor) {
            self.add(SetField::GroupInstructors(group.id.clone()), instructor.as_str());
        }
    }

    pub fn remove_instructor(&mut self, group: &Group, instructor: &ActorId) {
        if group.has_instructor(instructor) {
            self.remove(SetField::GroupInstructors(group.id.clone()), instructor.as_str());
        }
    }
}

/// Apply a change set all-or-nothing.
///
/// Stores with atomic batches get one batch. Otherwise writes go one at a
/// time, and on the first failure the applied ones are undone newest first.
pub async fn commit(store: &dyn EntityStore, changes: &ChangeSet) -> Result<(), AssignmentError> {
    if changes.is_empty() {
        return Ok(());
    }
    if store.atomic_batches() {
        return store
            .apply_batch(&changes.forward_writes())
            .await
            .map_err(AssignmentError::store);
    }

    for (applied, change) in changes.changes().iter().enumerate() {
        if let Err(source) = store.apply(&change.forward).await {
            warn!(
                collection = %change.forward.collection(),
                document = change.forward.document_id(),
                error = %source,
                "Write failed, rolling back"
            );
            let rollback = undo(store, &changes.changes()[..applied]).await;
            return Err(AssignmentError::Store { source, rollback });
        }
    }
    Ok(())
}

async fn undo(store: &dyn EntityStore, applied: &[Change]) -> RollbackOutcome {
    if applied.is_empty() {
        return RollbackOutcome::NotNeeded;
    }
    let mut undone = 0;
    let mut failed = 0;
    for change in applied.iter().rev() {
        match store.apply(&change.undo).await {
            Ok(()) => undone += 1,
            Err(e) => {
                failed += 1;
                error!(
                    collection = %change.undo.collection(),
                    document = change.undo.document_id(),
                    error = %e,
                    "Rollback write failed"
                );
            }
        }
    }
    if failed == 0 {
        RollbackOutcome::Complete { undone }
    } else {
        RollbackOutcome::Partial { undone, failed }
    }
}
