//! Assignment engine.
//!
//! Binds kids to vehicles and moves them between teams. Each operation:
//!
//! 1. locks the kid, then the vehicles and teams it touches (see `locks`)
//! 2. reads current state under those locks
//! 3. validates with `capacity` before writing anything
//! 4. commits a `ChangeSet`, undoing partial writes on failure
//! 5. appends one history entry, best effort
//!
//! Operations that would change nothing return `Outcome::Unchanged`
//! without writing or recording anything.

pub mod locks;
pub mod plan;

use std::sync::Arc;

use tracing::{debug, info};

use crate::capacity::{self, CapacityPolicy, InstructorPolicy, Violation};
use crate::error::{AssignmentError, ValidationError};
use crate::history::HistoryLedger;
use crate::models::{
    ActorId, EntityKind, Group, GroupId, HistoryAction, HistoryRecord, HistoryRecordBuilder,
    Member, MemberId, NewHistoryRecord, Resource, ResourceId, DEFAULT_SOURCE,
};
use crate::store::{EntityStore, StoreError};

pub use locks::{LockKey, LockRegistry};
pub use plan::{Change, ChangeSet};

/// Result of an operation that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// State already matched the request; nothing was written.
    Unchanged,
    /// Writes committed. `record` is `None` when the history append was
    /// dropped, or for operations that are not recorded.
    Applied { record: Option<HistoryRecord> },
}

impl Outcome {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Outcome::Unchanged)
    }

    pub fn record(&self) -> Option<&HistoryRecord> {
        match self {
            Outcome::Applied { record } => record.as_ref(),
            Outcome::Unchanged => None,
        }
    }

    fn into_record(self) -> Option<HistoryRecord> {
        match self {
            Outcome::Applied { record } => record,
            Outcome::Unchanged => None,
        }
    }
}

fn lookup_error(err: StoreError, kind: EntityKind, id: &str) -> AssignmentError {
    if err.is_not_found() {
        AssignmentError::not_found(kind, id)
    } else {
        AssignmentError::store(err)
    }
}

pub struct AssignmentEngine {
    entities: Arc<dyn EntityStore>,
    ledger: HistoryLedger,
    locks: LockRegistry,
    policy: CapacityPolicy,
    instructor_policy: InstructorPolicy,
    source: String,
}

impl AssignmentEngine {
    pub fn new(entities: Arc<dyn EntityStore>, ledger: HistoryLedger) -> Self {
        Self {
            entities,
            ledger,
            locks: LockRegistry::new(),
            policy: CapacityPolicy::default(),
            instructor_policy: InstructorPolicy::default(),
            source: DEFAULT_SOURCE.to_string(),
        }
    }

    pub fn with_policy(mut self, policy: CapacityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_instructor_policy(mut self, policy: InstructorPolicy) -> Self {
        self.instructor_policy = policy;
        self
    }

    /// Tag written into `metadata.source` of every history entry.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn entities(&self) -> &Arc<dyn EntityStore> {
        &self.entities
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    pub fn policy(&self) -> &CapacityPolicy {
        &self.policy
    }

    // ========================================================================
    // Reads
    // ========================================================================

    async fn load_member(&self, id: &MemberId) -> Result<Member, AssignmentError> {
        self.entities
            .get_member(id)
            .await
            .map_err(|e| lookup_error(e, EntityKind::Member, id.as_str()))
    }

    async fn load_resource(&self, id: &ResourceId) -> Result<Resource, AssignmentError> {
        self.entities
            .get_resource(id)
            .await
            .map_err(|e| lookup_error(e, EntityKind::Resource, id.as_str()))
    }

    async fn load_group(&self, id: &GroupId) -> Result<Group, AssignmentError> {
        self.entities
            .get_group(id)
            .await
            .map_err(|e| lookup_error(e, EntityKind::Group, id.as_str()))
    }

    /// A vehicle a kid still points at may have been deleted.
    async fn find_resource(&self, id: &ResourceId) -> Result<Option<Resource>, AssignmentError> {
        match self.entities.get_resource(id).await {
            Ok(resource) => Ok(Some(resource)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(AssignmentError::store(e)),
        }
    }

    async fn find_group(&self, id: &GroupId) -> Result<Option<Group>, AssignmentError> {
        match self.entities.get_group(id).await {
            Ok(group) => Ok(Some(group)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(AssignmentError::store(e)),
        }
    }

    async fn find_optional_group(
        &self,
        id: Option<&GroupId>,
    ) -> Result<Option<Group>, AssignmentError> {
        match id {
            Some(id) => self.find_group(id).await,
            None => Ok(None),
        }
    }

    async fn find_optional_resource(
        &self,
        id: Option<&ResourceId>,
    ) -> Result<Option<Resource>, AssignmentError> {
        match id {
            Some(id) => self.find_resource(id).await,
            None => Ok(None),
        }
    }

    /// Check every stored kid, vehicle and team against the occupancy rules.
    pub async fn audit(&self) -> Result<Vec<Violation>, AssignmentError> {
        let (members, resources, groups) = futures::try_join!(
            self.entities.list_members(),
            self.entities.list_resources(),
            self.entities.list_groups(),
        )
        .map_err(AssignmentError::store)?;
        Ok(capacity::audit(&members, &resources, &groups, &self.policy))
    }

    // ========================================================================
    // Operations
    // ========================================================================

    fn entry(&self, action: HistoryAction, member: &Member, actor: &ActorId) -> HistoryRecordBuilder {
        NewHistoryRecord::builder(action, member, actor).source(self.source.as_str())
    }

    /// Bind a kid to a vehicle in their team's fleet.
    ///
    /// A kid holding another vehicle is moved off it in the same operation.
    /// The kid must already be on the team; assigning never joins one.
    pub async fn assign(
        &self,
        member_id: &MemberId,
        resource_id: &ResourceId,
        actor: &ActorId,
        reason: Option<&str>,
    ) -> Result<Outcome, AssignmentError> {
        let _member_lock = self.locks.lock(LockKey::Member(member_id.clone())).await;
        let member = self.load_member(member_id).await?;
        if member.resource_id.as_ref() == Some(resource_id) {
            debug!(member = %member_id, resource = %resource_id, "Already assigned");
            return Ok(Outcome::Unchanged);
        }

        let mut keys = vec![LockKey::Resource(resource_id.clone())];
        keys.extend(member.resource_id.clone().map(LockKey::Resource));
        keys.extend(member.group_id.clone().map(LockKey::Group));
        let _locks = self.locks.lock_all(keys).await;

        let resource = self.load_resource(resource_id).await?;
        let Some(group_id) = &member.group_id else {
            return Err(ValidationError::CrossGroupConflict {
                resource: resource.id,
                group: None,
            }
            .into());
        };
        let group = self.load_group(group_id).await?;
        capacity::check_assignment(&member, &resource, &group, &self.policy)?;

        let previous = self.find_optional_resource(member.resource_id.as_ref()).await?;

        let mut changes = ChangeSet::new();
        if let Some(previous) = &previous {
            changes.release(&member, previous);
        }
        changes.bind(&member, &resource);
        changes.set_member_resource(&member, Some(resource.id.clone()));
        plan::commit(self.entities.as_ref(), &changes).await?;

        info!(
            member = %member.id,
            resource = %resource.id,
            previous = ?member.resource_id,
            actor = %actor,
            "Assigned vehicle"
        );

        let entry = self
            .entry(HistoryAction::Assigned, &member, actor)
            .resource(Some(&resource))
            .group(Some(&group))
            .previous_resource(previous.as_ref())
            .previous_resource_id(member.resource_id.as_ref())
            .reason(reason)
            .build();
        Ok(Outcome::Applied {
            record: self.ledger.record(entry).await,
        })
    }

    /// Release a kid's vehicle. A kid with none is left alone.
    pub async fn unassign(
        &self,
        member_id: &MemberId,
        actor: &ActorId,
        reason: Option<&str>,
    ) -> Result<Outcome, AssignmentError> {
        let _member_lock = self.locks.lock(LockKey::Member(member_id.clone())).await;
        let member = self.load_member(member_id).await?;
        let Some(resource_id) = member.resource_id.clone() else {
            debug!(member = %member_id, "Nothing to unassign");
            return Ok(Outcome::Unchanged);
        };

        let _locks = self
            .locks
            .lock_all([LockKey::Resource(resource_id.clone())])
            .await;
        let resource = self.find_resource(&resource_id).await?;
        let group = self.find_optional_group(member.group_id.as_ref()).await?;

        let mut changes = ChangeSet::new();
        if let Some(resource) = &resource {
            changes.release(&member, resource);
        }
        changes.set_member_resource(&member, None);
        plan::commit(self.entities.as_ref(), &changes).await?;

        info!(member = %member.id, resource = %resource_id, actor = %actor, "Unassigned vehicle");

        let entry = self
            .entry(HistoryAction::Unassigned, &member, actor)
            .resource(resource.as_ref())
            .resource_id(Some(&resource_id))
            .group(group.as_ref())
            .reason(reason)
            .build();
        Ok(Outcome::Applied {
            record: self.ledger.record(entry).await,
        })
    }

    /// Move a bound kid from their vehicle to another one in the same fleet.
    pub async fn swap(
        &self,
        member_id: &MemberId,
        resource_id: &ResourceId,
        actor: &ActorId,
        reason: Option<&str>,
    ) -> Result<Outcome, AssignmentError> {
        let _member_lock = self.locks.lock(LockKey::Member(member_id.clone())).await;
        let member = self.load_member(member_id).await?;
        let Some(old_id) = member.resource_id.clone() else {
            return Err(ValidationError::NotBound {
                member: member.id,
            }
            .into());
        };
        if &old_id == resource_id {
            debug!(member = %member_id, resource = %resource_id, "Swap to same vehicle");
            return Ok(Outcome::Unchanged);
        }

        let mut keys = vec![
            LockKey::Resource(resource_id.clone()),
            LockKey::Resource(old_id.clone()),
        ];
        keys.extend(member.group_id.clone().map(LockKey::Group));
        let _locks = self.locks.lock_all(keys).await;

        let resource = self.load_resource(resource_id).await?;
        let Some(group_id) = &member.group_id else {
            return Err(ValidationError::CrossGroupConflict {
                resource: resource.id,
                group: None,
            }
            .into());
        };
        let group = self.load_group(group_id).await?;
        capacity::check_assignment(&member, &resource, &group, &self.policy)?;

        let previous = self.find_resource(&old_id).await?;

        let mut changes = ChangeSet::new();
        if let Some(previous) = &previous {
            changes.release(&member, previous);
        }
        changes.bind(&member, &resource);
        changes.set_member_resource(&member, Some(resource.id.clone()));
        plan::commit(self.entities.as_ref(), &changes).await?;

        info!(
            member = %member.id,
            from = %old_id,
            to = %resource.id,
            actor = %actor,
            "Swapped vehicle"
        );

        let entry = self
            .entry(HistoryAction::Swapped, &member, actor)
            .resource(Some(&resource))
            .group(Some(&group))
            .previous_resource(previous.as_ref())
            .previous_resource_id(Some(&old_id))
            .reason(reason)
            .build();
        Ok(Outcome::Applied {
            record: self.ledger.record(entry).await,
        })
    }

    /// Move a kid to another team, or off every team with `None`.
    ///
    /// The kid keeps their vehicle only if the new team's fleet has it.
    pub async fn change_group(
        &self,
        member_id: &MemberId,
        group_id: Option<&GroupId>,
        actor: &ActorId,
        reason: Option<&str>,
    ) -> Result<Outcome, AssignmentError> {
        let _member_lock = self.locks.lock(LockKey::Member(member_id.clone())).await;
        let member = self.load_member(member_id).await?;
        if member.group_id.as_ref() == group_id {
            debug!(member = %member_id, group = ?group_id, "Already on team");
            return Ok(Outcome::Unchanged);
        }

        let mut keys = Vec::new();
        keys.extend(member.group_id.clone().map(LockKey::Group));
        keys.extend(group_id.cloned().map(LockKey::Group));
        keys.extend(member.resource_id.clone().map(LockKey::Resource));
        let _locks = self.locks.lock_all(keys).await;

        let target = match group_id {
            Some(id) => Some(self.load_group(id).await?),
            None => None,
        };
        if let Some(target) = &target {
            capacity::check_group_join(&member, target)?;
        }

        let current = self.find_optional_group(member.group_id.as_ref()).await?;
        let resource = self.find_optional_resource(member.resource_id.as_ref()).await?;
        let keeps_resource = match (&member.resource_id, &target) {
            (Some(resource_id), Some(target)) => target.has_resource(resource_id),
            _ => false,
        };

        let mut changes = ChangeSet::new();
        if let Some(current) = &current {
            changes.leave_group(&member, current);
        }
        if let Some(target) = &target {
            changes.join_group(&member, target);
        }
        changes.set_member_group(&member, group_id.cloned());
        if !keeps_resource {
            if let Some(resource) = &resource {
                changes.release(&member, resource);
            }
            changes.set_member_resource(&member, None);
        }
        plan::commit(self.entities.as_ref(), &changes).await?;

        info!(
            member = %member.id,
            from = ?member.group_id,
            to = ?group_id,
            kept_vehicle = keeps_resource,
            actor = %actor,
            "Changed team"
        );

        let mut entry = self
            .entry(HistoryAction::TeamChanged, &member, actor)
            .group(target.as_ref())
            .previous_group(current.as_ref())
            .previous_group_id(member.group_id.as_ref())
            .reason(reason);
        entry = if keeps_resource {
            entry
                .resource(resource.as_ref())
                .resource_id(member.resource_id.as_ref())
        } else {
            entry
                .previous_resource(resource.as_ref())
                .previous_resource_id(member.resource_id.as_ref())
        };
        Ok(Outcome::Applied {
            record: self.ledger.record(entry.build()).await,
        })
    }

    /// Detach a kid from their vehicle and team ahead of removing them.
    ///
    /// Returns the history entries written, oldest first. The two steps
    /// commit separately; if the second fails the first stays applied.
    pub async fn release_member(
        &self,
        member_id: &MemberId,
        actor: &ActorId,
        reason: Option<&str>,
    ) -> Result<Vec<HistoryRecord>, AssignmentError> {
        let mut records = Vec::new();
        records.extend(self.unassign(member_id, actor, reason).await?.into_record());
        records.extend(
            self.change_group(member_id, None, actor, reason)
                .await?
                .into_record(),
        );
        Ok(records)
    }

    /// Add an instructor to a team. Not recorded in assignment history.
    pub async fn assign_instructor(
        &self,
        group_id: &GroupId,
        instructor: &ActorId,
        actor: &ActorId,
    ) -> Result<Outcome, AssignmentError> {
        let _locks = self
            .locks
            .lock_all([
                LockKey::Group(group_id.clone()),
                LockKey::Instructor(instructor.clone()),
            ])
            .await;

        let group = self.load_group(group_id).await?;
        if group.has_instructor(instructor) {
            return Ok(Outcome::Unchanged);
        }
        let leading = self
            .entities
            .groups_with_instructor(instructor)
            .await
            .map_err(AssignmentError::store)?;
        capacity::check_instructor(instructor, &group, &leading, self.instructor_policy)?;

        let mut changes = ChangeSet::new();
        changes.add_instructor(&group, instructor);
        plan::commit(self.entities.as_ref(), &changes).await?;

        info!(group = %group.id, instructor = %instructor, actor = %actor, "Added instructor");
        Ok(Outcome::Applied { record: None })
    }

    pub async fn remove_instructor(
        &self,
        group_id: &GroupId,
        instructor: &ActorId,
        actor: &ActorId,
    ) -> Result<Outcome, AssignmentError> {
        let _locks = self
            .locks
            .lock_all([
                LockKey::Group(group_id.clone()),
                LockKey::Instructor(instructor.clone()),
            ])
            .await;

        let group = self.load_group(group_id).await?;
        if !group.has_instructor(instructor) {
            return Ok(Outcome::Unchanged);
        }

        let mut changes = ChangeSet::new();
        changes.remove_instructor(&group, instructor);
        plan::commit(self.entities.as_ref(), &changes).await?;

        info!(group = %group.id, instructor = %instructor, actor = %actor, "Removed instructor");
        Ok(Outcome::Applied { record: None })
    }
}
