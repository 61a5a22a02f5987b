use serde::{Deserialize, Serialize};

use super::{ActorId, GroupId, MemberId, ResourceId};

/// A team: a roster of kids, a fleet of vehicles, and its instructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub max_capacity: u32,
    #[serde(default)]
    pub member_ids: Vec<MemberId>,
    #[serde(default)]
    pub resource_ids: Vec<ResourceId>,
    #[serde(default)]
    pub instructor_ids: Vec<ActorId>,
}

impl Group {
    pub fn new(id: impl Into<GroupId>, name: impl Into<String>, max_capacity: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            max_capacity,
            member_ids: Vec::new(),
            resource_ids: Vec::new(),
            instructor_ids: Vec::new(),
        }
    }

    pub fn with_fleet(mut self, resources: impl IntoIterator<Item = ResourceId>) -> Self {
        self.resource_ids.extend(resources);
        self
    }

    pub fn has_member(&self, member: &MemberId) -> bool {
        self.member_ids.contains(member)
    }

    pub fn has_resource(&self, resource: &ResourceId) -> bool {
        self.resource_ids.contains(resource)
    }

    pub fn has_instructor(&self, instructor: &ActorId) -> bool {
        self.instructor_ids.contains(instructor)
    }

    pub fn is_full(&self) -> bool {
        self.member_ids.len() >= self.max_capacity as usize
    }

    pub fn open_slots(&self) -> usize {
        (self.max_capacity as usize).saturating_sub(self.member_ids.len())
    }

    /// Roster occupancy for list views, e.g. "3/5".
    pub fn occupancy_display(&self) -> String {
        format!("{}/{}", self.member_ids.len(), self.max_capacity)
    }

    /// Reject documents that could never satisfy the capacity invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_capacity < 1 {
            return Err(format!("team {} has max capacity 0", self.id));
        }
        Ok(())
    }
}
