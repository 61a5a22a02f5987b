//! Occupancy rules for teams and vehicles.
//!
//! Everything here is pure: checks read the entities they are handed and
//! never touch a store, so callers can run them speculatively (to grey out
//! a full team in a picker, say) as well as under the engine's locks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{UnavailableReason, ValidationError};
use crate::models::{ActorId, Group, GroupId, Member, MemberId, Resource, ResourceId, ResourceStatus};

/// Default number of kids one vehicle may carry.
pub const DEFAULT_MAX_MEMBERS_PER_RESOURCE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityPolicy {
    pub max_members_per_resource: usize,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            max_members_per_resource: DEFAULT_MAX_MEMBERS_PER_RESOURCE,
        }
    }
}

/// Whether an instructor may lead more than one team at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstructorPolicy {
    #[default]
    SingleGroup,
    MultiGroup,
}

impl std::str::FromStr for InstructorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single-group" => Ok(InstructorPolicy::SingleGroup),
            "multi-group" => Ok(InstructorPolicy::MultiGroup),
            _ => Err(format!("Unknown instructor policy: {}", s)),
        }
    }
}

/// `member` joining `group` would push it past its capacity.
pub fn check_group_join(member: &Member, group: &Group) -> Result<(), ValidationError> {
    if !group.has_member(&member.id) && group.is_full() {
        return Err(ValidationError::CapacityExceeded {
            group: group.id.clone(),
            capacity: group.max_capacity,
        });
    }
    Ok(())
}

/// Whether `resource` can carry `member` at all, ignoring teams.
pub fn check_resource(
    member: &Member,
    resource: &Resource,
    policy: &CapacityPolicy,
) -> Result<(), ValidationError> {
    if resource.status == ResourceStatus::Maintenance {
        return Err(ValidationError::ResourceUnavailable {
            resource: resource.id.clone(),
            reason: UnavailableReason::Maintenance,
        });
    }
    if resource.bound_excluding(&member.id) >= policy.max_members_per_resource {
        return Err(ValidationError::ResourceUnavailable {
            resource: resource.id.clone(),
            reason: UnavailableReason::Occupied,
        });
    }
    Ok(())
}

/// Validate binding `member` to `resource` within `group`, the member's team.
pub fn check_assignment(
    member: &Member,
    resource: &Resource,
    group: &Group,
    policy: &CapacityPolicy,
) -> Result<(), ValidationError> {
    if !group.has_resource(&resource.id) {
        return Err(ValidationError::CrossGroupConflict {
            resource: resource.id.clone(),
            group: Some(group.id.clone()),
        });
    }
    check_group_join(member, group)?;
    check_resource(member, resource, policy)
}

/// Validate adding `instructor` to `target` given the teams they already lead.
pub fn check_instructor(
    instructor: &ActorId,
    target: &Group,
    leading: &[Group],
    policy: InstructorPolicy,
) -> Result<(), ValidationError> {
    if policy == InstructorPolicy::MultiGroup {
        return Ok(());
    }
    match leading.iter().find(|g| g.id != target.id) {
        Some(other) => Err(ValidationError::InstructorConflict {
            instructor: instructor.clone(),
            group: other.id.clone(),
        }),
        None => Ok(()),
    }
}

// ============================================================================
// Consistency audit
// ============================================================================

/// A broken invariant found in stored data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    OverCapacity {
        group: GroupId,
        members: usize,
        capacity: u32,
    },
    MemberInMultipleGroups {
        member: MemberId,
        groups: Vec<GroupId>,
    },
    ResourceOverbound {
        resource: ResourceId,
        bound: usize,
        limit: usize,
    },
    StaleStatus {
        resource: ResourceId,
        status: ResourceStatus,
        expected: ResourceStatus,
    },
    BindingOutsideFleet {
        member: MemberId,
        resource: ResourceId,
        group: Option<GroupId>,
    },
    /// Kid and vehicle disagree about the binding.
    UnmirroredBinding {
        member: MemberId,
        resource: ResourceId,
    },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::OverCapacity { group, members, capacity } => {
                write!(f, "team {} has {} kids, capacity {}", group, members, capacity)
            }
            Violation::MemberInMultipleGroups { member, groups } => {
                let names: Vec<&str> = groups.iter().map(GroupId::as_str).collect();
                write!(f, "kid {} is on several teams: {}", member, names.join(", "))
            }
            Violation::ResourceOverbound { resource, bound, limit } => {
                write!(f, "vehicle {} carries {} kids, limit {}", resource, bound, limit)
            }
            Violation::StaleStatus { resource, status, expected } => {
                write!(f, "vehicle {} is {} but should be {}", resource, status, expected)
            }
            Violation::BindingOutsideFleet { member, resource, group } => match group {
                Some(group) => write!(
                    f,
                    "kid {} holds vehicle {} outside team {}'s fleet",
                    member, resource, group
                ),
                None => write!(f, "kid {} holds vehicle {} without a team", member, resource),
            },
            Violation::UnmirroredBinding { member, resource } => {
                write!(f, "kid {} and vehicle {} disagree on binding", member, resource)
            }
        }
    }
}

/// Check stored entities against every occupancy invariant.
pub fn audit(
    members: &[Member],
    resources: &[Resource],
    groups: &[Group],
    policy: &CapacityPolicy,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    let mut rosters: BTreeMap<&MemberId, Vec<GroupId>> = BTreeMap::new();
    for group in groups {
        if group.member_ids.len() > group.max_capacity as usize {
            violations.push(Violation::OverCapacity {
                group: group.id.clone(),
                members: group.member_ids.len(),
                capacity: group.max_capacity,
            });
        }
        for member in &group.member_ids {
            rosters.entry(member).or_default().push(group.id.clone());
        }
    }
    for (member, groups) in rosters {
        if groups.len() > 1 {
            violations.push(Violation::MemberInMultipleGroups {
                member: member.clone(),
                groups,
            });
        }
    }

    for resource in resources {
        if resource.bound_member_ids.len() > policy.max_members_per_resource {
            violations.push(Violation::ResourceOverbound {
                resource: resource.id.clone(),
                bound: resource.bound_member_ids.len(),
                limit: policy.max_members_per_resource,
            });
        }
        let expected = resource.expected_status();
        if resource.status != expected {
            violations.push(Violation::StaleStatus {
                resource: resource.id.clone(),
                status: resource.status,
                expected,
            });
        }
    }

    let groups_by_id: BTreeMap<&GroupId, &Group> = groups.iter().map(|g| (&g.id, g)).collect();
    let resources_by_id: BTreeMap<&ResourceId, &Resource> =
        resources.iter().map(|r| (&r.id, r)).collect();
    for member in members {
        let Some(resource_id) = &member.resource_id else {
            continue;
        };
        let in_fleet = member
            .group_id
            .as_ref()
            .and_then(|g| groups_by_id.get(g))
            .is_some_and(|g| g.has_resource(resource_id));
        if !in_fleet {
            violations.push(Violation::BindingOutsideFleet {
                member: member.id.clone(),
                resource: resource_id.clone(),
                group: member.group_id.clone(),
            });
        }
        let mirrored = resources_by_id
            .get(resource_id)
            .is_some_and(|r| r.is_bound_to(&member.id));
        if !mirrored {
            violations.push(Violation::UnmirroredBinding {
                member: member.id.clone(),
                resource: resource_id.clone(),
            });
        }
    }

    violations
}
