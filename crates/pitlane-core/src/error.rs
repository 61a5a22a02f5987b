//! Errors returned by assignment operations.

use thiserror::Error;

use crate::models::{ActorId, EntityKind, GroupId, MemberId, ResourceId};
use crate::store::StoreError;

/// Why a vehicle cannot take another kid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    Maintenance,
    Occupied,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::Maintenance => write!(f, "in maintenance"),
            UnavailableReason::Occupied => write!(f, "already assigned"),
        }
    }
}

/// A rule violation found before anything was written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Team {group} is full ({capacity} kids)")]
    CapacityExceeded { group: GroupId, capacity: u32 },

    #[error("Vehicle {resource} is {reason}")]
    ResourceUnavailable {
        resource: ResourceId,
        reason: UnavailableReason,
    },

    #[error("Vehicle {resource} is not in the fleet of {}", group_label(.group))]
    CrossGroupConflict {
        resource: ResourceId,
        group: Option<GroupId>,
    },

    #[error("Kid {member} has no vehicle to swap")]
    NotBound { member: MemberId },

    #[error("Instructor {instructor} already leads team {group}")]
    InstructorConflict { instructor: ActorId, group: GroupId },
}

fn group_label(group: &Option<GroupId>) -> String {
    match group {
        Some(id) => format!("team {}", id),
        None => "the kid's team (kid has no team)".to_string(),
    }
}

/// What happened to already-applied writes after a later write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Nothing had been applied, or the store committed atomically.
    NotNeeded,
    Complete { undone: usize },
    /// Some undo writes failed too; the store may be inconsistent.
    Partial { undone: usize, failed: usize },
}

impl RollbackOutcome {
    pub fn is_clean(&self) -> bool {
        !matches!(self, RollbackOutcome::Partial { .. })
    }
}

impl std::fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackOutcome::NotNeeded => write!(f, "nothing to roll back"),
            RollbackOutcome::Complete { undone } => write!(f, "rolled back {} writes", undone),
            RollbackOutcome::Partial { undone, failed } => write!(
                f,
                "rollback incomplete: {} undone, {} failed",
                undone, failed
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum AssignmentError {
    #[error("No {kind} with id {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Store write failed ({rollback}): {source}")]
    Store {
        #[source]
        source: StoreError,
        rollback: RollbackOutcome,
    },
}

impl AssignmentError {
    pub fn not_found(kind: EntityKind, id: impl std::fmt::Display) -> Self {
        AssignmentError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// A store failure before any write was attempted.
    pub fn store(source: StoreError) -> Self {
        AssignmentError::Store {
            source,
            rollback: RollbackOutcome::NotNeeded,
        }
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            AssignmentError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = AssignmentError::from(ValidationError::CapacityExceeded {
            group: GroupId::new("red"),
            capacity: 2,
        });
        assert_eq!(err.to_string(), "Team red is full (2 kids)");

        let err = ValidationError::CrossGroupConflict {
            resource: ResourceId::new("car-9"),
            group: None,
        };
        assert!(err.to_string().contains("kid has no team"));

        let err = AssignmentError::not_found(EntityKind::Resource, "car-7");
        assert_eq!(err.to_string(), "No vehicle with id car-7");
    }

    #[test]
    fn test_rollback_outcome() {
        assert!(RollbackOutcome::Complete { undone: 2 }.is_clean());
        let partial = RollbackOutcome::Partial { undone: 1, failed: 1 };
        assert!(!partial.is_clean());
        let err = AssignmentError::Store {
            source: StoreError::Unavailable("offline".to_string()),
            rollback: partial,
        };
        assert!(err.to_string().contains("rollback incomplete"));
        assert!(err.validation().is_none());
    }
}
