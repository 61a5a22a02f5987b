//! Data models for race-event assignment entities.
//!
//! This module contains the typed records stored in the document database:
//!
//! - `Member`: a kid registered for race events
//! - `Resource`, `ResourceStatus`: race vehicles and their operational state
//! - `Group`: a team with its roster, fleet and instructors
//! - `HistoryRecord` and friends: the append-only assignment log
//! - Strongly-typed document ids

pub mod group;
pub mod history;
pub mod ids;
pub mod member;
pub mod resource;

pub use group::Group;
pub use history::{
    HistoryAction, HistoryFilter, HistoryMetadata, HistoryRecord, HistoryRecordBuilder,
    HistoryScope, NewHistoryRecord, DEFAULT_SOURCE,
};
pub use ids::{generate_document_id, ActorId, GroupId, HistoryId, MemberId, ResourceId};
pub use member::{Member, MemberState};
pub use resource::{Resource, ResourceStatus};

/// The kinds of entity the assignment engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Member,
    Resource,
    Group,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Member => write!(f, "kid"),
            EntityKind::Resource => write!(f, "vehicle"),
            EntityKind::Group => write!(f, "team"),
        }
    }
}
