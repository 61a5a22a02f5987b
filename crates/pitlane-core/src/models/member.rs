use serde::{Deserialize, Serialize};

use super::{GroupId, MemberId, ResourceId};

/// Where a kid currently stands in the assignment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Ungrouped,
    InGroup,
    Bound,
}

impl std::fmt::Display for MemberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberState::Ungrouped => write!(f, "No team"),
            MemberState::InGroup => write!(f, "On team"),
            MemberState::Bound => write!(f, "Assigned"),
        }
    }
}

/// A kid participating in race events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    /// Capability and accessibility notes shown to instructors.
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
}

impl Member {
    pub fn new(id: impl Into<MemberId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            notes: None,
            group_id: None,
            resource_id: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn is_bound(&self) -> bool {
        self.resource_id.is_some()
    }

    pub fn state(&self) -> MemberState {
        match (&self.group_id, &self.resource_id) {
            (_, Some(_)) => MemberState::Bound,
            (Some(_), None) => MemberState::InGroup,
            (None, None) => MemberState::Ungrouped,
        }
    }
}
