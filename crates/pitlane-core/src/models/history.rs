//! Assignment history entries.
//!
//! A history entry is written once per committed assignment change and
//! never edited afterwards. Display names are copied in at write time so
//! an entry still reads correctly after the kid, vehicle or team is gone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActorId, Group, GroupId, HistoryId, Member, MemberId, Resource, ResourceId};

/// Source tag used when the caller does not provide one.
pub const DEFAULT_SOURCE: &str = "pitlane";

/// Kind of assignment change an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum HistoryAction {
    Assigned,
    Unassigned,
    Swapped,
    TeamChanged,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Assigned => "assigned",
            HistoryAction::Unassigned => "unassigned",
            HistoryAction::Swapped => "swapped",
            HistoryAction::TeamChanged => "team_changed",
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned" => Ok(HistoryAction::Assigned),
            "unassigned" => Ok(HistoryAction::Unassigned),
            "swapped" => Ok(HistoryAction::Swapped),
            "team_changed" => Ok(HistoryAction::TeamChanged),
            _ => Err(format!("Unknown history action: {}", s)),
        }
    }
}

/// Display names captured when the entry was written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct HistoryMetadata {
    pub member_name: String,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub previous_resource_name: Option<String>,
    #[serde(default)]
    pub previous_group_name: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

/// An entry that has not been written yet; the store assigns id and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHistoryRecord {
    pub action: HistoryAction,
    pub member_id: MemberId,
    pub resource_id: Option<ResourceId>,
    pub group_id: Option<GroupId>,
    pub previous_resource_id: Option<ResourceId>,
    pub previous_group_id: Option<GroupId>,
    pub actor_id: ActorId,
    pub reason: Option<String>,
    pub metadata: HistoryMetadata,
}

impl NewHistoryRecord {
    /// Start an entry for `member`, snapshotting its name.
    pub fn builder(action: HistoryAction, member: &Member, actor: &ActorId) -> HistoryRecordBuilder {
        HistoryRecordBuilder::new(action, member, actor)
    }

    pub fn into_record(
        self,
        id: HistoryId,
        timestamp: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> HistoryRecord {
        HistoryRecord {
            id,
            action: self.action,
            member_id: self.member_id,
            resource_id: self.resource_id,
            group_id: self.group_id,
            previous_resource_id: self.previous_resource_id,
            previous_group_id: self.previous_group_id,
            actor_id: self.actor_id,
            reason: self.reason,
            metadata: self.metadata,
            timestamp,
            created_at,
        }
    }
}

/// Builder that pulls ids and display names from the entities involved.
pub struct HistoryRecordBuilder {
    record: NewHistoryRecord,
}

impl HistoryRecordBuilder {
    pub fn new(action: HistoryAction, member: &Member, actor: &ActorId) -> Self {
        Self {
            record: NewHistoryRecord {
                action,
                member_id: member.id.clone(),
                resource_id: None,
                group_id: None,
                previous_resource_id: None,
                previous_group_id: None,
                actor_id: actor.clone(),
                reason: None,
                metadata: HistoryMetadata {
                    member_name: member.name.clone(),
                    source: default_source(),
                    ..HistoryMetadata::default()
                },
            },
        }
    }

    pub fn resource(mut self, resource: Option<&Resource>) -> Self {
        self.record.resource_id = resource.map(|r| r.id.clone());
        self.record.metadata.resource_name = resource.map(|r| r.name.clone());
        self
    }

    /// Vehicle known only by id; does not override `resource`.
    pub fn resource_id(mut self, id: Option<&ResourceId>) -> Self {
        if self.record.resource_id.is_none() {
            self.record.resource_id = id.cloned();
        }
        self
    }

    pub fn group(mut self, group: Option<&Group>) -> Self {
        self.record.group_id = group.map(|g| g.id.clone());
        self.record.metadata.group_name = group.map(|g| g.name.clone());
        self
    }

    pub fn previous_resource(mut self, resource: Option<&Resource>) -> Self {
        self.record.previous_resource_id = resource.map(|r| r.id.clone());
        self.record.metadata.previous_resource_name = resource.map(|r| r.name.clone());
        self
    }

    /// Previous vehicle known only by id (its document is gone).
    pub fn previous_resource_id(mut self, id: Option<&ResourceId>) -> Self {
        if self.record.previous_resource_id.is_none() {
            self.record.previous_resource_id = id.cloned();
        }
        self
    }

    pub fn previous_group(mut self, group: Option<&Group>) -> Self {
        self.record.previous_group_id = group.map(|g| g.id.clone());
        self.record.metadata.previous_group_name = group.map(|g| g.name.clone());
        self
    }

    pub fn previous_group_id(mut self, id: Option<&GroupId>) -> Self {
        if self.record.previous_group_id.is_none() {
            self.record.previous_group_id = id.cloned();
        }
        self
    }

    pub fn reason(mut self, reason: Option<&str>) -> Self {
        self.record.reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.record.metadata.source = source.into();
        self
    }

    pub fn build(self) -> NewHistoryRecord {
        self.record
    }
}

/// A written, immutable history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct HistoryRecord {
    pub id: HistoryId,
    pub action: HistoryAction,
    pub member_id: MemberId,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub previous_resource_id: Option<ResourceId>,
    #[serde(default)]
    pub previous_group_id: Option<GroupId>,
    pub actor_id: ActorId,
    #[serde(default)]
    pub reason: Option<String>,
    pub metadata: HistoryMetadata,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Which slice of the history a query reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryScope {
    All,
    Member(MemberId),
    /// Entries whose `resource_id` is this vehicle.
    Resource(ResourceId),
    /// Entries whose `group_id` is this team.
    Group(GroupId),
}

/// Query parameters for history reads. Results are always newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFilter {
    pub scope: HistoryScope,
    pub action: Option<HistoryAction>,
    pub limit: usize,
}

impl HistoryFilter {
    pub fn new(scope: HistoryScope, limit: usize) -> Self {
        Self {
            scope,
            action: None,
            limit,
        }
    }

    pub fn action(mut self, action: HistoryAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn matches(&self, record: &HistoryRecord) -> bool {
        let in_scope = match &self.scope {
            HistoryScope::All => true,
            HistoryScope::Member(id) => &record.member_id == id,
            HistoryScope::Resource(id) => record.resource_id.as_ref() == Some(id),
            HistoryScope::Group(id) => record.group_id.as_ref() == Some(id),
        };
        in_scope && self.action.map_or(true, |a| a == record.action)
    }
}
