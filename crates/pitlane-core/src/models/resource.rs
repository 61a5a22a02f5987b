use serde::{Deserialize, Serialize};

use super::{MemberId, ResourceId};

/// Operational status of a race vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ResourceStatus {
    #[default]
    Available,
    InUse,
    Maintenance,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Available => "available",
            ResourceStatus::InUse => "in-use",
            ResourceStatus::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(ResourceStatus::Available),
            "in-use" => Ok(ResourceStatus::InUse),
            "maintenance" => Ok(ResourceStatus::Maintenance),
            _ => Err(format!("Unknown vehicle status: {}", s)),
        }
    }
}

/// A race vehicle that kids are bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    #[serde(default)]
    pub status: ResourceStatus,
    #[serde(default)]
    pub bound_member_ids: Vec<MemberId>,
}

impl Resource {
    pub fn new(id: impl Into<ResourceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ResourceStatus::Available,
            bound_member_ids: Vec::new(),
        }
    }

    pub fn is_bound_to(&self, member: &MemberId) -> bool {
        self.bound_member_ids.contains(member)
    }

    /// Number of members bound here, not counting `member`.
    pub fn bound_excluding(&self, member: &MemberId) -> usize {
        self.bound_member_ids.iter().filter(|m| *m != member).count()
    }

    /// Status this vehicle should carry with `bound_count` kids on it.
    /// Maintenance is set by operators and survives binding changes.
    pub fn status_for(&self, bound_count: usize) -> ResourceStatus {
        match self.status {
            ResourceStatus::Maintenance => ResourceStatus::Maintenance,
            _ if bound_count > 0 => ResourceStatus::InUse,
            _ => ResourceStatus::Available,
        }
    }

    pub fn expected_status(&self) -> ResourceStatus {
        self.status_for(self.bound_member_ids.len())
    }
}
