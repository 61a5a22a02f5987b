//! Append-only assignment history.
//!
//! The ledger sits between the engine and a `HistoryStore`. Writes from
//! the engine go through `record`, which never fails: a history outage is
//! logged and the assignment that triggered it still succeeds. Reads are
//! always newest first.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{
    GroupId, HistoryFilter, HistoryRecord, HistoryScope, MemberId, NewHistoryRecord, ResourceId,
};
use crate::store::{HistoryStore, StoreError};

/// Entries returned when the caller does not pick a limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Upper bound on entries returned by a single query.
pub const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("History write failed: {0}")]
    WriteFailed(#[source] StoreError),

    #[error("History query failed: {0}")]
    QueryFailed(#[source] StoreError),
}

#[derive(Clone)]
pub struct HistoryLedger {
    store: Arc<dyn HistoryStore>,
}

impl HistoryLedger {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    pub async fn append(&self, entry: NewHistoryRecord) -> Result<HistoryRecord, HistoryError> {
        let record = self.store.append(entry).await.map_err(HistoryError::WriteFailed)?;
        debug!(id = %record.id, action = %record.action, member = %record.member_id, "Appended history");
        Ok(record)
    }

    /// Append without failing the caller; `None` means the entry was lost.
    pub async fn record(&self, entry: NewHistoryRecord) -> Option<HistoryRecord> {
        let action = entry.action;
        let member = entry.member_id.clone();
        match self.append(entry).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(action = %action, member = %member, error = %e, "History entry dropped");
                None
            }
        }
    }

    pub async fn query(&self, filter: HistoryFilter) -> Result<Vec<HistoryRecord>, HistoryError> {
        let filter = HistoryFilter {
            limit: filter.limit.min(MAX_HISTORY_LIMIT),
            ..filter
        };
        if filter.limit == 0 {
            return Ok(Vec::new());
        }
        let mut records = self
            .store
            .query(&filter)
            .await
            .map_err(HistoryError::QueryFailed)?;
        // Stable: equal timestamps keep the store's order.
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(filter.limit);
        Ok(records)
    }

    pub async fn query_by_member(
        &self,
        member: &MemberId,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.query(HistoryFilter::new(HistoryScope::Member(member.clone()), limit))
            .await
    }

    pub async fn query_by_resource(
        &self,
        resource: &ResourceId,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.query(HistoryFilter::new(HistoryScope::Resource(resource.clone()), limit))
            .await
    }

    pub async fn query_by_group(
        &self,
        group: &GroupId,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.query(HistoryFilter::new(HistoryScope::Group(group.clone()), limit))
            .await
    }

    pub async fn query_recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.query(HistoryFilter::new(HistoryScope::All, limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActorId, Group, HistoryAction, Member, Resource};
    use crate::store::MemoryStore;
    use crate::testing::FailingHistory;

    fn entry(action: HistoryAction, member: &str, group: Option<&Group>) -> NewHistoryRecord {
        NewHistoryRecord::builder(action, &Member::new(member, member), &ActorId::new("admin"))
            .group(group)
            .build()
    }

    #[tokio::test]
    async fn test_queries_are_newest_first() {
        let ledger = HistoryLedger::new(Arc::new(MemoryStore::new()));
        let red = Group::new("red", "Red Team", 4);
        for member in ["k1", "k2", "k3"] {
            ledger
                .append(entry(HistoryAction::TeamChanged, member, Some(&red)))
                .await
                .unwrap();
        }

        let records = ledger.query_recent(10).await.unwrap();
        let members: Vec<&str> = records.iter().map(|r| r.member_id.as_str()).collect();
        assert_eq!(members, vec!["k3", "k2", "k1"]);
        assert!(records.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_query_by_group_limits_and_scopes() {
        let ledger = HistoryLedger::new(Arc::new(MemoryStore::new()));
        let red = Group::new("red", "Red Team", 4);
        let blue = Group::new("blue", "Blue Team", 4);
        for i in 0..7 {
            ledger
                .append(entry(HistoryAction::TeamChanged, &format!("k{}", i), Some(&red)))
                .await
                .unwrap();
        }
        ledger
            .append(entry(HistoryAction::TeamChanged, "k9", Some(&blue)))
            .await
            .unwrap();

        let records = ledger.query_by_group(&red.id, 5).await.unwrap();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.group_id.as_ref() == Some(&red.id)));
        assert_eq!(records[0].member_id.as_str(), "k6");
    }

    #[tokio::test]
    async fn test_query_by_resource_and_member() {
        let ledger = HistoryLedger::new(Arc::new(MemoryStore::new()));
        let car = Resource::new("car-1", "Red Racer");
        let maya = Member::new("k1", "Maya");
        ledger
            .append(
                NewHistoryRecord::builder(HistoryAction::Assigned, &maya, &ActorId::new("admin"))
                    .resource(Some(&car))
                    .build(),
            )
            .await
            .unwrap();
        ledger
            .append(entry(HistoryAction::TeamChanged, "k2", None))
            .await
            .unwrap();

        let by_car = ledger.query_by_resource(&car.id, 10).await.unwrap();
        assert_eq!(by_car.len(), 1);
        assert_eq!(by_car[0].metadata.resource_name.as_deref(), Some("Red Racer"));
        assert_eq!(ledger.query_by_member(&maya.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_limit_zero_and_clamp() {
        let ledger = HistoryLedger::new(Arc::new(MemoryStore::new()));
        ledger
            .append(entry(HistoryAction::Unassigned, "k1", None))
            .await
            .unwrap();
        assert!(ledger.query_recent(0).await.unwrap().is_empty());
        assert_eq!(ledger.query_recent(usize::MAX).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_action_filter() {
        let ledger = HistoryLedger::new(Arc::new(MemoryStore::new()));
        ledger.append(entry(HistoryAction::Unassigned, "k1", None)).await.unwrap();
        ledger.append(entry(HistoryAction::TeamChanged, "k1", None)).await.unwrap();

        let filter = HistoryFilter::new(HistoryScope::All, DEFAULT_HISTORY_LIMIT)
            .action(HistoryAction::Unassigned);
        let records = ledger.query(filter).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, HistoryAction::Unassigned);
    }

    #[tokio::test]
    async fn test_record_swallows_failures() {
        let ledger = HistoryLedger::new(Arc::new(FailingHistory));
        assert!(ledger
            .record(entry(HistoryAction::Unassigned, "k1", None))
            .await
            .is_none());
        assert!(matches!(
            ledger.append(entry(HistoryAction::Unassigned, "k1", None)).await,
            Err(HistoryError::WriteFailed(_))
        ));
        assert!(matches!(
            ledger.query_recent(5).await,
            Err(HistoryError::QueryFailed(_))
        ));
    }
}
