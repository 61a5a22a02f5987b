//! JSON snapshot store for single-machine use.
//!
//! The store holds an exclusive lock on `store.lock` from `open` until it
//! is dropped, and reads `store.json` only after taking it, so pitlane
//! processes sharing a data directory run one at a time and each starts
//! from the last saved state.

use std::fs::{File, OpenOptions, TryLockError};
use std::future::Future;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    EntityStore, FieldUpdate, HistoryStore, MemoryStore, SetField, Snapshot, StoreError,
};
use crate::format::relative_time;
use crate::models::{
    ActorId, Group, GroupId, HistoryFilter, HistoryRecord, Member, MemberId, NewHistoryRecord,
    Resource, ResourceId,
};

/// Store file name inside the data directory
pub const STORE_FILE: &str = "store.json";

/// Lock file guarding `STORE_FILE` across processes
pub const LOCK_FILE: &str = "store.lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSnapshot {
    pub data: Snapshot,
    pub saved_at: DateTime<Utc>,
}

impl SavedSnapshot {
    pub fn new(data: Snapshot) -> Self {
        Self {
            data,
            saved_at: Utc::now(),
        }
    }

    pub fn age_display(&self) -> String {
        relative_time(self.saved_at, Utc::now())
    }
}

/// A `MemoryStore` that rewrites a JSON file after every change.
///
/// A change that cannot be saved is dropped from memory as well, so the
/// in-memory state never runs ahead of the file.
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
    saved_at: Mutex<Option<DateTime<Utc>>>,
    _lock: File,
}

/// Take the exclusive lock on `path`, waiting for another process to release it.
fn acquire_lock(path: &Path) -> Result<File, StoreError> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    match file.try_lock() {
        Ok(()) => {}
        Err(TryLockError::WouldBlock) => {
            info!(path = %path.display(), "Store is in use, waiting for the lock");
            file.lock()?;
        }
        Err(TryLockError::Error(e)) => return Err(e.into()),
    }
    Ok(file)
}

impl JsonFileStore {
    /// Open (or start) the store file in `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let lock = acquire_lock(&data_dir.join(LOCK_FILE))?;
        let path = data_dir.join(STORE_FILE);

        let (snapshot, saved_at) = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let saved: SavedSnapshot = serde_json::from_str(&contents).map_err(|e| {
                StoreError::InvalidDocument(format!("{}: {}", path.display(), e))
            })?;
            debug!(
                path = %path.display(),
                age = %saved.age_display(),
                members = saved.data.members.len(),
                history = saved.data.history.len(),
                "Loaded store file"
            );
            (saved.data, Some(saved.saved_at))
        } else {
            (Snapshot::default(), None)
        };

        Ok(Self {
            path,
            inner: MemoryStore::from_snapshot(snapshot)?,
            saved_at: Mutex::new(saved_at),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the file was last written, if ever.
    pub async fn saved_at(&self) -> Option<DateTime<Utc>> {
        *self.saved_at.lock().await
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.inner.snapshot().await
    }

    fn save(&self, snapshot: Snapshot) -> Result<DateTime<Utc>, StoreError> {
        let saved = SavedSnapshot::new(snapshot);
        let contents = serde_json::to_string_pretty(&saved)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(saved.saved_at)
    }

    /// Apply `change` to memory and save it, or undo it if the save fails.
    async fn write_through<T>(
        &self,
        change: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        // Held across change and save so changes land on disk in order.
        let mut saved_at = self.saved_at.lock().await;
        let before = self.inner.snapshot().await;
        let value = change.await?;

        match self.save(self.inner.snapshot().await) {
            Ok(at) => {
                *saved_at = Some(at);
                Ok(value)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Save failed, discarding change");
                self.inner.restore(before).await?;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl EntityStore for JsonFileStore {
    async fn get_member(&self, id: &MemberId) -> Result<Member, StoreError> {
        self.inner.get_member(id).await
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Resource, StoreError> {
        self.inner.get_resource(id).await
    }

    async fn get_group(&self, id: &GroupId) -> Result<Group, StoreError> {
        self.inner.get_group(id).await
    }

    async fn list_members(&self) -> Result<Vec<Member>, StoreError> {
        self.inner.list_members().await
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        self.inner.list_resources().await
    }

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        self.inner.list_groups().await
    }

    async fn groups_with_instructor(&self, instructor: &ActorId) -> Result<Vec<Group>, StoreError> {
        self.inner.groups_with_instructor(instructor).await
    }

    async fn put_member(&self, member: &Member) -> Result<(), StoreError> {
        self.write_through(self.inner.put_member(member)).await
    }

    async fn put_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        self.write_through(self.inner.put_resource(resource)).await
    }

    async fn put_group(&self, group: &Group) -> Result<(), StoreError> {
        self.write_through(self.inner.put_group(group)).await
    }

    async fn update_fields(&self, update: &FieldUpdate) -> Result<(), StoreError> {
        self.write_through(self.inner.update_fields(update)).await
    }

    async fn add_to_set(&self, field: &SetField, value: &str) -> Result<(), StoreError> {
        self.write_through(self.inner.add_to_set(field, value)).await
    }

    async fn remove_from_set(&self, field: &SetField, value: &str) -> Result<(), StoreError> {
        self.write_through(self.inner.remove_from_set(field, value)).await
    }
}

#[async_trait]
impl HistoryStore for JsonFileStore {
    async fn append(&self, entry: NewHistoryRecord) -> Result<HistoryRecord, StoreError> {
        self.write_through(self.inner.append(entry)).await
    }

    async fn query(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>, StoreError> {
        self.inner.query(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::engine::AssignmentEngine;
    use crate::error::{AssignmentError, RollbackOutcome};
    use crate::history::HistoryLedger;
    use crate::models::{HistoryAction, HistoryScope};
    use crate::testing::{admin, fixture};

    async fn seeded(dir: &Path) -> Arc<JsonFileStore> {
        let store = Arc::new(JsonFileStore::open(dir).unwrap());
        let snapshot = fixture();
        for member in &snapshot.members {
            store.put_member(member).await.unwrap();
        }
        for resource in &snapshot.resources {
            store.put_resource(resource).await.unwrap();
        }
        for group in &snapshot.groups {
            store.put_group(group).await.unwrap();
        }
        store
    }

    #[test]
    fn test_saved_snapshot_age_just_now() {
        let saved = SavedSnapshot::new(Snapshot::default());
        assert_eq!(saved.age_display(), "just now");
    }

    #[tokio::test]
    async fn test_open_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.saved_at().await.is_none());
        assert!(store.list_members().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_changes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStore::open(dir.path()).unwrap();
            store.put_member(&Member::new("k1", "Maya")).await.unwrap();
            store
                .put_group(&Group::new("red", "Red Team", 3))
                .await
                .unwrap();
            store
                .add_to_set(&SetField::GroupMembers(GroupId::new("red")), "k1")
                .await
                .unwrap();
            store
                .append(
                    NewHistoryRecord::builder(
                        HistoryAction::TeamChanged,
                        &Member::new("k1", "Maya"),
                        &ActorId::new("admin"),
                    )
                    .build(),
                )
                .await
                .unwrap();
            assert!(store.saved_at().await.is_some());
        }

        let reopened = JsonFileStore::open(dir.path()).unwrap();
        let team = reopened.get_group(&GroupId::new("red")).await.unwrap();
        assert_eq!(team.member_ids, vec![MemberId::new("k1")]);
        let history = reopened
            .query(&HistoryFilter::new(HistoryScope::All, 10))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, HistoryAction::TeamChanged);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORE_FILE), "{not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(dir.path()),
            Err(StoreError::InvalidDocument(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_save_leaves_no_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(dir.path()).await;
        let engine = AssignmentEngine::new(store.clone(), HistoryLedger::new(store.clone()));

        // A directory where the temp file goes makes every save fail.
        let blocker = dir.path().join("store.json.tmp");
        std::fs::create_dir(&blocker).unwrap();

        let err = engine
            .assign(&MemberId::new("k1"), &ResourceId::new("car-1"), &admin(), None)
            .await
            .unwrap_err();
        match err {
            AssignmentError::Store { source, rollback } => {
                assert!(matches!(source, StoreError::Io(_)));
                assert_eq!(rollback, RollbackOutcome::NotNeeded);
            }
            other => panic!("expected store error, got {:?}", other),
        }

        let car = store.get_resource(&ResourceId::new("car-1")).await.unwrap();
        assert!(car.bound_member_ids.is_empty());
        assert!(store.get_member(&MemberId::new("k1")).await.unwrap().resource_id.is_none());
        assert!(engine.audit().await.unwrap().is_empty());

        // Once saves work again, the next change does not carry the dropped one.
        std::fs::remove_dir(&blocker).unwrap();
        engine
            .assign(&MemberId::new("k2"), &ResourceId::new("car-2"), &admin(), None)
            .await
            .unwrap();
        drop(engine);
        drop(store);

        let reopened = JsonFileStore::open(dir.path()).unwrap();
        let car = reopened.get_resource(&ResourceId::new("car-1")).await.unwrap();
        assert!(car.bound_member_ids.is_empty());
        let history = reopened
            .query(&HistoryFilter::new(HistoryScope::All, 10))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].member_id, MemberId::new("k2"));
    }

    #[tokio::test]
    async fn test_failed_history_save_is_not_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(dir.path()).await;
        std::fs::create_dir(dir.path().join("store.json.tmp")).unwrap();

        let entry = NewHistoryRecord::builder(
            HistoryAction::Unassigned,
            &Member::new("k1", "Maya"),
            &admin(),
        )
        .build();
        assert!(store.append(entry).await.is_err());
        let history = store
            .query(&HistoryFilter::new(HistoryScope::All, 10))
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn test_second_open_waits_for_first() {
        let dir = tempfile::tempdir().unwrap();
        let first = JsonFileStore::open(dir.path()).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let path = dir.path().to_path_buf();
        let opener = std::thread::spawn(move || {
            let store = JsonFileStore::open(&path).map(|_| ());
            tx.send(store.is_ok()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(first);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
        opener.join().unwrap();
    }
}
