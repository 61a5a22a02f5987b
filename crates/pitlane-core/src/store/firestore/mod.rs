//! Firestore-backed entity and history store.
//!
//! Every write goes through the `documents:commit` endpoint, so a batch of
//! writes commits atomically. Membership arrays use server-side array
//! transforms, and history timestamps are assigned by the server.
//!
//! The store remembers the `updateTime` of every document it reads. The
//! first write to such a document in a commit carries it as a precondition,
//! so a commit based on a read that another client has since overtaken is
//! rejected as a whole.

pub mod client;
pub mod value;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

pub use client::FirestoreClient;
use value::{decode_document, encode_entity, encode_value, Document};

use super::{Collection, EntityStore, FieldUpdate, HistoryStore, SetField, StoreError, Write};
use crate::models::{
    generate_document_id, ActorId, Group, GroupId, HistoryFilter, HistoryId, HistoryRecord,
    HistoryScope, Member, MemberId, NewHistoryRecord, Resource, ResourceId,
};

/// Page size for collection listings.
const LIST_PAGE_SIZE: usize = 300;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    write_results: Vec<WriteResult>,
    #[serde(default)]
    commit_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteResult {
    #[serde(default)]
    transform_results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    #[serde(default)]
    document: Option<Document>,
}

pub struct FirestoreStore {
    client: FirestoreClient,
    /// `updateTime` as last read, keyed by full document name.
    read_versions: DashMap<String, String>,
}

impl FirestoreStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self {
            client,
            read_versions: DashMap::new(),
        }
    }

    fn remember_version(&self, document: &Document) {
        if let Some(ref update_time) = document.update_time {
            self.read_versions
                .insert(document.name.clone(), update_time.clone());
        }
    }

    fn forget_versions(&self, writes: &[Write]) {
        for write in writes {
            self.read_versions.remove(&self.write_document_name(write));
        }
    }

    fn write_document_name(&self, write: &Write) -> String {
        self.client
            .document_name(write.collection().name(), write.document_id())
    }

    async fn get_document<T: DeserializeOwned>(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<T, StoreError> {
        let url = self.client.document_url(collection.name(), id);
        let document: Document = self.client.get(&url).await.map_err(|e| {
            if e.is_not_found() {
                StoreError::not_found(collection.name(), id)
            } else {
                e
            }
        })?;
        self.remember_version(&document);
        decode_document(&document)
    }

    async fn list_documents<T: DeserializeOwned>(
        &self,
        collection: Collection,
    ) -> Result<Vec<T>, StoreError> {
        let url = format!("{}/{}", self.client.documents_url(), collection.name());
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", LIST_PAGE_SIZE.to_string())];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }
            let page: ListDocumentsResponse = self.client.get_with_query(&url, &query).await?;
            for document in &page.documents {
                items.push(decode_document(document)?);
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(collection = %collection, count = items.len(), "Listed documents");
        Ok(items)
    }

    async fn run_query<T: DeserializeOwned>(&self, query: Value) -> Result<Vec<T>, StoreError> {
        let url = format!("{}:runQuery", self.client.documents_url());
        let items: Vec<RunQueryItem> = self.client.post(&url, &query).await?;
        items
            .iter()
            .filter_map(|item| item.document.as_ref())
            .map(decode_document)
            .collect()
    }

    async fn commit(&self, writes: Vec<Value>) -> Result<CommitResponse, StoreError> {
        let url = format!("{}:commit", self.client.documents_url());
        let body = json!({ "writes": writes });
        self.client.post(&url, &body).await
    }

    fn put_write(&self, collection: Collection, id: &str, fields: Map<String, Value>) -> Value {
        json!({
            "update": {
                "name": self.client.document_name(collection.name(), id),
                "fields": fields,
            }
        })
    }

    /// Encode a batch. The first write to each document read by this store
    /// requires the document to be unchanged since that read.
    fn encode_batch(&self, writes: &[Write]) -> Vec<Value> {
        let mut seen = HashSet::new();
        writes
            .iter()
            .map(|write| {
                let mut encoded = self.encode_write(write);
                let name = self.write_document_name(write);
                if seen.insert(name.clone()) {
                    if let Some(version) = self.read_versions.get(&name) {
                        encoded["currentDocument"] = json!({ "updateTime": version.value() });
                    }
                }
                encoded
            })
            .collect()
    }

    /// Encode a field-level write in the commit request format.
    fn encode_write(&self, write: &Write) -> Value {
        let name = self.write_document_name(write);
        match write {
            Write::Update(update) => {
                let mut fields = Map::new();
                fields.insert(update.field_path().to_string(), encode_value(&update.value()));
                json!({
                    "update": { "name": name, "fields": fields },
                    "updateMask": { "fieldPaths": [update.field_path()] },
                    "currentDocument": { "exists": true },
                })
            }
            Write::AddToSet { field, value } => {
                set_transform(&name, field, "appendMissingElements", value)
            }
            Write::RemoveFromSet { field, value } => {
                set_transform(&name, field, "removeAllFromArray", value)
            }
        }
    }
}

fn set_transform(document: &str, field: &SetField, op: &str, value: &str) -> Value {
    let mut transform = Map::new();
    transform.insert("fieldPath".to_string(), Value::from(field.field_path()));
    transform.insert(op.to_string(), json!({ "values": [{ "stringValue": value }] }));
    json!({
        "transform": { "document": document, "fieldTransforms": [transform] },
        "currentDocument": { "exists": true },
    })
}

fn field_filter(field: &str, op: &str, value: &str) -> Value {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": field },
            "op": op,
            "value": { "stringValue": value },
        }
    })
}

/// Build the `runQuery` body for a history read.
fn history_query(filter: &HistoryFilter) -> Value {
    let mut filters = Vec::new();
    match &filter.scope {
        HistoryScope::All => {}
        HistoryScope::Member(id) => filters.push(field_filter("memberId", "EQUAL", id.as_str())),
        HistoryScope::Resource(id) => {
            filters.push(field_filter("resourceId", "EQUAL", id.as_str()))
        }
        HistoryScope::Group(id) => filters.push(field_filter("groupId", "EQUAL", id.as_str())),
    }
    if let Some(action) = filter.action {
        filters.push(field_filter("action", "EQUAL", action.as_str()));
    }

    let mut query = json!({
        "from": [{ "collectionId": Collection::History.name() }],
        "orderBy": [{ "field": { "fieldPath": "timestamp" }, "direction": "DESCENDING" }],
        "limit": filter.limit,
    });
    match filters.len() {
        0 => {}
        1 => query["where"] = filters.remove(0),
        _ => query["where"] = json!({ "compositeFilter": { "op": "AND", "filters": filters } }),
    }
    json!({ "structuredQuery": query })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidResponse(format!("bad timestamp {}: {}", value, e)))
}

#[async_trait]
impl EntityStore for FirestoreStore {
    async fn get_member(&self, id: &MemberId) -> Result<Member, StoreError> {
        self.get_document(Collection::Members, id.as_str()).await
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Resource, StoreError> {
        self.get_document(Collection::Resources, id.as_str()).await
    }

    async fn get_group(&self, id: &GroupId) -> Result<Group, StoreError> {
        let group: Group = self.get_document(Collection::Groups, id.as_str()).await?;
        group.validate().map_err(StoreError::InvalidDocument)?;
        Ok(group)
    }

    async fn list_members(&self) -> Result<Vec<Member>, StoreError> {
        self.list_documents(Collection::Members).await
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        self.list_documents(Collection::Resources).await
    }

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        self.list_documents(Collection::Groups).await
    }

    async fn groups_with_instructor(&self, instructor: &ActorId) -> Result<Vec<Group>, StoreError> {
        let query = json!({
            "structuredQuery": {
                "from": [{ "collectionId": Collection::Groups.name() }],
                "where": field_filter("instructorIds", "ARRAY_CONTAINS", instructor.as_str()),
            }
        });
        self.run_query(query).await
    }

    async fn put_member(&self, member: &Member) -> Result<(), StoreError> {
        let write = self.put_write(Collection::Members, member.id.as_str(), encode_entity(member)?);
        self.commit(vec![write]).await.map(|_| ())
    }

    async fn put_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        let write = self.put_write(
            Collection::Resources,
            resource.id.as_str(),
            encode_entity(resource)?,
        );
        self.commit(vec![write]).await.map(|_| ())
    }

    async fn put_group(&self, group: &Group) -> Result<(), StoreError> {
        group.validate().map_err(StoreError::InvalidDocument)?;
        let write = self.put_write(Collection::Groups, group.id.as_str(), encode_entity(group)?);
        self.commit(vec![write]).await.map(|_| ())
    }

    async fn update_fields(&self, update: &FieldUpdate) -> Result<(), StoreError> {
        self.apply_batch(&[Write::Update(update.clone())]).await
    }

    async fn add_to_set(&self, field: &SetField, value: &str) -> Result<(), StoreError> {
        self.apply_batch(&[Write::AddToSet {
            field: field.clone(),
            value: value.to_string(),
        }])
        .await
    }

    async fn remove_from_set(&self, field: &SetField, value: &str) -> Result<(), StoreError> {
        self.apply_batch(&[Write::RemoveFromSet {
            field: field.clone(),
            value: value.to_string(),
        }])
        .await
    }

    fn atomic_batches(&self) -> bool {
        true
    }

    async fn apply_batch(&self, writes: &[Write]) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        let encoded = self.encode_batch(writes);
        let result = self.commit(encoded).await;
        // Versions are good for one commit; the engine re-reads before the next.
        self.forget_versions(writes);
        match result {
            Ok(_) => {
                debug!(writes = writes.len(), "Committed batch");
                Ok(())
            }
            Err(e) => {
                if matches!(e, StoreError::Conflict(_)) {
                    warn!(writes = writes.len(), "Commit rejected, a document changed since it was read");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl HistoryStore for FirestoreStore {
    async fn append(&self, entry: NewHistoryRecord) -> Result<HistoryRecord, StoreError> {
        let id = generate_document_id();
        let write = json!({
            "update": {
                "name": self.client.document_name(Collection::History.name(), &id),
                "fields": encode_entity(&entry)?,
            },
            "currentDocument": { "exists": false },
            "updateTransforms": [
                { "fieldPath": "timestamp", "setToServerValue": "REQUEST_TIME" },
                { "fieldPath": "createdAt", "setToServerValue": "REQUEST_TIME" },
            ],
        });
        let response = self.commit(vec![write]).await?;

        let server_time = response
            .write_results
            .first()
            .and_then(|r| r.transform_results.first())
            .and_then(|v| v.get("timestampValue"))
            .and_then(Value::as_str)
            .or(response.commit_time.as_deref())
            .ok_or_else(|| StoreError::InvalidResponse("commit returned no time".to_string()))?;
        let timestamp = parse_timestamp(server_time)?;

        Ok(entry.into_record(HistoryId::new(id), timestamp, timestamp))
    }

    async fn query(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>, StoreError> {
        if filter.limit == 0 {
            return Ok(Vec::new());
        }
        self.run_query(history_query(filter)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryAction, ResourceStatus};

    fn store() -> FirestoreStore {
        FirestoreStore::new(FirestoreClient::new("race-day").unwrap())
    }

    #[test]
    fn test_encode_field_update() {
        let write = store().encode_write(&Write::Update(FieldUpdate::ResourceStatus {
            resource: ResourceId::new("car-1"),
            status: ResourceStatus::InUse,
        }));
        assert_eq!(
            write["update"]["name"],
            "projects/race-day/databases/(default)/documents/vehicles/car-1"
        );
        assert_eq!(write["update"]["fields"]["status"], json!({ "stringValue": "in-use" }));
        assert_eq!(write["updateMask"]["fieldPaths"], json!(["status"]));
        assert_eq!(write["currentDocument"]["exists"], true);
    }

    #[test]
    fn test_encode_cleared_reference() {
        let write = store().encode_write(&Write::Update(FieldUpdate::MemberResource {
            member: MemberId::new("k1"),
            resource: None,
        }));
        assert_eq!(write["update"]["fields"]["resourceId"], json!({ "nullValue": null }));
    }

    #[test]
    fn test_encode_set_transforms() {
        let add = store().encode_write(&Write::AddToSet {
            field: SetField::GroupMembers(GroupId::new("red")),
            value: "k1".to_string(),
        });
        let transform = &add["transform"]["fieldTransforms"][0];
        assert_eq!(transform["fieldPath"], "memberIds");
        assert_eq!(transform["appendMissingElements"]["values"][0]["stringValue"], "k1");

        let remove = store().encode_write(&Write::RemoveFromSet {
            field: SetField::ResourceBoundMembers(ResourceId::new("car-1")),
            value: "k1".to_string(),
        });
        let transform = &remove["transform"]["fieldTransforms"][0];
        assert_eq!(transform["fieldPath"], "boundMemberIds");
        assert!(transform.get("removeAllFromArray").is_some());
    }

    #[test]
    fn test_history_query_shapes() {
        let all = history_query(&HistoryFilter::new(HistoryScope::All, 5));
        assert!(all["structuredQuery"].get("where").is_none());
        assert_eq!(all["structuredQuery"]["limit"], 5);
        assert_eq!(
            all["structuredQuery"]["orderBy"][0]["direction"],
            "DESCENDING"
        );

        let by_group = history_query(&HistoryFilter::new(HistoryScope::Group(GroupId::new("red")), 5));
        let where_clause = &by_group["structuredQuery"]["where"]["fieldFilter"];
        assert_eq!(where_clause["field"]["fieldPath"], "groupId");
        assert_eq!(where_clause["value"]["stringValue"], "red");

        let combined = history_query(
            &HistoryFilter::new(HistoryScope::Member(MemberId::new("k1")), 5)
                .action(HistoryAction::Swapped),
        );
        let composite = &combined["structuredQuery"]["where"]["compositeFilter"];
        assert_eq!(composite["op"], "AND");
        assert_eq!(composite["filters"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_parse_commit_response() {
        let json = r#"{
            "writeResults": [{
                "updateTime": "2026-05-02T14:03:11.120Z",
                "transformResults": [
                    { "timestampValue": "2026-05-02T14:03:11.118Z" },
                    { "timestampValue": "2026-05-02T14:03:11.118Z" }
                ]
            }],
            "commitTime": "2026-05-02T14:03:11.120Z"
        }"#;
        let response: CommitResponse = serde_json::from_str(json).unwrap();
        let ts = response.write_results[0].transform_results[0]["timestampValue"]
            .as_str()
            .unwrap();
        let parsed = parse_timestamp(ts).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-05-02T14:03:11.118+00:00");
    }

    #[test]
    fn test_parse_run_query_response() {
        let json = r#"[
            { "readTime": "2026-05-02T14:03:11Z" },
            { "document": {
                "name": "projects/race-day/databases/(default)/documents/assignmentHistory/h1",
                "fields": {
                    "action": { "stringValue": "assigned" },
                    "memberId": { "stringValue": "k1" },
                    "resourceId": { "stringValue": "car-1" },
                    "groupId": { "nullValue": null },
                    "actorId": { "stringValue": "admin" },
                    "metadata": { "mapValue": { "fields": {
                        "memberName": { "stringValue": "Maya" },
                        "resourceName": { "stringValue": "Red Racer" },
                        "source": { "stringValue": "dashboard" }
                    }}},
                    "timestamp": { "timestampValue": "2026-05-02T14:03:11.118Z" },
                    "createdAt": { "timestampValue": "2026-05-02T14:03:11.118Z" }
                }
              },
              "readTime": "2026-05-02T14:03:11Z" }
        ]"#;
        let items: Vec<RunQueryItem> = serde_json::from_str(json).unwrap();
        let records: Vec<HistoryRecord> = items
            .iter()
            .filter_map(|i| i.document.as_ref())
            .map(decode_document)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, HistoryId::new("h1"));
        assert_eq!(records[0].action, HistoryAction::Assigned);
        assert_eq!(records[0].metadata.resource_name.as_deref(), Some("Red Racer"));
        assert!(records[0].reason.is_none());
    }

    fn read_document(name: &str, update_time: &str) -> Document {
        serde_json::from_value(json!({
            "name": format!("projects/race-day/databases/(default)/documents/{}", name),
            "fields": {},
            "updateTime": update_time,
        }))
        .unwrap()
    }

    #[test]
    fn test_batch_carries_read_versions() {
        let store = store();
        store.remember_version(&read_document("vehicles/car-1", "2026-05-02T14:00:00.000001Z"));

        let writes = [
            Write::AddToSet {
                field: SetField::ResourceBoundMembers(ResourceId::new("car-1")),
                value: "k1".to_string(),
            },
            Write::Update(FieldUpdate::ResourceStatus {
                resource: ResourceId::new("car-1"),
                status: ResourceStatus::InUse,
            }),
            Write::Update(FieldUpdate::MemberResource {
                member: MemberId::new("k1"),
                resource: Some(ResourceId::new("car-1")),
            }),
        ];
        let encoded = store.encode_batch(&writes);

        assert_eq!(
            encoded[0]["currentDocument"],
            json!({ "updateTime": "2026-05-02T14:00:00.000001Z" })
        );
        // Later writes to the same document see the first one's result.
        assert_eq!(encoded[1]["currentDocument"], json!({ "exists": true }));
        // Never read, so only existence is required.
        assert_eq!(encoded[2]["currentDocument"], json!({ "exists": true }));

        store.forget_versions(&writes);
        let again = store.encode_batch(&writes);
        assert_eq!(again[0]["currentDocument"], json!({ "exists": true }));
    }
}
