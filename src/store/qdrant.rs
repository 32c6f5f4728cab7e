//! Qdrant REST adapter.
//!
//! Speaks the JSON API over `ureq` with per-operation deadlines (30 s upsert,
//! 10 s search/scroll, 5 s retrieve) and retries transient failures three
//! times with exponential backoff and jitter. Point ids are caller-chosen
//! UUIDs, so a retried batch lands on the same points and at-least-once
//! delivery stays idempotent.

use std::time::Duration;

use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{
    CollectionStats, Condition, FieldIndexKind, Filter, PointRecord, ScoredPoint, VectorStore,
};

const UPSERT_TIMEOUT: Duration = Duration::from_secs(30);
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const RETRIEVE_TIMEOUT: Duration = Duration::from_secs(5);
const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Points per upsert request.
const UPSERT_BATCH: usize = 256;

/// Backoff schedule for transient failures.
const RETRY_DELAYS_MS: [u64; 3] = [100, 500, 2000];

/// Qdrant-backed vector store.
pub struct QdrantStore {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for QdrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl QdrantStore {
    /// Connect to `http://host:port`. No request is issued until first use.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    /// Attach an `api-key` header to every request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authed(&self, request: ureq::Request) -> ureq::Request {
        match &self.api_key {
            Some(key) => request.set("api-key", key),
            None => request,
        }
    }

    fn classify(&self, operation: &str, collection: &str, err: ureq::Error) -> StoreError {
        match err {
            ureq::Error::Status(404, _) => StoreError::NotFound {
                collection: collection.to_string(),
            },
            ureq::Error::Status(code, response) if code < 500 => {
                let body = response.into_string().unwrap_or_default();
                StoreError::BadRequest {
                    message: format!("{operation}: HTTP {code}: {body}"),
                }
            }
            ureq::Error::Status(code, _) => StoreError::Unreachable {
                endpoint: self.base_url.clone(),
                message: format!("{operation}: HTTP {code}"),
            },
            ureq::Error::Transport(transport) => {
                let message = transport.to_string();
                if message.to_ascii_lowercase().contains("timed out") {
                    StoreError::Timeout {
                        operation: operation.to_string(),
                    }
                } else {
                    StoreError::Unreachable {
                        endpoint: self.base_url.clone(),
                        message,
                    }
                }
            }
        }
    }

    /// Run `call`; transient failures retry up to 3 times, each preceded by
    /// the next backoff delay plus jitter.
    fn with_retry<T>(
        &self,
        operation: &str,
        collection: &str,
        mut call: impl FnMut() -> Result<T, ureq::Error>,
    ) -> StoreResult<T> {
        let mut delays = RETRY_DELAYS_MS.iter();
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let classified = self.classify(operation, collection, err);
                    let transient = matches!(
                        classified,
                        StoreError::Unreachable { .. } | StoreError::Timeout { .. }
                    );
                    let Some(delay_ms) = delays.next() else {
                        return Err(classified);
                    };
                    if !transient {
                        return Err(classified);
                    }
                    tracing::warn!(
                        operation,
                        collection,
                        error = %classified,
                        backoff_ms = delay_ms,
                        "transient store error, backing off"
                    );
                    let jitter = rand::random::<u64>() % (delay_ms / 4 + 1);
                    std::thread::sleep(Duration::from_millis(delay_ms + jitter));
                }
            }
        }
    }

    fn get_collection_info(&self, name: &str) -> StoreResult<Option<Value>> {
        let url = self.url(&format!("/collections/{name}"));
        match self.authed(self.agent.get(&url)).timeout(ADMIN_TIMEOUT).call() {
            Ok(response) => {
                let body: Value = response
                    .into_json()
                    .map_err(|e| StoreError::BadRequest {
                        message: format!("collection info: {e}"),
                    })?;
                Ok(Some(body["result"].clone()))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(err) => Err(self.classify("collection_info", name, err)),
        }
    }
}

/// Convert the adapter filter into Qdrant's filter JSON.
fn filter_json(filter: &Filter) -> Value {
    let must: Vec<Value> = filter
        .must
        .iter()
        .map(|condition| match condition {
            Condition::MatchStr(field, value) => {
                json!({ "key": field, "match": { "value": value } })
            }
            Condition::MatchInt(field, value) => {
                json!({ "key": field, "match": { "value": value } })
            }
            Condition::Range { field, gte, lte } => {
                let mut range = Map::new();
                if let Some(gte) = gte {
                    range.insert("gte".into(), json!(gte));
                }
                if let Some(lte) = lte {
                    range.insert("lte".into(), json!(lte));
                }
                json!({ "key": field, "range": range })
            }
        })
        .collect();
    json!({ "must": must })
}

fn point_json(point: &PointRecord) -> Value {
    json!({
        "id": point.id.to_string(),
        "vector": point.vector,
        "payload": point.payload,
    })
}

fn parse_id(value: &Value) -> Option<Uuid> {
    value.as_str().and_then(|s| Uuid::parse_str(s).ok())
}

fn parse_payload(value: &Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

impl VectorStore for QdrantStore {
    fn ensure_collection(&self, name: &str, dimension: usize) -> StoreResult<()> {
        if let Some(info) = self.get_collection_info(name)? {
            let stored = info["config"]["params"]["vectors"]["size"]
                .as_u64()
                .unwrap_or(0) as usize;
            if stored != dimension {
                return Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    stored,
                    requested: dimension,
                });
            }
            return Ok(());
        }

        let url = self.url(&format!("/collections/{name}"));
        let body = json!({
            "vectors": { "size": dimension, "distance": "Cosine" },
            "on_disk_payload": true,
        });
        self.with_retry("ensure_collection", name, || {
            self.authed(self.agent.put(&url))
                .timeout(ADMIN_TIMEOUT)
                .send_json(body.clone())
        })?;
        tracing::info!(collection = name, dimension, "created collection");
        Ok(())
    }

    fn ensure_payload_indexes(
        &self,
        name: &str,
        fields: &[(&str, FieldIndexKind)],
    ) -> StoreResult<()> {
        let url = self.url(&format!("/collections/{name}/index?wait=true"));
        for (field, kind) in fields {
            let schema = match kind {
                FieldIndexKind::Keyword => "keyword",
                FieldIndexKind::Integer => "integer",
            };
            let body = json!({ "field_name": field, "field_schema": schema });
            let result = self.with_retry("ensure_payload_indexes", name, || {
                self.authed(self.agent.put(&url))
                    .timeout(ADMIN_TIMEOUT)
                    .send_json(body.clone())
            });
            match result {
                Ok(_) => {}
                // Re-declaring an existing index is a no-op, not a failure.
                Err(StoreError::BadRequest { message }) if message.contains("exists") => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn upsert(&self, name: &str, points: &[PointRecord]) -> StoreResult<()> {
        let url = self.url(&format!("/collections/{name}/points?wait=true"));
        for batch in points.chunks(UPSERT_BATCH) {
            let body = json!({ "points": batch.iter().map(point_json).collect::<Vec<_>>() });
            self.with_retry("upsert", name, || {
                self.authed(self.agent.put(&url))
                    .timeout(UPSERT_TIMEOUT)
                    .send_json(body.clone())
            })?;
        }
        Ok(())
    }

    fn delete_by_filter(&self, name: &str, filter: &Filter) -> StoreResult<()> {
        let url = self.url(&format!("/collections/{name}/points/delete?wait=true"));
        let body = json!({ "filter": filter_json(filter) });
        self.with_retry("delete_by_filter", name, || {
            self.authed(self.agent.post(&url))
                .timeout(UPSERT_TIMEOUT)
                .send_json(body.clone())
        })?;
        Ok(())
    }

    fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
    ) -> StoreResult<Vec<ScoredPoint>> {
        let url = self.url(&format!("/collections/{name}/points/search"));
        let body = json!({
            "vector": vector,
            "filter": filter_json(filter),
            "limit": limit,
            "with_payload": true,
        });
        let response: Value = self
            .with_retry("search", name, || {
                self.authed(self.agent.post(&url))
                    .timeout(SEARCH_TIMEOUT)
                    .send_json(body.clone())
            })?
            .into_json()
            .map_err(|e| StoreError::BadRequest {
                message: format!("search response: {e}"),
            })?;

        let hits = response["result"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|hit| {
                Some(ScoredPoint {
                    id: parse_id(&hit["id"])?,
                    score: hit["score"].as_f64()? as f32,
                    payload: parse_payload(&hit["payload"]),
                })
            })
            .collect();
        Ok(hits)
    }

    fn retrieve(&self, name: &str, ids: &[Uuid]) -> StoreResult<Vec<PointRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.url(&format!("/collections/{name}/points"));
        let body = json!({
            "ids": ids.iter().map(Uuid::to_string).collect::<Vec<_>>(),
            "with_payload": true,
            "with_vector": false,
        });
        let response: Value = self
            .with_retry("retrieve", name, || {
                self.authed(self.agent.post(&url))
                    .timeout(RETRIEVE_TIMEOUT)
                    .send_json(body.clone())
            })?
            .into_json()
            .map_err(|e| StoreError::BadRequest {
                message: format!("retrieve response: {e}"),
            })?;

        let mut by_id: std::collections::HashMap<Uuid, PointRecord> = response["result"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|point| {
                let id = parse_id(&point["id"])?;
                Some((
                    id,
                    PointRecord {
                        id,
                        vector: Vec::new(),
                        payload: parse_payload(&point["payload"]),
                    },
                ))
            })
            .collect();

        // Preserve request order; drop ids the store no longer has.
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    fn scroll(&self, name: &str, filter: &Filter, limit: usize) -> StoreResult<Vec<PointRecord>> {
        let url = self.url(&format!("/collections/{name}/points/scroll"));
        let body = json!({
            "filter": filter_json(filter),
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        let response: Value = self
            .with_retry("scroll", name, || {
                self.authed(self.agent.post(&url))
                    .timeout(SEARCH_TIMEOUT)
                    .send_json(body.clone())
            })?
            .into_json()
            .map_err(|e| StoreError::BadRequest {
                message: format!("scroll response: {e}"),
            })?;

        let points = response["result"]["points"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|point| {
                Some(PointRecord {
                    id: parse_id(&point["id"])?,
                    vector: Vec::new(),
                    payload: parse_payload(&point["payload"]),
                })
            })
            .collect();
        Ok(points)
    }

    fn collection_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.get_collection_info(name)?.is_some())
    }

    fn stats(&self, name: &str) -> StoreResult<CollectionStats> {
        let info = self
            .get_collection_info(name)?
            .ok_or_else(|| StoreError::NotFound {
                collection: name.to_string(),
            })?;
        Ok(CollectionStats {
            points: info["points_count"].as_u64().unwrap_or(0),
            dimension: info["config"]["params"]["vectors"]["size"]
                .as_u64()
                .unwrap_or(0) as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_json_shapes_match_qdrant() {
        let filter = Filter::new()
            .match_str("chunk_level", "child")
            .match_int("sequence_index", 3)
            .range("sequence_index", Some(1), None);
        let value = filter_json(&filter);
        let must = value["must"].as_array().unwrap();
        assert_eq!(must.len(), 3);
        assert_eq!(must[0]["key"], "chunk_level");
        assert_eq!(must[0]["match"]["value"], "child");
        assert_eq!(must[1]["match"]["value"], 3);
        assert_eq!(must[2]["range"]["gte"], 1);
        assert!(must[2]["range"].get("lte").is_none());
    }

    #[test]
    fn point_json_stringifies_uuid() {
        let id = Uuid::new_v4();
        let point = PointRecord {
            id,
            vector: vec![0.5, 0.5],
            payload: Map::new(),
        };
        let value = point_json(&point);
        assert_eq!(value["id"], id.to_string());
        assert_eq!(value["vector"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn parse_id_rejects_non_uuid() {
        assert!(parse_id(&json!("not-a-uuid")).is_none());
        assert!(parse_id(&json!(42)).is_none());
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&json!(id.to_string())), Some(id));
    }
}
