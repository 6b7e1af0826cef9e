//! Request-scoped resource store and its companion stores (§4.4).
//!
//! All four schemes (`resource://`, `session://`, `memory://`, `agent://`) are
//! "structurally identical ... and may share a single underlying table
//! implementation" (§4.4) — grounded on the teacher's `InMemoryStore`
//! (`Arc<RwLock<HashMap<String, _>>>` keyed by joined namespace segments).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::resource::{ResourceKind, ResultRecord};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("store access failed: {0}")]
    AccessFailed(String),
}

/// Generic tag-scoped map with get/set/delete/clear and prefix-list, shared by every
/// scheme. Keys are segments joined by NUL, enabling prefix scans (list-by-kind,
/// clear-kind-partition, clear-all-for-request).
#[derive(Clone)]
pub struct Table<V: Clone + Send + Sync> {
    inner: Arc<RwLock<HashMap<String, V>>>,
}

impl<V: Clone + Send + Sync> Table<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn key(segments: &[&str]) -> String {
        segments.join("\0")
    }

    pub async fn set(&self, segments: &[&str], value: V) {
        self.inner.write().await.insert(Self::key(segments), value);
    }

    pub async fn get(&self, segments: &[&str]) -> Option<V> {
        self.inner.read().await.get(&Self::key(segments)).cloned()
    }

    pub async fn delete(&self, segments: &[&str]) -> bool {
        self.inner.write().await.remove(&Self::key(segments)).is_some()
    }

    pub async fn list_prefix(&self, prefix: &[&str]) -> Vec<(String, V)> {
        let p = Self::key(prefix);
        let guard = self.inner.read().await;
        guard
            .iter()
            .filter(|(k, _)| p.is_empty() || k.starts_with(&p))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn clear_prefix(&self, prefix: &[&str]) {
        let p = Self::key(prefix);
        let mut guard = self.inner.write().await;
        guard.retain(|k, _| !(p.is_empty() || k.starts_with(&p)));
    }

    pub async fn clear_all(&self) {
        self.inner.write().await.clear();
    }
}

impl<V: Clone + Send + Sync> Default for Table<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// The request-scoped resource store: `(requestID, kind, actionID) -> ResultRecord` (§3, §4.4).
#[derive(Clone, Default)]
pub struct ResourceStore {
    table: Table<ResultRecord>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self {
            table: Table::new(),
        }
    }

    pub async fn commit(
        &self,
        request_id: &str,
        kind: ResourceKind,
        action_id: &str,
        record: ResultRecord,
    ) {
        self.table
            .set(&[request_id, kind.as_str(), action_id], record)
            .await;
    }

    pub async fn get(
        &self,
        request_id: &str,
        kind: ResourceKind,
        action_id: &str,
    ) -> Option<ResultRecord> {
        self.table.get(&[request_id, kind.as_str(), action_id]).await
    }

    pub async fn list_by_kind(&self, request_id: &str, kind: ResourceKind) -> Vec<ResultRecord> {
        self.table
            .list_prefix(&[request_id, kind.as_str()])
            .await
            .into_iter()
            .map(|(_, v)| v)
            .collect()
    }

    pub async fn delete(&self, request_id: &str, kind: ResourceKind, action_id: &str) -> bool {
        self.table.delete(&[request_id, kind.as_str(), action_id]).await
    }

    pub async fn clear_kind_partition(&self, request_id: &str, kind: ResourceKind) {
        self.table.clear_prefix(&[request_id, kind.as_str()]).await;
    }

    /// Drops every record for `request_id` (request-scope teardown, §4.7).
    pub async fn clear_request(&self, request_id: &str) {
        self.table.clear_prefix(&[request_id]).await;
    }
}

/// A key/value companion store sharing the `session://`/`memory://` contract: same
/// shape, different scope (process-lifetime vs. single-agent-run), §4.4.
#[derive(Clone, Default)]
pub struct KeyValueStore {
    table: Table<Value>,
}

impl KeyValueStore {
    pub fn new() -> Self {
        Self {
            table: Table::new(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.table.get(&[key]).await
    }

    pub async fn set(&self, key: &str, value: Value) {
        self.table.set(&[key], value).await;
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.table.delete(&[key]).await
    }

    pub async fn list(&self) -> Vec<(String, Value)> {
        self.table.list_prefix(&[]).await
    }

    pub async fn clear(&self) {
        self.table.clear_all().await;
    }
}

pub type SessionStore = KeyValueStore;
pub type MemoryStore = KeyValueStore;

/// A parsed `op` from the store's opaque URI surface (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Set,
    Delete,
    List,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreScheme {
    Resource,
    Session,
    Memory,
    Agent,
}

/// A parsed `resource:///<kind>/<actionID>[?op=...]`-shaped URI (§4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUri {
    pub scheme: StoreScheme,
    pub kind: Option<String>,
    pub action_id: String,
    pub op: StoreOp,
    pub value: Option<String>,
}

/// Parses one of the four store URI schemes. Default op is `get`; `list`/`clear`
/// require `actionID = "_"`. Any other shape is `InvalidRequest`.
pub fn parse_store_uri(uri: &str) -> Result<StoreUri, StoreError> {
    let (scheme_part, rest) = uri
        .split_once("://")
        .ok_or_else(|| StoreError::InvalidRequest(uri.to_string()))?;
    let scheme = match scheme_part {
        "resource" => StoreScheme::Resource,
        "session" => StoreScheme::Session,
        "memory" => StoreScheme::Memory,
        "agent" => StoreScheme::Agent,
        other => return Err(StoreError::InvalidRequest(format!("unknown scheme: {other}"))),
    };

    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    let segments: Vec<&str> = path_part.split('/').filter(|s| !s.is_empty()).collect();

    let mut op = StoreOp::Get;
    let mut value = None;
    if let Some(q) = query_part {
        for pair in q.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| StoreError::InvalidRequest(uri.to_string()))?;
            match k {
                "op" => {
                    op = match v {
                        "get" => StoreOp::Get,
                        "set" => StoreOp::Set,
                        "delete" => StoreOp::Delete,
                        "list" => StoreOp::List,
                        "clear" => StoreOp::Clear,
                        _ => return Err(StoreError::InvalidRequest(uri.to_string())),
                    }
                }
                "value" => value = Some(v.to_string()),
                _ => {}
            }
        }
    }

    let (kind, action_id) = match scheme {
        StoreScheme::Resource => {
            if segments.len() != 2 {
                return Err(StoreError::InvalidRequest(uri.to_string()));
            }
            (Some(segments[0].to_string()), segments[1].to_string())
        }
        _ => {
            if segments.len() != 1 {
                return Err(StoreError::InvalidRequest(uri.to_string()));
            }
            (None, segments[0].to_string())
        }
    };

    if matches!(op, StoreOp::List | StoreOp::Clear) && action_id != "_" {
        return Err(StoreError::InvalidRequest(uri.to_string()));
    }

    Ok(StoreUri {
        scheme,
        kind,
        action_id,
        op,
        value,
    })
}
