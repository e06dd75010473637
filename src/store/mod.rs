// ============================================================================
// Store Interface
// ============================================================================
//
// The remote attribute store offers per-item conditional writes, batch writes
// without conditions, deletes, and a paged declarative select. Reads default to
// an eventually-consistent mode; a strong read can be requested per call.
//
// ============================================================================

pub mod memory;
pub mod query;

pub use memory::{FailureRule, MemoryStore, MemoryStoreStats, StoreOp};
pub use query::{
    MAX_SELECT_LIMIT, OrderBy, Predicate, SelectItem, SelectPage, SelectQuery, SortOrder,
};

use crate::core::{Attributes, DbError, ItemKey, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Most items one batch put or batch delete may carry.
pub const MAX_BATCH_ITEMS: usize = 25;

/// CAS predicate attached to a conditional put.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "expect", rename_all = "snake_case")]
pub enum Condition {
    /// The attribute must be absent (first insert).
    NotExists { name: String },
    /// The attribute must currently hold exactly `value`.
    Equals { name: String, value: String },
}

impl Condition {
    pub fn attribute(&self) -> &str {
        match self {
            Self::NotExists { name } | Self::Equals { name, .. } => name,
        }
    }

    /// Evaluates the predicate against the item's current attributes.
    pub fn holds(&self, current: Option<&Attributes>) -> bool {
        match self {
            Self::NotExists { name } => current.map_or(true, |attrs| !attrs.contains_key(name)),
            Self::Equals { name, value } => current
                .and_then(|attrs| attrs.get(name))
                .is_some_and(|actual| actual == value),
        }
    }
}

/// Replaces one item's attributes, optionally guarded by a condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PutRequest {
    pub domain: String,
    pub item_name: String,
    pub attributes: Attributes,
    #[serde(default)]
    pub condition: Option<Condition>,
}

/// One item inside a batch put.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchItem {
    pub item_name: String,
    pub attributes: Attributes,
}

/// Unconditional put of several items in one domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchPutRequest {
    pub domain: String,
    pub items: Vec<BatchItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteRequest {
    pub domain: String,
    pub item_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchDeleteRequest {
    pub domain: String,
    pub item_names: Vec<String>,
}

/// A store mutation in replayable form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreRequest {
    Put(PutRequest),
    BatchPut(BatchPutRequest),
    Delete(DeleteRequest),
    BatchDelete(BatchDeleteRequest),
}

impl StoreRequest {
    pub fn domain(&self) -> &str {
        match self {
            Self::Put(request) => &request.domain,
            Self::BatchPut(request) => &request.domain,
            Self::Delete(request) => &request.domain,
            Self::BatchDelete(request) => &request.domain,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Put(_) => "put",
            Self::BatchPut(_) => "batch_put",
            Self::Delete(_) => "delete",
            Self::BatchDelete(_) => "batch_delete",
        }
    }

    /// Every item this request mutates.
    pub fn touched_keys(&self) -> Vec<ItemKey> {
        match self {
            Self::Put(request) => vec![ItemKey::new(&request.domain, &request.item_name)],
            Self::BatchPut(request) => request
                .items
                .iter()
                .map(|item| ItemKey::new(&request.domain, &item.item_name))
                .collect(),
            Self::Delete(request) => vec![ItemKey::new(&request.domain, &request.item_name)],
            Self::BatchDelete(request) => request
                .item_names
                .iter()
                .map(|item_name| ItemKey::new(&request.domain, item_name))
                .collect(),
        }
    }

    /// Rejects requests with empty names before they reach the store or the log.
    pub fn validate(&self) -> Result<()> {
        if self.domain().trim().is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "{} request has an empty domain",
                self.kind_name()
            )));
        }

        let keys = self.touched_keys();
        if keys.is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "{} request touches no items",
                self.kind_name()
            )));
        }
        if keys.len() > MAX_BATCH_ITEMS {
            return Err(DbError::InvalidArgument(format!(
                "{} request touches {} items, at most {} allowed",
                self.kind_name(),
                keys.len(),
                MAX_BATCH_ITEMS
            )));
        }
        if keys.iter().any(|key| key.item_name.trim().is_empty()) {
            return Err(DbError::InvalidArgument(format!(
                "{} request has an empty item name",
                self.kind_name()
            )));
        }
        Ok(())
    }
}

/// The remote attribute store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Replaces the item's attributes. Fails with `VersionConflict` when the
    /// request carries a condition that does not hold.
    async fn put(&self, request: PutRequest) -> Result<()>;

    async fn batch_put(&self, request: BatchPutRequest) -> Result<()>;

    /// Removes the item. Deleting an absent item succeeds.
    async fn delete(&self, request: DeleteRequest) -> Result<()>;

    async fn batch_delete(&self, request: BatchDeleteRequest) -> Result<()>;

    async fn get(
        &self,
        domain: &str,
        item_name: &str,
        consistent: bool,
    ) -> Result<Option<Attributes>>;

    async fn select(&self, query: &SelectQuery, consistent: bool) -> Result<SelectPage>;
}

/// Sends a decoded request to the matching store operation.
pub async fn apply_request(store: &dyn Store, request: StoreRequest) -> Result<()> {
    match request {
        StoreRequest::Put(request) => store.put(request).await,
        StoreRequest::BatchPut(request) => store.batch_put(request).await,
        StoreRequest::Delete(request) => store.delete(request).await,
        StoreRequest::BatchDelete(request) => store.batch_delete(request).await,
    }
}
