//! Remote document store adapters.
//!
//! The core talks to the remote store through `RemoteStore`: a key-value
//! document API with create, merge-set, field update, and a deduplicating
//! array append. Any adapter failure means "go offline for this write":
//! the caller falls back to the durable local store.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryRemoteStore;
pub use rest::RestRemoteStore;

/// Errors from the remote store.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("permission denied: {0}")]
    Permission(String),
}

/// Contract the sync engine requires from a remote document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a document, returning the generated id
    async fn create(&self, collection: &str, doc: Value) -> Result<String, RemoteError>;

    /// Upsert fields into a document (full-document merge keyed by id)
    async fn set_merge(&self, collection: &str, id: &str, fields: Value)
        -> Result<(), RemoteError>;

    /// Update fields of an existing document
    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), RemoteError>;

    /// Append an item to an array field.
    ///
    /// Implementations MUST deduplicate by item identity (the item's `id`
    /// field when present, whole-value equality otherwise) so replaying an
    /// already-present chunk never duplicates it.
    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        item: Value,
    ) -> Result<(), RemoteError>;
}

/// Whether two array items denote the same entity.
/// Shared by adapter implementations honoring the dedup contract.
pub(crate) fn same_identity(a: &Value, b: &Value) -> bool {
    match (a.get("id"), b.get("id")) {
        (Some(ia), Some(ib)) => ia == ib,
        _ => a == b,
    }
}
