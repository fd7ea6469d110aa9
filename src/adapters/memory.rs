//! In-memory remote store.
//!
//! Backs tests and offline development. Tracks write-call counts and can
//! inject failures for a configurable number of calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{same_identity, RemoteError, RemoteStore};

/// HashMap-backed `RemoteStore` implementation.
#[derive(Default)]
pub struct MemoryRemoteStore {
    docs: Mutex<HashMap<(String, String), Value>>,
    next_id: AtomicU32,
    write_calls: AtomicUsize,
    failures_left: AtomicU32,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored document (test inspection)
    pub async fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.docs
            .lock()
            .await
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of documents in a collection
    pub async fn len(&self, collection: &str) -> usize {
        self.docs
            .lock()
            .await
            .keys()
            .filter(|(c, _)| c == collection)
            .count()
    }

    /// Total write calls observed (create/set/update/append)
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` write calls fail with a network error
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    fn record_call(&self) -> Result<(), RemoteError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(RemoteError::Network("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create(&self, collection: &str, doc: Value) -> Result<String, RemoteError> {
        self.record_call()?;
        let id = format!("remote-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.docs
            .lock()
            .await
            .insert((collection.to_string(), id.clone()), doc);
        Ok(id)
    }

    async fn set_merge(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), RemoteError> {
        self.record_call()?;
        let mut docs = self.docs.lock().await;
        let key = (collection.to_string(), id.to_string());
        let doc = docs.entry(key).or_insert_with(|| Value::Object(Default::default()));
        if let (Value::Object(base), Value::Object(incoming)) = (doc, fields) {
            for (k, v) in incoming {
                base.insert(k, v);
            }
        }
        Ok(())
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), RemoteError> {
        self.record_call()?;
        let mut docs = self.docs.lock().await;
        let key = (collection.to_string(), id.to_string());
        match docs.get_mut(&key) {
            Some(Value::Object(base)) => {
                if let Value::Object(incoming) = fields {
                    for (k, v) in incoming {
                        base.insert(k, v);
                    }
                }
                Ok(())
            }
            _ => Err(RemoteError::Network(format!(
                "no such document: {}/{}",
                collection, id
            ))),
        }
    }

    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        item: Value,
    ) -> Result<(), RemoteError> {
        self.record_call()?;
        let mut docs = self.docs.lock().await;
        let key = (collection.to_string(), id.to_string());
        let doc = docs.entry(key).or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(base) = doc {
            let array = base
                .entry(field.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = array {
                if !items.iter().any(|existing| same_identity(existing, &item)) {
                    items.push(item);
                }
            }
        }
        Ok(())
    }
}
