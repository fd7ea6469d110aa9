//! Durable local persistence.
//!
//! The local store is the single source of truth for offline state. All
//! other components read and mutate offline records and queue entries
//! through its transactional API only.

pub mod local;

pub use local::{LocalStore, StoreError, StoreStats};
