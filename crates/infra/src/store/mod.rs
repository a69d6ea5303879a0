//! Store adapters implementing the `hive-auth` storage ports.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use hive_auth::{RbacStore, StoreError};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// A connected store owned by one process.
#[async_trait]
pub trait StoreConnection: RbacStore {
    /// Short backend name for logs (`"memory"`, `"postgres"`).
    fn backend(&self) -> &'static str;

    /// Disconnect. Later calls through this handle fail with
    /// [`StoreError::Unavailable`].
    async fn close(&self) -> Result<(), StoreError>;
}

/// Connect to the store named by `url` (`memory://` or `postgres://…`).
pub async fn connect(url: &str) -> Result<Arc<dyn StoreConnection>, StoreError> {
    if url.starts_with("memory:") {
        return Ok(Arc::new(InMemoryStore::new()));
    }
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PostgresStore::connect(url).await?;
        return Ok(Arc::new(store));
    }
    Err(StoreError::Unavailable(format!("unsupported store url '{url}'")))
}
