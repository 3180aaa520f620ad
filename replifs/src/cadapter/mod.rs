//! Block storage adapters (cAdapter)
//!
//! Submodules:
//! - `wire`: fixed-width framing spoken by block worker nodes
//! - `localfs`: one-file-per-block directory store used by workers and replicas
//! - `client`: TCP client for a single worker node
//! - `replica`: dual-replica backend over a pool of worker nodes
//! - `consensus`: backend that routes every request through a replicated log
//! - `etcd`: backend storing blocks as keys in an etcd cluster
//!
//! Every realization honors the same three-call contract, so the namespace
//! core only ever sees a [`BlockBackend`].
pub mod client;
pub mod consensus;
pub mod etcd;
pub mod localfs;
pub mod replica;
pub mod wire;

use crate::error::BackendError;
use crate::meta::block::BlockId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Durable storage of block-sized byte chunks keyed by block id.
#[async_trait]
pub trait BlockBackend: Send + Sync {
    async fn store(&self, id: BlockId, data: &[u8]) -> Result<(), BackendError>;

    async fn fetch(&self, id: BlockId) -> Result<Vec<u8>, BackendError>;

    /// Frees the block. Purging an unknown block is not an error.
    async fn purge(&self, id: BlockId) -> Result<(), BackendError>;
}

#[async_trait]
impl<T: BlockBackend + ?Sized> BlockBackend for Arc<T> {
    async fn store(&self, id: BlockId, data: &[u8]) -> Result<(), BackendError> {
        (**self).store(id, data).await
    }

    async fn fetch(&self, id: BlockId) -> Result<Vec<u8>, BackendError> {
        (**self).fetch(id).await
    }

    async fn purge(&self, id: BlockId) -> Result<(), BackendError> {
        (**self).purge(id).await
    }
}

/// Backend chosen at runtime from configuration.
pub type DynBackend = Arc<dyn BlockBackend>;

/// Simple in-memory implementation for local development and tests.
///
/// Store and fetch failures can be injected to exercise rollback paths.
pub struct InMemoryBlockStore {
    map: Mutex<HashMap<BlockId, Vec<u8>>>,
    // Remaining successful stores before injected failures; negative disables.
    stores_left: AtomicI64,
    fail_fetch: AtomicBool,
}

impl Default for InMemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            stores_left: AtomicI64::new(-1),
            fail_fetch: AtomicBool::new(false),
        }
    }

    /// Lets `n` more stores succeed, then fails every later store.
    pub fn fail_stores_after(&self, n: usize) {
        self.stores_left.store(n as i64, Ordering::SeqCst);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    fn take_store_permit(&self) -> bool {
        self.stores_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                l if l < 0 => Some(l),
                0 => None,
                l => Some(l - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl BlockBackend for InMemoryBlockStore {
    async fn store(&self, id: BlockId, data: &[u8]) -> Result<(), BackendError> {
        if !self.take_store_permit() {
            return Err(BackendError::Unavailable {
                block: id,
                reason: "injected store failure".into(),
            });
        }
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, data.to_vec());
        Ok(())
    }

    async fn fetch(&self, id: BlockId) -> Result<Vec<u8>, BackendError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable {
                block: id,
                reason: "injected fetch failure".into(),
            });
        }
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(BackendError::Missing(id))
    }

    async fn purge(&self, id: BlockId) -> Result<(), BackendError> {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_fetch_purge() {
        let store = InMemoryBlockStore::new();
        store.store(42, b"hello").await.unwrap();
        assert_eq!(store.fetch(42).await.unwrap(), b"hello");
        store.purge(42).await.unwrap();
        assert!(matches!(store.fetch(42).await, Err(BackendError::Missing(42))));
        // purging twice is fine
        store.purge(42).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = InMemoryBlockStore::new();
        store.fail_stores_after(1);
        store.store(1, b"a").await.unwrap();
        assert!(store.store(2, b"b").await.is_err());

        store.set_fail_fetch(true);
        assert!(store.fetch(1).await.is_err());
        store.set_fail_fetch(false);
        assert_eq!(store.fetch(1).await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_dyn_backend_forwards() {
        let backend: DynBackend = Arc::new(InMemoryBlockStore::new());
        backend.store(9, b"xyz").await.unwrap();
        assert_eq!(backend.fetch(9).await.unwrap(), b"xyz");
    }
}
