//! Block backend on an etcd (or Xline) cluster.
//!
//! Each block is one key, `<prefix><id>`, holding the raw bytes. The cluster
//! runs Raft across its members, so a put is acknowledged only after a
//! majority has committed it and a get is a linearizable read.

use crate::cadapter::BlockBackend;
use crate::error::BackendError;
use crate::meta::block::BlockId;
use async_trait::async_trait;
use etcd_client::{Client, PutOptions};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const DEFAULT_PREFIX: &str = "/blocks/";

#[derive(Clone)]
pub struct EtcdBlockStore {
    client: Arc<RwLock<Client>>,
    prefix: String,
}

impl EtcdBlockStore {
    pub async fn connect(endpoints: &[String], prefix: &str) -> Result<Self, BackendError> {
        if endpoints.is_empty() {
            return Err(BackendError::Config(
                "consensus backend needs at least one etcd endpoint".into(),
            ));
        }
        let client = Client::connect(endpoints, None).await?;
        tracing::info!("connected to etcd at {}", endpoints.join(","));
        Ok(Self {
            client: Arc::new(RwLock::new(client)),
            prefix: prefix.to_string(),
        })
    }

    pub fn key(&self, id: BlockId) -> String {
        block_key(&self.prefix, id)
    }
}

fn block_key(prefix: &str, id: BlockId) -> String {
    format!("{prefix}{id}")
}

#[async_trait]
impl BlockBackend for EtcdBlockStore {
    async fn store(&self, id: BlockId, data: &[u8]) -> Result<(), BackendError> {
        let mut client = self.client.write().await;
        client.put(self.key(id), data, Some(PutOptions::new())).await?;
        Ok(())
    }

    async fn fetch(&self, id: BlockId) -> Result<Vec<u8>, BackendError> {
        let mut client = self.client.write().await;
        let resp = client.get(self.key(id), None).await?;
        resp.kvs()
            .first()
            .map(|kv| kv.value().to_vec())
            .ok_or(BackendError::Missing(id))
    }

    async fn purge(&self, id: BlockId) -> Result<(), BackendError> {
        let mut client = self.client.write().await;
        client.delete(self.key(id), None).await?;
        Ok(())
    }
}
