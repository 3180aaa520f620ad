//! Dual-replica block backend.
//!
//! Each block is written to two distinct nodes drawn uniformly at random from
//! the configured pool when the block is first stored. Reads try the first
//! node and fall back to the second. There is no quorum read and no repair of
//! replicas that diverged after a partial write.

use crate::cadapter::BlockBackend;
use crate::cadapter::client::NodeClient;
use crate::config::parse_hosts;
use crate::error::BackendError;
use crate::meta::block::BlockId;
use async_trait::async_trait;
use rand::seq::index::sample;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

pub struct DualReplicaBackend {
    nodes: Vec<NodeClient>,
    // block id -> indices into `nodes`, in read-preference order
    placements: Mutex<HashMap<BlockId, [usize; 2]>>,
}

impl DualReplicaBackend {
    pub fn new<I, S>(hosts: I) -> Result<Self, BackendError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes: Vec<NodeClient> = hosts.into_iter().map(NodeClient::new).collect();
        if nodes.len() < 2 {
            return Err(BackendError::Config(format!(
                "dual-replica backend needs at least two nodes, got {}",
                nodes.len()
            )));
        }
        Ok(Self {
            nodes,
            placements: Mutex::new(HashMap::new()),
        })
    }

    /// Parses a comma separated `host:port` list.
    pub fn from_host_list(hosts: &str) -> Result<Self, BackendError> {
        Self::new(parse_hosts(hosts))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(NodeClient::addr)
    }

    /// Addresses of the two nodes holding `id`, primary first.
    pub fn placement(&self, id: BlockId) -> Option<(String, String)> {
        self.lookup(id).map(|[a, b]| {
            (
                self.nodes[a].addr().to_string(),
                self.nodes[b].addr().to_string(),
            )
        })
    }

    fn lookup(&self, id: BlockId) -> Option<[usize; 2]> {
        self.placements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
    }

    fn choose_pair(&self) -> [usize; 2] {
        let picked = sample(&mut rand::rng(), self.nodes.len(), 2);
        [picked.index(0), picked.index(1)]
    }
}

#[async_trait]
impl BlockBackend for DualReplicaBackend {
    async fn store(&self, id: BlockId, data: &[u8]) -> Result<(), BackendError> {
        let pair = self.lookup(id).unwrap_or_else(|| self.choose_pair());
        let [first, second] = pair.map(|i| &self.nodes[i]);

        tracing::debug!("storing block {id} on {} and {}", first.addr(), second.addr());
        // A failure on either node fails the call; the other write is not undone.
        tokio::try_join!(first.store(id, data), second.store(id, data))?;

        self.placements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, pair);
        Ok(())
    }

    async fn fetch(&self, id: BlockId) -> Result<Vec<u8>, BackendError> {
        let [first, second] = self.lookup(id).ok_or(BackendError::Missing(id))?;
        let (first, second) = (&self.nodes[first], &self.nodes[second]);

        match first.fetch(id).await {
            Ok(data) => Ok(data),
            Err(primary_err) => {
                tracing::warn!(
                    "fetch of block {id} from {} failed ({primary_err}), trying {}",
                    first.addr(),
                    second.addr()
                );
                second
                    .fetch(id)
                    .await
                    .map_err(|secondary_err| BackendError::Unavailable {
                        block: id,
                        reason: format!(
                            "{}: {primary_err}; {}: {secondary_err}",
                            first.addr(),
                            second.addr()
                        ),
                    })
            }
        }
    }

    async fn purge(&self, id: BlockId) -> Result<(), BackendError> {
        let removed = self
            .placements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let Some(pair) = removed else {
            return Ok(());
        };
        let [first, second] = pair.map(|i| &self.nodes[i]);
        let (a, b) = tokio::join!(first.purge(id), second.purge(id));
        match (a, b) {
            (Err(e), Err(_)) => Err(e),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                tracing::warn!("block {id} purged from only one replica: {e}");
                Ok(())
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}
