//! Consensus-replicated block backend.
//!
//! Every `store`, `fetch` and `purge` is encoded with the block wire codec and
//! submitted to a [`ReplicatedLog`]. The call returns only after the entry has
//! been committed and applied by the deterministic [`BlockStateMachine`], so
//! block operations are linearizable at the cost of one agreement round.

use crate::cadapter::BlockBackend;
use crate::cadapter::localfs::LocalFsBackend;
use crate::cadapter::wire::{self, Request};
use crate::error::BackendError;
use crate::meta::block::BlockId;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Seam to a consensus implementation.
#[async_trait]
pub trait ReplicatedLog: Send + Sync {
    /// Appends `entry`, waits until it is committed and applied, and returns
    /// the state machine's reply for it.
    async fn submit(&self, entry: Bytes) -> Result<Bytes, BackendError>;

    /// Answers a read-only request once every committed entry has been
    /// applied. The request itself is not appended to the log.
    async fn query(&self, entry: Bytes) -> Result<Bytes, BackendError>;
}

/// Applies block commands to one replica's local storage directory.
pub struct BlockStateMachine {
    store: LocalFsBackend,
}

impl BlockStateMachine {
    pub fn new(store: LocalFsBackend) -> Self {
        Self { store }
    }

    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self, BackendError> {
        Ok(Self::new(LocalFsBackend::open(dir).await?))
    }

    pub fn store(&self) -> &LocalFsBackend {
        &self.store
    }

    /// Executes one request and encodes the reply. Storage failures become
    /// `ERROR` replies rather than errors, so every replica applies every
    /// entry.
    pub async fn apply(&self, req: Request) -> Bytes {
        match req {
            Request::Store { id, data } => match self.store.store(id, &data).await {
                Ok(()) => wire::encode_status(true),
                Err(e) => {
                    tracing::error!("failed to store block {id}: {e}");
                    wire::encode_status(false)
                }
            },
            Request::Fetch { id } => match self.store.get(id).await {
                Ok(data) => wire::encode_payload(data.as_deref()),
                Err(e) => {
                    tracing::error!("failed to read block {id}: {e}");
                    wire::encode_payload(None)
                }
            },
            Request::Purge { id } => match self.store.purge(id).await {
                Ok(()) => wire::encode_status(true),
                Err(e) => {
                    tracing::error!("failed to purge block {id}: {e}");
                    wire::encode_status(false)
                }
            },
        }
    }

    /// Decodes a raw log entry and applies it.
    pub async fn apply_entry(&self, mut entry: &[u8]) -> Bytes {
        match Request::read_from(&mut entry).await {
            Ok(Some(req)) => self.apply(req).await,
            Ok(None) => wire::encode_status(false),
            Err(e) => {
                tracing::error!("skipping malformed log entry: {e}");
                wire::encode_status(false)
            }
        }
    }
}

struct Replica {
    machine: BlockStateMachine,
    online: AtomicBool,
    // Absolute index of the next log entry to apply.
    applied: AtomicUsize,
}

impl Replica {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    /// Applies every retained entry this replica has not seen yet and returns
    /// the reply for the last one.
    async fn catch_up(&self, log: &Log) -> Bytes {
        let mut reply = wire::encode_status(false);
        for entry in log.since(self.applied()) {
            reply = self.machine.apply_entry(entry).await;
        }
        self.applied.store(log.committed(), Ordering::SeqCst);
        reply
    }
}

/// Committed entries not yet applied by every replica. Entries below `base`
/// have been applied everywhere and dropped.
#[derive(Default)]
struct Log {
    base: usize,
    entries: Vec<Bytes>,
}

impl Log {
    fn committed(&self) -> usize {
        self.base + self.entries.len()
    }

    fn since(&self, applied: usize) -> &[Bytes] {
        let from = applied.saturating_sub(self.base).min(self.entries.len());
        &self.entries[from..]
    }

    /// Drops every entry below `floor`.
    fn compact(&mut self, floor: usize) {
        let n = floor.saturating_sub(self.base).min(self.entries.len());
        if n > 0 {
            self.entries.drain(..n);
            self.base += n;
        }
    }
}

/// In-process replicated log over a fixed replica set.
///
/// Entries are appended under a single lock, which fixes their total order.
/// Each submission is applied, in log order, on every online replica, and a
/// replica that was offline replays the entries it missed before applying the
/// new one. A submission is refused without touching the log when fewer than
/// a majority of replicas are online. Entries are kept only until every
/// replica has applied them.
///
/// All replicas live in this process, so the group models the protocol
/// rather than surviving host loss; deployments use
/// [`EtcdBlockStore`](crate::cadapter::etcd::EtcdBlockStore).
pub struct LocalReplicaGroup {
    replicas: Vec<Replica>,
    log: Mutex<Log>,
}

impl LocalReplicaGroup {
    pub async fn open<P: AsRef<Path>>(dirs: &[P]) -> Result<Self, BackendError> {
        if dirs.is_empty() {
            return Err(BackendError::Config(
                "consensus backend needs at least one replica".into(),
            ));
        }
        let mut replicas = Vec::with_capacity(dirs.len());
        for dir in dirs {
            replicas.push(Replica {
                machine: BlockStateMachine::open(dir).await?,
                online: AtomicBool::new(true),
                applied: AtomicUsize::new(0),
            });
        }
        tracing::info!("opened replica group with {} replicas", replicas.len());
        Ok(Self {
            replicas,
            log: Mutex::new(Log::default()),
        })
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn quorum(&self) -> usize {
        self.replicas.len() / 2 + 1
    }

    /// Marks a replica as reachable or not.
    pub fn set_online(&self, replica: usize, online: bool) {
        if let Some(r) = self.replicas.get(replica) {
            r.online.store(online, Ordering::SeqCst);
            tracing::info!("replica {replica} is now {}", if online { "online" } else { "offline" });
        }
    }

    pub fn applied_index(&self, replica: usize) -> Option<usize> {
        self.replicas.get(replica).map(Replica::applied)
    }

    pub fn machine(&self, replica: usize) -> Option<&BlockStateMachine> {
        self.replicas.get(replica).map(|r| &r.machine)
    }

    /// Number of entries still retained for lagging replicas.
    pub async fn log_len(&self) -> usize {
        self.log.lock().await.entries.len()
    }

    /// Number of entries ever committed.
    pub async fn committed_index(&self) -> usize {
        self.log.lock().await.committed()
    }

    fn online(&self) -> Result<Vec<&Replica>, BackendError> {
        let online: Vec<&Replica> = self.replicas.iter().filter(|r| r.is_online()).collect();
        if online.len() < self.quorum() {
            return Err(BackendError::NoQuorum {
                online: online.len(),
                required: self.quorum(),
            });
        }
        Ok(online)
    }

    /// Brings every online replica up to date and returns the leader's reply
    /// to the last entry it applied.
    async fn replicate(&self, log: &Log, online: Vec<&Replica>) -> Option<Bytes> {
        // The first online replica acts as leader and answers the client.
        let mut leader_reply = None;
        for replica in online {
            let reply = replica.catch_up(log).await;
            if leader_reply.is_none() {
                leader_reply = Some(reply);
            }
        }
        leader_reply
    }

    fn compact(&self, log: &mut Log) {
        let floor = self.replicas.iter().map(Replica::applied).min().unwrap_or(0);
        log.compact(floor);
    }
}

#[async_trait]
impl ReplicatedLog for LocalReplicaGroup {
    async fn submit(&self, entry: Bytes) -> Result<Bytes, BackendError> {
        let mut log = self.log.lock().await;
        let online = self.online()?;

        log.entries.push(entry);
        tracing::debug!("committing log entry {} on {} replicas", log.committed(), online.len());
        let reply = self.replicate(&log, online).await;
        self.compact(&mut log);
        reply.ok_or(BackendError::NoQuorum {
            online: 0,
            required: self.quorum(),
        })
    }

    async fn query(&self, entry: Bytes) -> Result<Bytes, BackendError> {
        let mut log = self.log.lock().await;
        let online = self.online()?;
        let leader = online.first().copied();

        self.replicate(&log, online).await;
        self.compact(&mut log);
        match leader {
            Some(leader) => Ok(leader.machine.apply_entry(&entry).await),
            None => Err(BackendError::NoQuorum {
                online: 0,
                required: self.quorum(),
            }),
        }
    }
}

/// [`BlockBackend`] that funnels every call through a replicated log.
pub struct ConsensusBackend<L: ReplicatedLog> {
    log: L,
}

impl<L: ReplicatedLog> ConsensusBackend<L> {
    pub fn new(log: L) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    async fn submit_status(&self, req: Request) -> Result<(), BackendError> {
        let id = req.id();
        let reply = self.log.submit(req.encode()).await?;
        if wire::read_status(&mut &reply[..]).await? {
            Ok(())
        } else {
            Err(BackendError::Rejected {
                node: "consensus".into(),
                block: id,
            })
        }
    }
}

#[async_trait]
impl<L: ReplicatedLog> BlockBackend for ConsensusBackend<L> {
    async fn store(&self, id: BlockId, data: &[u8]) -> Result<(), BackendError> {
        self.submit_status(Request::Store {
            id,
            data: Bytes::copy_from_slice(data),
        })
        .await
    }

    async fn fetch(&self, id: BlockId) -> Result<Vec<u8>, BackendError> {
        let reply = self.log.query(Request::Fetch { id }.encode()).await?;
        wire::read_payload(&mut &reply[..])
            .await?
            .ok_or(BackendError::Missing(id))
    }

    async fn purge(&self, id: BlockId) -> Result<(), BackendError> {
        self.submit_status(Request::Purge { id }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn group(n: usize) -> (tempfile::TempDir, ConsensusBackend<LocalReplicaGroup>) {
        let tmp = tempfile::tempdir().unwrap();
        let dirs: Vec<PathBuf> = (0..n).map(|i| tmp.path().join(format!("r{i}"))).collect();
        let group = LocalReplicaGroup::open(&dirs).await.unwrap();
        (tmp, ConsensusBackend::new(group))
    }

    #[tokio::test]
    async fn test_store_is_applied_on_every_replica() {
        let (_tmp, backend) = group(3).await;
        backend.store(11, b"replicated").await.unwrap();
        assert_eq!(backend.fetch(11).await.unwrap(), b"replicated");

        for i in 0..3 {
            let machine = backend.log().machine(i).unwrap();
            assert_eq!(machine.store().get(11).await.unwrap(), Some(b"replicated".to_vec()));
            assert_eq!(backend.log().applied_index(i), Some(1));
        }
        assert_eq!(backend.log().committed_index().await, 1);
        assert_eq!(backend.log().log_len().await, 0);
    }

    #[tokio::test]
    async fn test_fetches_are_not_logged() {
        let (_tmp, backend) = group(3).await;
        backend.store(4, b"read me").await.unwrap();
        for _ in 0..5 {
            assert_eq!(backend.fetch(4).await.unwrap(), b"read me");
        }
        assert_eq!(backend.log().committed_index().await, 1);
        assert_eq!(backend.log().log_len().await, 0);
    }

    #[tokio::test]
    async fn test_minority_outage_tolerated_and_replayed() {
        let (_tmp, backend) = group(3).await;
        backend.log().set_online(2, false);
        backend.store(1, b"one").await.unwrap();
        backend.store(2, b"two").await.unwrap();
        assert_eq!(backend.log().applied_index(2), Some(0));
        // retained until the offline replica has applied them
        assert_eq!(backend.log().log_len().await, 2);

        backend.log().set_online(2, true);
        backend.store(3, b"three").await.unwrap();
        let lagging = backend.log().machine(2).unwrap();
        assert_eq!(lagging.store().get(1).await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(lagging.store().get(2).await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(lagging.store().get(3).await.unwrap(), Some(b"three".to_vec()));
        assert_eq!(backend.log().applied_index(2), Some(3));
        assert_eq!(backend.log().log_len().await, 0);
    }

    #[tokio::test]
    async fn test_fetch_catches_up_returning_replica() {
        let (_tmp, backend) = group(3).await;
        backend.log().set_online(0, false);
        backend.store(8, b"eight").await.unwrap();
        backend.log().set_online(0, true);

        // replica 0 leads again and must see the write it missed
        assert_eq!(backend.fetch(8).await.unwrap(), b"eight");
        assert_eq!(backend.log().applied_index(0), Some(1));
        assert_eq!(backend.log().log_len().await, 0);
    }

    #[tokio::test]
    async fn test_majority_outage_is_refused() {
        let (_tmp, backend) = group(3).await;
        backend.log().set_online(0, false);
        backend.log().set_online(1, false);
        let err = backend.store(5, b"lost").await.unwrap_err();
        assert!(matches!(err, BackendError::NoQuorum { online: 1, required: 2 }));
        assert!(matches!(backend.fetch(5).await, Err(BackendError::NoQuorum { .. })));
        assert_eq!(backend.log().committed_index().await, 0);
    }

    #[tokio::test]
    async fn test_fetch_and_purge_through_log() {
        let (_tmp, backend) = group(1).await;
        assert!(matches!(backend.fetch(9).await, Err(BackendError::Missing(9))));
        backend.store(9, b"x").await.unwrap();
        backend.purge(9).await.unwrap();
        assert!(matches!(backend.fetch(9).await, Err(BackendError::Missing(9))));
    }

    #[tokio::test]
    async fn test_malformed_entry_yields_error_reply() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = BlockStateMachine::open(tmp.path()).await.unwrap();
        let reply = machine.apply_entry(b"bogus").await;
        assert!(!wire::read_status(&mut &reply[..]).await.unwrap());
    }
}
