//! Namespace operations over the shared index and a block backend.
//!
//! Every call takes the caller's [`Session`] explicitly so relative paths are
//! resolved against that session's working directory. Backend I/O always
//! happens with no namespace lock held.

use crate::cadapter::BlockBackend;
use crate::error::{FsError, Result};
use crate::meta::block::{Block, BlockId, DirEntry, DirectoryBlock, FileBlock, random_id, split_into_blocks};
use crate::meta::index::NamespaceIndex;
use crate::meta::inode::{Inode, InodeNo, ROOT_INO, is_valid_name, join_path, parent_path};
use crate::meta::txn::{Transaction, TransactionManager};
use crate::vfs::session::Session;
use crate::vfs::tree::Tree;
use chrono::Utc;
use futures::future::try_join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// What the final step of a file creation did, kept for its compensation.
struct FileOutcome {
    inode: Inode,
    replaced: Option<Inode>,
    // Index entries of the replaced content, dropped when the new list is
    // linked.
    retired: Vec<(BlockId, Block)>,
}

type OutcomeSlot = Arc<Mutex<Option<FileOutcome>>>;

pub struct FileSystem<B: BlockBackend> {
    owner: String,
    group: String,
    index: Arc<NamespaceIndex>,
    backend: B,
    txns: TransactionManager,
    next_session: AtomicU64,
}

impl<B: BlockBackend> FileSystem<B> {
    /// Creates a filesystem holding only the root directory. New entries are
    /// owned by `owner`/`group`.
    pub fn new(backend: B, owner: &str, group: &str) -> Self {
        Self {
            owner: owner.to_string(),
            group: group.to_string(),
            index: Arc::new(NamespaceIndex::new(owner, group)),
            backend,
            txns: TransactionManager::new(),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn open_session(&self) -> Session {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("opened session {id}");
        Session::new(id)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn index(&self) -> &NamespaceIndex {
        &self.index
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.txns
    }

    /// Moves the session's working directory to `path`.
    pub fn change_dir(&self, session: &Session, path: &str) -> Result<Inode> {
        let g = self.index.lock_all();
        let target = g.resolve(session.cwd(), path)?;
        if !target.is_dir() {
            return Err(FsError::InvalidType(format!("{} is not a directory", target.path)));
        }
        session.set_cwd(target.ino);
        Ok(target)
    }

    pub fn working_dir(&self, session: &Session) -> Result<Inode> {
        let ino = session.cwd();
        self.index
            .inode(ino)
            .ok_or_else(|| FsError::NotFound(format!("working directory inode {ino}")))
    }

    pub fn working_dir_path(&self, session: &Session) -> Result<String> {
        self.working_dir(session).map(|dir| dir.path)
    }

    /// Creates an empty directory `name` inside the working directory.
    pub fn create_dir(&self, session: &Session, name: &str) -> Result<Inode> {
        check_name(name)?;
        let cwd = session.cwd();
        let path = self.child_path(cwd, name, |existing| {
            Some(FsError::AlreadyExists(existing.path.clone()))
        })?;

        let block = DirectoryBlock::new();
        let inode = Inode::new_dir(self.alloc_ino(), &self.owner, &self.group, path, block.id());
        self.txns.execute(self.dir_txn(cwd, &inode, block))?;
        tracing::info!("created directory {}", inode.path);
        Ok(inode)
    }

    /// Writes `data` as file `name` in the working directory, replacing the
    /// content of an existing file of that name.
    pub async fn create_file(&self, session: &Session, name: &str, data: &[u8]) -> Result<Inode> {
        check_name(name)?;
        let cwd = session.cwd();
        let path = self.child_path(cwd, name, |existing| {
            if existing.is_dir() {
                Some(FsError::InvalidType(format!("{} is a directory", existing.path)))
            } else {
                None
            }
        })?;

        let blocks = split_into_blocks(&self.backend, data).await?;
        let ids: Vec<BlockId> = blocks.iter().map(FileBlock::id).collect();
        let size = data.len() as u64;

        let (txn, slot) = self.file_txn(cwd, path.clone(), blocks, size);
        if let Err(e) = self.txns.execute(txn) {
            self.purge_blocks(&ids).await;
            return Err(e);
        }

        let outcome = slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| FsError::NotFound(path.clone()))?;
        if let Some(previous) = &outcome.replaced {
            tracing::info!("overwrote {} ({} bytes, {} blocks)", path, size, ids.len());
            self.purge_blocks(&previous.blocks).await;
        } else {
            tracing::info!("created {} ({} bytes, {} blocks)", path, size, ids.len());
        }
        Ok(outcome.inode)
    }

    /// Steps that index a directory block and link `inode` into `cwd`.
    fn dir_txn(&self, cwd: InodeNo, inode: &Inode, block: DirectoryBlock) -> Transaction {
        let block_id = block.id();
        let mut txn = Transaction::new();
        let (idx, idx_undo) = (self.index.clone(), self.index.clone());
        txn.add_step(
            move || {
                idx.lock_blocks().insert(block_id, Block::Directory(block));
                Ok(())
            },
            move || {
                idx_undo.lock_blocks().remove(&block_id);
                Ok(())
            },
        );

        let (idx, idx_undo) = (self.index.clone(), self.index.clone());
        let (linked, undo) = (inode.clone(), inode.clone());
        txn.add_step(
            move || {
                let mut g = idx.lock_all();
                g.inode(cwd)?;
                if let Some(existing) = g.lookup(&linked.path) {
                    return Err(FsError::AlreadyExists(existing.path.clone()));
                }
                if g.inodes.contains_key(&linked.ino) {
                    return Err(FsError::AlreadyExists(format!("inode {}", linked.ino)));
                }
                g.link(cwd, &linked)
            },
            move || {
                let mut g = idx_undo.lock_all();
                if g.inodes.get(&undo.ino).is_some_and(|i| i.path == undo.path) {
                    g.unlink(cwd, undo.ino);
                }
                Ok(())
            },
        );
        txn
    }

    /// Steps that index the stored content `blocks` and then create or
    /// overwrite the file at `path`. The slot is filled once the final step
    /// has applied.
    fn file_txn(
        &self,
        cwd: InodeNo,
        path: String,
        blocks: Vec<FileBlock>,
        size: u64,
    ) -> (Transaction, OutcomeSlot) {
        let ids: Vec<BlockId> = blocks.iter().map(FileBlock::id).collect();
        let mut txn = Transaction::new();
        for block in blocks {
            let id = block.id();
            let (idx, idx_undo) = (self.index.clone(), self.index.clone());
            txn.add_step(
                move || {
                    idx.lock_blocks().insert(id, Block::File(block));
                    Ok(())
                },
                move || {
                    idx_undo.lock_blocks().remove(&id);
                    Ok(())
                },
            );
        }

        let slot: OutcomeSlot = Arc::new(Mutex::new(None));
        let (idx, idx_undo) = (self.index.clone(), self.index.clone());
        let (slot_apply, slot_undo) = (slot.clone(), slot.clone());
        let (owner, group) = (self.owner.clone(), self.group.clone());
        let new_ino = self.alloc_ino();
        txn.add_step(
            move || {
                let mut g = idx.lock_all();
                g.inode(cwd)?;
                let outcome = match g.lookup(&path).cloned() {
                    Some(existing) if existing.is_dir() => {
                        return Err(FsError::InvalidType(format!("{} is a directory", existing.path)));
                    }
                    Some(existing) => {
                        let now = Utc::now();
                        let mut updated = existing.clone();
                        updated.size = size;
                        updated.blocks = ids;
                        updated.modified = now;
                        updated.accessed = now;
                        g.relink(cwd, &updated)?;
                        let retired = existing
                            .blocks
                            .iter()
                            .filter_map(|id| g.blocks.remove(id).map(|b| (*id, b)))
                            .collect();
                        FileOutcome {
                            inode: updated,
                            replaced: Some(existing),
                            retired,
                        }
                    }
                    None => {
                        if g.inodes.contains_key(&new_ino) {
                            return Err(FsError::AlreadyExists(format!("inode {new_ino}")));
                        }
                        let inode = Inode::new_file(new_ino, &owner, &group, path, size, ids);
                        g.link(cwd, &inode)?;
                        FileOutcome {
                            inode,
                            replaced: None,
                            retired: Vec::new(),
                        }
                    }
                };
                *slot_apply.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
                Ok(())
            },
            move || {
                let mut g = idx_undo.lock_all();
                let outcome = slot_undo.lock().unwrap_or_else(PoisonError::into_inner).take();
                match outcome {
                    Some(FileOutcome {
                        replaced: Some(previous),
                        retired,
                        ..
                    }) => {
                        g.blocks.extend(retired);
                        g.relink(cwd, &previous)?;
                    }
                    Some(FileOutcome {
                        inode,
                        replaced: None,
                        ..
                    }) => {
                        g.unlink(cwd, inode.ino);
                    }
                    None => {}
                }
                g.refresh_dir_size(cwd);
                Ok(())
            },
        );
        (txn, slot)
    }

    /// Removes a file and frees its content blocks.
    pub async fn delete_file(&self, session: &Session, path: &str) -> Result<Inode> {
        let removed = {
            let mut g = self.index.lock_all();
            let target = g.resolve(session.cwd(), path)?;
            if target.is_dir() {
                return Err(FsError::InvalidType(format!(
                    "{} is a directory and cannot be deleted",
                    target.path
                )));
            }
            let parent = g
                .lookup(parent_path(&target.path))
                .map(|p| p.ino)
                .ok_or_else(|| FsError::NotFound(parent_path(&target.path).to_string()))?;
            for id in &target.blocks {
                g.blocks.remove(id);
            }
            g.unlink(parent, target.ino)
                .ok_or_else(|| FsError::NotFound(target.path.clone()))?
        };

        self.purge_blocks(&removed.blocks).await;
        tracing::info!("deleted {}", removed.path);
        Ok(removed)
    }

    /// Reads a whole file by fetching its blocks in order.
    pub async fn read_file(&self, session: &Session, path: &str) -> Result<Vec<u8>> {
        let target = {
            let mut g = self.index.lock_all();
            let target = g.resolve(session.cwd(), path)?;
            if target.is_dir() {
                return Err(FsError::InvalidType(format!("{} is a directory", target.path)));
            }
            if let Some(inode) = g.inodes.get_mut(&target.ino) {
                inode.accessed = Utc::now();
            }
            target
        };

        let chunks = try_join_all(target.blocks.iter().map(|id| self.backend.fetch(*id))).await?;
        tracing::debug!("read {} ({} blocks)", target.path, chunks.len());
        Ok(chunks.concat())
    }

    /// Entries of the directory at `path` (or the working directory), sorted by
    /// name.
    pub fn list_dir(&self, session: &Session, path: Option<&str>) -> Result<Vec<DirEntry>> {
        let g = self.index.lock_all();
        let dir = g.resolve(session.cwd(), path.unwrap_or("."))?;
        if !dir.is_dir() {
            return Err(FsError::InvalidType(format!("{} is not a directory", dir.path)));
        }
        let mut entries = g.children(&dir)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub fn stat(&self, session: &Session, path: &str) -> Result<Inode> {
        self.index.lock_all().resolve(session.cwd(), path)
    }

    /// Snapshot of the whole namespace; render it with `Display`.
    pub fn tree(&self) -> Tree {
        Tree::new(self.index.walk())
    }

    /// Path `name` would take inside `dir`. `on_existing` decides whether an
    /// existing entry at that path is an error.
    fn child_path(
        &self,
        dir: InodeNo,
        name: &str,
        on_existing: impl FnOnce(&Inode) -> Option<FsError>,
    ) -> Result<String> {
        let g = self.index.lock_all();
        let parent = g.inode(dir)?;
        let path = join_path(&parent.path, name);
        match g.lookup(&path).and_then(on_existing) {
            Some(err) => Err(err),
            None => Ok(path),
        }
    }

    fn alloc_ino(&self) -> InodeNo {
        loop {
            let ino = random_id();
            if ino != ROOT_INO && !self.index.lock_inodes().contains_key(&ino) {
                return ino;
            }
        }
    }

    async fn purge_blocks(&self, ids: &[BlockId]) {
        for id in ids {
            if let Err(e) = self.backend.purge(*id).await {
                tracing::warn!("failed to purge block {id}: {e}");
            }
        }
    }
}

fn check_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(FsError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::InMemoryBlockStore;
    use crate::error::BackendError;
    use crate::meta::block::BLOCK_SIZE;
    use crate::meta::inode::FileType;

    fn fs() -> FileSystem<Arc<InMemoryBlockStore>> {
        FileSystem::new(Arc::new(InMemoryBlockStore::new()), "alice", "staff")
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_write_then_read_round_trips() {
        let fs = fs();
        let s = fs.open_session();
        for len in [0, 1, BLOCK_SIZE - 1, BLOCK_SIZE, BLOCK_SIZE + 1, BLOCK_SIZE * 3, 2500] {
            let name = format!("f{len}");
            let data = pattern(len);
            let inode = fs.create_file(&s, &name, &data).await.unwrap();
            assert_eq!(inode.size, len as u64);
            assert_eq!(inode.blocks.len(), len.div_ceil(BLOCK_SIZE));
            assert_eq!(fs.read_file(&s, &name).await.unwrap(), data);
        }
        fs.index().lock_all().check_consistency().unwrap();
    }

    #[tokio::test]
    async fn test_change_dir_and_working_dir_path() {
        let fs = fs();
        let s = fs.open_session();
        fs.create_dir(&s, "a").unwrap();
        fs.change_dir(&s, "a").unwrap();
        fs.create_dir(&s, "b").unwrap();
        fs.change_dir(&s, "b").unwrap();
        assert_eq!(fs.working_dir_path(&s).unwrap(), "/a/b");

        fs.change_dir(&s, "..").unwrap();
        assert_eq!(fs.working_dir_path(&s).unwrap(), "/a");
        fs.change_dir(&s, "/").unwrap();
        fs.change_dir(&s, "..").unwrap();
        assert_eq!(fs.working_dir_path(&s).unwrap(), "/");

        let ab = fs.change_dir(&s, "a/b").unwrap();
        let up = fs.change_dir(&s, "..").unwrap();
        fs.change_dir(&s, "/").unwrap();
        let a = fs.change_dir(&s, "a").unwrap();
        assert_eq!(up.ino, a.ino);
        assert_ne!(ab.ino, a.ino);
    }

    #[tokio::test]
    async fn test_change_dir_failures_keep_cwd() {
        let fs = fs();
        let s = fs.open_session();
        fs.create_file(&s, "f.txt", b"x").await.unwrap();
        assert!(matches!(fs.change_dir(&s, "missing"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.change_dir(&s, "f.txt"), Err(FsError::InvalidType(_))));
        assert!(matches!(fs.change_dir(&s, "f.txt/x"), Err(FsError::InvalidType(_))));
        assert!(matches!(fs.change_dir(&s, "f.txt/.."), Err(FsError::InvalidType(_))));
        assert!(matches!(fs.stat(&s, "/f.txt/."), Err(FsError::InvalidType(_))));
        assert_eq!(s.cwd(), ROOT_INO);
    }

    #[tokio::test]
    async fn test_sessions_have_independent_cwd() {
        let fs = fs();
        let s1 = fs.open_session();
        let s2 = fs.open_session();
        assert_ne!(s1.id(), s2.id());
        fs.create_dir(&s1, "d").unwrap();
        fs.change_dir(&s1, "d").unwrap();
        assert_eq!(fs.working_dir_path(&s1).unwrap(), "/d");
        assert_eq!(fs.working_dir_path(&s2).unwrap(), "/");
    }

    #[tokio::test]
    async fn test_delete_directory_is_invalid_type() {
        let fs = fs();
        let s = fs.open_session();
        fs.create_dir(&s, "x").unwrap();
        assert!(matches!(fs.delete_file(&s, "x").await, Err(FsError::InvalidType(_))));
        assert!(matches!(fs.delete_file(&s, "/").await, Err(FsError::InvalidType(_))));
        assert_eq!(fs.stat(&s, "x").unwrap().kind, FileType::Dir);
    }

    #[tokio::test]
    async fn test_delete_frees_blocks_and_entry() {
        let fs = fs();
        let s = fs.open_session();
        fs.create_dir(&s, "d").unwrap();
        fs.change_dir(&s, "d").unwrap();
        let inode = fs.create_file(&s, "f", &pattern(2500)).await.unwrap();
        assert_eq!(fs.backend().len(), 3);
        assert_eq!(fs.stat(&s, "/d").unwrap().size, 2500);

        let removed = fs.delete_file(&s, "/d/f").await.unwrap();
        assert_eq!(removed.ino, inode.ino);
        assert_eq!(fs.backend().len(), 0);
        assert!(inode.blocks.iter().all(|id| !fs.index().contains_block(*id)));
        assert_eq!(fs.stat(&s, "/d").unwrap().size, 0);
        assert!(fs.list_dir(&s, None).unwrap().is_empty());
        assert!(matches!(fs.read_file(&s, "f").await, Err(FsError::NotFound(_))));
        assert!(matches!(fs.delete_file(&s, "f").await, Err(FsError::NotFound(_))));
        fs.index().lock_all().check_consistency().unwrap();
    }

    #[tokio::test]
    async fn test_failed_store_leaves_no_trace() {
        let fs = fs();
        let s = fs.open_session();
        fs.create_dir(&s, "d").unwrap();
        fs.change_dir(&s, "d").unwrap();
        let inodes_before = fs.index().inode_count();

        fs.backend().fail_stores_after(1);
        let err = fs.create_file(&s, "big", &pattern(BLOCK_SIZE * 3)).await.unwrap_err();
        assert!(matches!(err, FsError::BackendUnavailable(_)));

        assert_eq!(fs.index().inode_count(), inodes_before);
        assert!(matches!(fs.stat(&s, "big"), Err(FsError::NotFound(_))));
        assert!(fs.list_dir(&s, None).unwrap().is_empty());
        assert_eq!(fs.stat(&s, "/d").unwrap().size, 0);
        assert_eq!(fs.backend().len(), 0);
        fs.index().lock_all().check_consistency().unwrap();
    }

    #[tokio::test]
    async fn test_overwrite_reuses_inode_and_reclaims_blocks() {
        let fs = fs();
        let s = fs.open_session();
        let first = fs.create_file(&s, "f", &pattern(2500)).await.unwrap();
        let second = fs.create_file(&s, "f", b"short").await.unwrap();

        assert_eq!(first.ino, second.ino);
        assert_eq!(second.size, 5);
        assert_eq!(fs.read_file(&s, "f").await.unwrap(), b"short");
        assert_eq!(fs.backend().len(), 1);
        assert!(first.blocks.iter().all(|id| !fs.backend().contains(*id)));
        assert!(first.blocks.iter().all(|id| !fs.index().contains_block(*id)));
        assert!(second.blocks.iter().all(|id| fs.index().contains_block(*id)));
        assert_eq!(fs.stat(&s, "/").unwrap().size, 5);
        assert_eq!(fs.list_dir(&s, None).unwrap().len(), 1);
        assert_eq!(fs.transactions().committed(), 2);
        fs.index().lock_all().check_consistency().unwrap();
    }

    fn failing_step(txn: &mut Transaction) {
        txn.add_step(|| Err(FsError::InvalidName("late failure".into())), || Ok(()));
    }

    #[tokio::test]
    async fn test_rolled_back_overwrite_restores_previous_file() {
        let fs = fs();
        let s = fs.open_session();
        let original = pattern(2500);
        let first = fs.create_file(&s, "f", &original).await.unwrap();

        let blocks = split_into_blocks(fs.backend(), b"new").await.unwrap();
        let new_ids: Vec<BlockId> = blocks.iter().map(FileBlock::id).collect();
        let (mut txn, slot) = fs.file_txn(ROOT_INO, "/f".to_string(), blocks, 3);
        failing_step(&mut txn);
        let err = fs.transactions().execute(txn).unwrap_err();
        assert!(matches!(err, FsError::TransactionFailure { .. }));
        assert!(slot.lock().unwrap().is_none());

        let restored = fs.stat(&s, "f").unwrap();
        assert_eq!(restored, first);
        assert_eq!(fs.stat(&s, "/").unwrap().size, 2500);
        assert!(first.blocks.iter().all(|id| fs.index().contains_block(*id)));
        assert!(new_ids.iter().all(|id| !fs.index().contains_block(*id)));
        assert_eq!(fs.read_file(&s, "f").await.unwrap(), original);
        fs.index().lock_all().check_consistency().unwrap();
    }

    #[tokio::test]
    async fn test_rolled_back_create_dir_is_unlinked() {
        let fs = fs();
        let s = fs.open_session();
        let block = DirectoryBlock::new();
        let block_id = block.id();
        let inode = Inode::new_dir(fs.alloc_ino(), "alice", "staff", "/d".to_string(), block_id);
        let mut txn = fs.dir_txn(ROOT_INO, &inode, block);
        failing_step(&mut txn);
        assert!(fs.transactions().execute(txn).is_err());

        assert!(matches!(fs.stat(&s, "d"), Err(FsError::NotFound(_))));
        assert!(fs.index().inode(inode.ino).is_none());
        assert!(!fs.index().contains_block(block_id));
        assert!(fs.list_dir(&s, None).unwrap().is_empty());
        fs.index().lock_all().check_consistency().unwrap();
        assert_eq!(fs.transactions().rolled_back(), 1);
    }

    /// Runs a callback on the first store, while no namespace lock is held.
    struct InterleavingBackend {
        inner: InMemoryBlockStore,
        on_store: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    #[async_trait::async_trait]
    impl BlockBackend for InterleavingBackend {
        async fn store(&self, id: BlockId, data: &[u8]) -> std::result::Result<(), BackendError> {
            let hook = self.on_store.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
            self.inner.store(id, data).await
        }

        async fn fetch(&self, id: BlockId) -> std::result::Result<Vec<u8>, BackendError> {
            self.inner.fetch(id).await
        }

        async fn purge(&self, id: BlockId) -> std::result::Result<(), BackendError> {
            self.inner.purge(id).await
        }
    }

    #[tokio::test]
    async fn test_directory_created_during_store_fails_final_step() {
        let backend = Arc::new(InterleavingBackend {
            inner: InMemoryBlockStore::new(),
            on_store: Mutex::new(None),
        });
        let fs = Arc::new(FileSystem::new(backend.clone(), "alice", "staff"));
        let other = fs.clone();
        *backend.on_store.lock().unwrap() = Some(Box::new(move || {
            let s = other.open_session();
            other.create_dir(&s, "x").unwrap();
        }));

        let s = fs.open_session();
        let err = fs.create_file(&s, "x", &pattern(1500)).await.unwrap_err();
        match err {
            FsError::TransactionFailure { source, .. } => {
                assert!(matches!(*source, FsError::InvalidType(_)))
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert_eq!(fs.stat(&s, "x").unwrap().kind, FileType::Dir);
        assert_eq!(fs.stat(&s, "/").unwrap().size, 0);
        assert_eq!(backend.inner.len(), 0);
        assert_eq!(fs.list_dir(&s, None).unwrap().len(), 1);
        assert_eq!(fs.transactions().rolled_back(), 1);
        fs.index().lock_all().check_consistency().unwrap();
    }

    #[tokio::test]
    async fn test_create_name_conflicts() {
        let fs = fs();
        let s = fs.open_session();
        fs.create_dir(&s, "d").unwrap();
        assert!(matches!(fs.create_dir(&s, "d"), Err(FsError::AlreadyExists(_))));
        assert!(matches!(
            fs.create_file(&s, "d", b"data").await,
            Err(FsError::InvalidType(_))
        ));
        fs.create_file(&s, "f", b"data").await.unwrap();
        assert!(matches!(fs.create_dir(&s, "f"), Err(FsError::AlreadyExists(_))));

        for bad in ["", ".", "..", "a/b"] {
            assert!(matches!(fs.create_dir(&s, bad), Err(FsError::InvalidName(_))));
            assert!(matches!(
                fs.create_file(&s, bad, b"x").await,
                Err(FsError::InvalidName(_))
            ));
        }
        assert_eq!(fs.backend().len(), 1);
    }

    #[tokio::test]
    async fn test_read_directory_and_backend_failure() {
        let fs = fs();
        let s = fs.open_session();
        fs.create_dir(&s, "d").unwrap();
        assert!(matches!(fs.read_file(&s, "d").await, Err(FsError::InvalidType(_))));

        fs.create_file(&s, "f", b"payload").await.unwrap();
        fs.backend().set_fail_fetch(true);
        assert!(matches!(
            fs.read_file(&s, "f").await,
            Err(FsError::BackendUnavailable(_))
        ));
        fs.backend().set_fail_fetch(false);
        assert_eq!(fs.read_file(&s, "f").await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_read_refreshes_access_time() {
        let fs = fs();
        let s = fs.open_session();
        let created = fs.create_file(&s, "f", b"abc").await.unwrap();
        fs.read_file(&s, "f").await.unwrap();
        let after = fs.stat(&s, "f").unwrap();
        assert!(after.accessed >= created.accessed);
        assert_eq!(after.modified, created.modified);
    }

    #[tokio::test]
    async fn test_directory_sizes_follow_children() {
        let fs = fs();
        let s = fs.open_session();
        fs.create_dir(&s, "a").unwrap();
        fs.change_dir(&s, "a").unwrap();
        fs.create_file(&s, "x", &pattern(40)).await.unwrap();
        fs.create_file(&s, "y", &pattern(2)).await.unwrap();
        assert_eq!(fs.stat(&s, "/a").unwrap().size, 42);
        fs.delete_file(&s, "x").await.unwrap();
        assert_eq!(fs.stat(&s, "/a").unwrap().size, 2);
    }

    #[tokio::test]
    async fn test_list_dir_and_stat() {
        let fs = fs();
        let s = fs.open_session();
        fs.create_dir(&s, "b").unwrap();
        fs.create_file(&s, "a.txt", b"hi").await.unwrap();
        let names: Vec<String> = fs.list_dir(&s, Some("/")).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a.txt", "b"]);
        assert!(matches!(fs.list_dir(&s, Some("a.txt")), Err(FsError::InvalidType(_))));

        let st = fs.stat(&s, "a.txt").unwrap();
        assert_eq!(st.owner, "alice");
        assert_eq!(st.group, "staff");
        assert_eq!(st.path, "/a.txt");
        assert_eq!(st.kind, FileType::File);
    }

    #[tokio::test]
    async fn test_tree_visits_every_entry_once() {
        let fs = fs();
        let s = fs.open_session();
        fs.create_dir(&s, "a").unwrap();
        fs.change_dir(&s, "a").unwrap();
        fs.create_file(&s, "b.txt", b"b").await.unwrap();
        fs.create_dir(&s, "c").unwrap();

        let tree = fs.tree();
        let mut seen: Vec<(usize, String)> = tree.nodes().iter().map(|n| (n.depth, n.name.clone())).collect();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                (0, "/".to_string()),
                (1, "a".to_string()),
                (2, "b.txt".to_string()),
                (2, "c".to_string()),
            ]
        );
        let text = tree.to_string();
        assert!(text.starts_with("/\n\t/a\n"));
        assert!(text.contains("\t\tb.txt"));
        assert!(text.contains("\t\t/c"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_in_same_directory() {
        let fs = Arc::new(fs());
        let mut handles = Vec::new();
        for i in 0..16 {
            let fs = fs.clone();
            handles.push(tokio::spawn(async move {
                let s = fs.open_session();
                let data = pattern(1500 + i);
                fs.create_file(&s, &format!("f{i}"), &data).await.map(|_| data)
            }));
        }
        let mut expected = Vec::new();
        for (i, h) in handles.into_iter().enumerate() {
            expected.push((format!("f{i}"), h.await.unwrap().unwrap()));
        }

        let s = fs.open_session();
        assert_eq!(fs.list_dir(&s, None).unwrap().len(), 16);
        for (name, data) in expected {
            assert_eq!(fs.read_file(&s, &name).await.unwrap(), data);
        }
        fs.index().lock_all().check_consistency().unwrap();
        assert_eq!(fs.transactions().rolled_back(), 0);
    }
}
