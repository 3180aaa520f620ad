//! Directory and file blocks.
//!
//! Directory blocks are pure in-memory child listings. File blocks only carry
//! an id and a length; their bytes live in a [`BlockBackend`].

use super::inode::{FileType, Inode, InodeNo};
use crate::cadapter::BlockBackend;
use crate::error::BackendError;
use futures::future::join_all;
use rand::Rng;
use std::collections::HashMap;

pub type BlockId = u64;

/// Maximum number of bytes held by one file block.
pub const BLOCK_SIZE: usize = 1000;

/// Random 64-bit identifier. Collisions are treated as negligible.
pub fn random_id() -> u64 {
    rand::rng().random()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: InodeNo,
    pub name: String,
    pub kind: FileType,
}

impl From<&Inode> for DirEntry {
    fn from(inode: &Inode) -> Self {
        Self {
            ino: inode.ino,
            name: inode.name().to_string(),
            kind: inode.kind,
        }
    }
}

/// Immediate children of one directory, keyed by inode number.
#[derive(Clone, Debug, Default)]
pub struct DirectoryBlock {
    id: BlockId,
    entries: HashMap<InodeNo, DirEntry>,
}

impl DirectoryBlock {
    pub fn new() -> Self {
        Self::with_id(random_id())
    }

    pub fn with_id(id: BlockId) -> Self {
        Self {
            id,
            entries: HashMap::new(),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn add(&mut self, inode: &Inode) {
        self.entries.insert(inode.ino, DirEntry::from(inode));
    }

    pub fn remove(&mut self, ino: InodeNo) -> Option<DirEntry> {
        self.entries.remove(&ino)
    }

    /// Replaces the entry for `inode.ino`, inserting it when absent.
    pub fn replace(&mut self, inode: &Inode) -> Option<DirEntry> {
        self.entries.insert(inode.ino, DirEntry::from(inode))
    }

    pub fn get(&self, ino: InodeNo) -> Option<&DirEntry> {
        self.entries.get(&ino)
    }

    pub fn contains(&self, ino: InodeNo) -> bool {
        self.entries.contains_key(&ino)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle to one backend-resident chunk of file content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileBlock {
    id: BlockId,
    len: usize,
}

impl FileBlock {
    /// Assigns a fresh id and durably stores `data` before returning.
    pub async fn create<B>(backend: &B, data: &[u8]) -> Result<Self, BackendError>
    where
        B: BlockBackend + ?Sized,
    {
        debug_assert!(data.len() <= BLOCK_SIZE, "chunk exceeds block size");
        let id = random_id();
        backend.store(id, data).await?;
        Ok(Self {
            id,
            len: data.len(),
        })
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Clone, Debug)]
pub enum Block {
    Directory(DirectoryBlock),
    File(FileBlock),
}

impl Block {
    pub fn id(&self) -> BlockId {
        match self {
            Block::Directory(d) => d.id(),
            Block::File(f) => f.id(),
        }
    }

    pub fn as_dir(&self) -> Option<&DirectoryBlock> {
        match self {
            Block::Directory(d) => Some(d),
            Block::File(_) => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut DirectoryBlock> {
        match self {
            Block::Directory(d) => Some(d),
            Block::File(_) => None,
        }
    }
}

/// Slices `data` into `BLOCK_SIZE` chunks and stores every chunk.
///
/// Chunks are stored concurrently; the returned blocks keep input order. If
/// any store fails, chunks that did land are purged best-effort and the first
/// error is returned.
pub async fn split_into_blocks<B>(backend: &B, data: &[u8]) -> Result<Vec<FileBlock>, BackendError>
where
    B: BlockBackend + ?Sized,
{
    let results = join_all(data.chunks(BLOCK_SIZE).map(|c| FileBlock::create(backend, c))).await;

    let mut blocks = Vec::with_capacity(results.len());
    let mut first_err = None;
    for res in results {
        match res {
            Ok(block) => blocks.push(block),
            Err(e) if first_err.is_none() => first_err = Some(e),
            Err(e) => tracing::debug!("additional chunk store failure: {e}"),
        }
    }

    match first_err {
        None => Ok(blocks),
        Some(err) => {
            for block in &blocks {
                if let Err(e) = backend.purge(block.id()).await {
                    tracing::warn!("failed to purge orphaned block {}: {e}", block.id());
                }
            }
            Err(err)
        }
    }
}
