//! Namespace index: block store, inode store and path store.
//!
//! Each store sits behind its own mutex. Locks are always taken in one global
//! order: blocks, inodes, paths, then any session working-directory slot.
//! Composite operations take all three index locks through [`IndexGuard`];
//! single-store updates may take just one. No lock is ever held across backend
//! I/O.

use super::block::{Block, BlockId, DirEntry, DirectoryBlock};
use super::inode::{FileType, Inode, InodeNo, ROOT_INO, ROOT_PATH, join_path, parent_path};
use crate::error::{FsError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct NamespaceIndex {
    blocks: Mutex<HashMap<BlockId, Block>>,
    inodes: Mutex<HashMap<InodeNo, Inode>>,
    paths: Mutex<HashMap<String, InodeNo>>,
}

/// All three index locks, acquired in the global order.
pub struct IndexGuard<'a> {
    pub blocks: MutexGuard<'a, HashMap<BlockId, Block>>,
    pub inodes: MutexGuard<'a, HashMap<InodeNo, Inode>>,
    pub paths: MutexGuard<'a, HashMap<String, InodeNo>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every critical section leaves the maps structurally valid, so a poisoned
    // lock is still safe to reuse.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NamespaceIndex {
    /// Creates the index holding only the root directory.
    pub fn new(owner: &str, group: &str) -> Self {
        let root_block = DirectoryBlock::new();
        let root = Inode::new_dir(ROOT_INO, owner, group, ROOT_PATH.to_string(), root_block.id());

        let mut blocks = HashMap::new();
        blocks.insert(root_block.id(), Block::Directory(root_block));
        let mut inodes = HashMap::new();
        inodes.insert(ROOT_INO, root);
        let mut paths = HashMap::new();
        paths.insert(ROOT_PATH.to_string(), ROOT_INO);

        Self {
            blocks: Mutex::new(blocks),
            inodes: Mutex::new(inodes),
            paths: Mutex::new(paths),
        }
    }

    pub fn lock_all(&self) -> IndexGuard<'_> {
        let blocks = lock(&self.blocks);
        let inodes = lock(&self.inodes);
        let paths = lock(&self.paths);
        IndexGuard {
            blocks,
            inodes,
            paths,
        }
    }

    pub fn lock_blocks(&self) -> MutexGuard<'_, HashMap<BlockId, Block>> {
        lock(&self.blocks)
    }

    pub fn lock_inodes(&self) -> MutexGuard<'_, HashMap<InodeNo, Inode>> {
        lock(&self.inodes)
    }

    pub fn inode(&self, ino: InodeNo) -> Option<Inode> {
        self.lock_inodes().get(&ino).cloned()
    }

    pub fn contains_block(&self, id: BlockId) -> bool {
        self.lock_blocks().contains_key(&id)
    }

    pub fn inode_count(&self) -> usize {
        self.lock_inodes().len()
    }
}

impl IndexGuard<'_> {
    pub fn inode(&self, ino: InodeNo) -> Result<&Inode> {
        self.inodes
            .get(&ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))
    }

    pub fn lookup(&self, path: &str) -> Option<&Inode> {
        self.paths.get(path).and_then(|ino| self.inodes.get(ino))
    }

    pub fn dir_block(&self, dir: &Inode) -> Result<&DirectoryBlock> {
        dir.dir_block()
            .and_then(|id| self.blocks.get(&id))
            .and_then(Block::as_dir)
            .ok_or_else(|| FsError::InvalidType(format!("{} is not a directory", dir.path)))
    }

    fn dir_block_mut(&mut self, dir: InodeNo) -> Result<&mut DirectoryBlock> {
        let id = self
            .inodes
            .get(&dir)
            .and_then(Inode::dir_block)
            .ok_or_else(|| FsError::NotFound(format!("directory inode {dir}")))?;
        self.blocks
            .get_mut(&id)
            .and_then(Block::as_dir_mut)
            .ok_or_else(|| FsError::NotFound(format!("directory block {id}")))
    }

    /// Resolves `path` against the directory `from`.
    ///
    /// Absolute paths start at the root. `.` is a no-op, `..` moves to the
    /// parent (staying put at the root). Any component followed by another
    /// one, including `.` and `..`, must be a directory.
    pub fn resolve(&self, from: InodeNo, path: &str) -> Result<Inode> {
        let mut cur = if path.starts_with('/') {
            self.inode(ROOT_INO)?
        } else {
            self.inode(from)?
        };

        for seg in path.split('/').filter(|s| !s.is_empty()) {
            if !cur.is_dir() {
                return Err(FsError::InvalidType(format!(
                    "{} is not a directory",
                    cur.path
                )));
            }
            match seg {
                "." => {}
                ".." => {
                    if cur.is_root() {
                        continue;
                    }
                    let parent = parent_path(&cur.path);
                    cur = self
                        .lookup(parent)
                        .ok_or_else(|| FsError::NotFound(parent.to_string()))?;
                }
                name => {
                    let next = join_path(&cur.path, name);
                    cur = self.lookup(&next).ok_or(FsError::NotFound(next))?;
                }
            }
        }
        Ok(cur.clone())
    }

    /// Registers `inode` in the inode and path stores and links it into the
    /// directory `parent`, adding its size to the parent.
    pub fn link(&mut self, parent: InodeNo, inode: &Inode) -> Result<()> {
        self.dir_block_mut(parent)?.add(inode);
        self.inodes.insert(inode.ino, inode.clone());
        self.paths.insert(inode.path.clone(), inode.ino);
        if let Some(p) = self.inodes.get_mut(&parent) {
            p.size += inode.size;
        }
        Ok(())
    }

    /// Replaces the record of an already linked inode, keeping the parent's
    /// size in step with the size change.
    pub fn relink(&mut self, parent: InodeNo, inode: &Inode) -> Result<()> {
        let old_size = self.inode(inode.ino)?.size;
        self.dir_block_mut(parent)?.replace(inode);
        self.inodes.insert(inode.ino, inode.clone());
        self.paths.insert(inode.path.clone(), inode.ino);
        if let Some(p) = self.inodes.get_mut(&parent) {
            p.size = p.size - old_size.min(p.size) + inode.size;
        }
        Ok(())
    }

    /// Removes `ino` from every index and from its parent directory. Missing
    /// pieces are skipped, so calling it twice is harmless.
    pub fn unlink(&mut self, parent: InodeNo, ino: InodeNo) -> Option<Inode> {
        if let Ok(dir) = self.dir_block_mut(parent) {
            dir.remove(ino);
        }
        let removed = self.inodes.remove(&ino)?;
        if self.paths.get(&removed.path) == Some(&ino) {
            self.paths.remove(&removed.path);
        }
        self.refresh_dir_size(parent);
        Some(removed)
    }

    /// Recomputes a directory's size from its immediate children.
    pub fn refresh_dir_size(&mut self, dir: InodeNo) {
        let Ok(block) = self.inode(dir).and_then(|d| self.dir_block(d)) else {
            return;
        };
        let total: u64 = block
            .entries()
            .filter_map(|e| self.inodes.get(&e.ino))
            .map(|i| i.size)
            .sum();
        if let Some(d) = self.inodes.get_mut(&dir) {
            d.size = total;
        }
    }

    pub fn children(&self, dir: &Inode) -> Result<Vec<DirEntry>> {
        Ok(self.dir_block(dir)?.entries().cloned().collect())
    }

    /// Checks the cross-store invariants; used by tests.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        if self.lookup(ROOT_PATH).map(|r| r.ino) != Some(ROOT_INO) {
            return Err("root is missing".into());
        }
        if self.paths.len() != self.inodes.len() {
            return Err(format!(
                "{} paths but {} inodes",
                self.paths.len(),
                self.inodes.len()
            ));
        }
        for (ino, inode) in self.inodes.iter() {
            if self.paths.get(&inode.path) != Some(ino) {
                return Err(format!("path store disagrees for {}", inode.path));
            }
            if inode.is_root() {
                continue;
            }
            let parent = self
                .lookup(parent_path(&inode.path))
                .ok_or_else(|| format!("orphan {}", inode.path))?;
            let linked = self
                .dir_block(parent)
                .map(|b| b.contains(*ino))
                .unwrap_or(false);
            if !linked {
                return Err(format!("{} missing from its parent", inode.path));
            }
        }
        for inode in self.inodes.values().filter(|i| i.is_dir()) {
            let block = self.dir_block(inode).map_err(|e| e.to_string())?;
            for entry in block.entries() {
                match self.inodes.get(&entry.ino) {
                    Some(child) if parent_path(&child.path) == inode.path => {}
                    _ => return Err(format!("stale entry {} in {}", entry.name, inode.path)),
                }
            }
        }
        let referenced: HashSet<BlockId> = self.inodes.values().flat_map(|i| i.blocks.iter().copied()).collect();
        if let Some(id) = referenced.iter().find(|id| !self.blocks.contains_key(id)) {
            return Err(format!("block {id} is referenced but not indexed"));
        }
        if let Some(id) = self.blocks.keys().find(|id| !referenced.contains(id)) {
            return Err(format!("block {id} is indexed but unreferenced"));
        }
        Ok(())
    }
}

/// One line of a tree snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeNode {
    pub depth: usize,
    pub name: String,
    pub kind: FileType,
}

impl NamespaceIndex {
    /// Depth-first walk from the root. Sibling order follows the directory
    /// block's hash map and is therefore unspecified.
    pub fn walk(&self) -> Vec<TreeNode> {
        let guard = self.lock_all();
        let mut out = Vec::new();
        if let Ok(root) = guard.inode(ROOT_INO) {
            walk_from(&guard, root, 0, &mut out);
        }
        out
    }
}

fn walk_from(guard: &IndexGuard<'_>, inode: &Inode, depth: usize, out: &mut Vec<TreeNode>) {
    out.push(TreeNode {
        depth,
        name: inode.name().to_string(),
        kind: inode.kind,
    });
    let Ok(block) = guard.dir_block(inode) else {
        return;
    };
    for entry in block.entries() {
        if let Some(child) = guard.inodes.get(&entry.ino) {
            walk_from(guard, child, depth + 1, out);
        }
    }
}
