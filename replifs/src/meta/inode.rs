//! Inode records and absolute-path helpers.

use super::block::BlockId;
use chrono::{DateTime, Utc};

pub type InodeNo = u64;

/// The root directory always carries inode number 0.
pub const ROOT_INO: InodeNo = 0;
pub const ROOT_PATH: &str = "/";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    File,
    Dir,
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileType::File => f.write_str("file"),
            FileType::Dir => f.write_str("directory"),
        }
    }
}

/// Metadata for one namespace entry.
///
/// For a directory `blocks` holds exactly one id, the directory block. For a
/// file it is the ordered list of content blocks whose concatenation is the
/// file's bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inode {
    pub ino: InodeNo,
    pub owner: String,
    pub group: String,
    pub path: String,
    pub size: u64,
    pub kind: FileType,
    pub created: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub blocks: Vec<BlockId>,
}

impl Inode {
    pub fn new_dir(ino: InodeNo, owner: &str, group: &str, path: String, dir_block: BlockId) -> Self {
        let now = Utc::now();
        Self {
            ino,
            owner: owner.to_string(),
            group: group.to_string(),
            path,
            size: 0,
            kind: FileType::Dir,
            created: now,
            accessed: now,
            modified: now,
            blocks: vec![dir_block],
        }
    }

    pub fn new_file(
        ino: InodeNo,
        owner: &str,
        group: &str,
        path: String,
        size: u64,
        blocks: Vec<BlockId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            ino,
            owner: owner.to_string(),
            group: group.to_string(),
            path,
            size,
            kind: FileType::File,
            created: now,
            accessed: now,
            modified: now,
            blocks,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Dir
    }

    pub fn is_root(&self) -> bool {
        self.ino == ROOT_INO
    }

    /// Id of the directory block, `None` for files.
    pub fn dir_block(&self) -> Option<BlockId> {
        if self.is_dir() {
            self.blocks.first().copied()
        } else {
            None
        }
    }

    /// Last path segment, `/` for the root.
    pub fn name(&self) -> &str {
        leaf_name(&self.path)
    }
}

/// Joins a single segment onto an absolute directory path.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir == ROOT_PATH {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Parent of an absolute path; the root is its own parent.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT_PATH,
        Some(n) => &path[..n],
    }
}

pub fn leaf_name(path: &str) -> &str {
    if path == ROOT_PATH {
        return ROOT_PATH;
    }
    path.rsplit('/').next().unwrap_or(path)
}

/// Checks that `name` is usable as a single directory entry.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}
