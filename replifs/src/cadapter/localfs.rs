//! Local directory block store: one file per block id under a storage root.

use crate::cadapter::BlockBackend;
use crate::error::BackendError;
use crate::meta::block::BlockId;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};

pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Creates the storage root if it does not exist yet.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self, BackendError> {
        let backend = Self::new(root);
        fs::create_dir_all(&backend.root).await?;
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: BlockId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Returns `None` when the block file does not exist.
    pub async fn get(&self, id: BlockId) -> Result<Option<Vec<u8>>, BackendError> {
        match fs::read(self.path_for(id)).await {
            Ok(buf) => Ok(Some(buf)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlockBackend for LocalFsBackend {
    async fn store(&self, id: BlockId, data: &[u8]) -> Result<(), BackendError> {
        let path = self.path_for(id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut f = fs::File::create(path).await?;
        f.write_all(data).await?;
        f.flush().await?;
        f.sync_all().await?;
        Ok(())
    }

    async fn fetch(&self, id: BlockId) -> Result<Vec<u8>, BackendError> {
        self.get(id).await?.ok_or(BackendError::Missing(id))
    }

    async fn purge(&self, id: BlockId) -> Result<(), BackendError> {
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
