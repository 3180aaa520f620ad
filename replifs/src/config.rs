//! Server configuration and backend selection.

use crate::cadapter::etcd::{self, EtcdBlockStore};
use crate::cadapter::localfs::LocalFsBackend;
use crate::cadapter::replica::DualReplicaBackend;
use crate::cadapter::{DynBackend, InMemoryBlockStore};
use crate::error::BackendError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    // ip:port the namespace server listens on
    #[serde(default = "default_addr")]
    pub addr: String,
    // owner and group stamped on every new inode
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Where file blocks are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Process memory; contents vanish on restart.
    #[default]
    Memory,
    /// One file per block under `dir`.
    Local { dir: PathBuf },
    /// Two of the listed worker nodes per block.
    DualReplica { hosts: Vec<String> },
    /// Raft-replicated etcd cluster, one key per block under `prefix`.
    Consensus {
        endpoints: Vec<String>,
        #[serde(default = "default_prefix")]
        prefix: String,
    },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            owner: default_owner(),
            group: default_group(),
            backend: BackendConfig::default(),
        }
    }
}

fn default_addr() -> String {
    DEFAULT_ADDR.to_string()
}

fn default_prefix() -> String {
    etcd::DEFAULT_PREFIX.to_string()
}

fn default_owner() -> String {
    "user".to_string()
}

fn default_group() -> String {
    "group".to_string()
}

/// Default block directory for a worker node.
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("replifs")
        .join("blocks")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    serde_yaml::from_str(content).context("Failed to parse YAML config")
}

/// Splits a comma separated `host:port` list, ignoring blanks.
pub fn parse_hosts(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Memory => "memory",
            BackendConfig::Local { .. } => "local",
            BackendConfig::DualReplica { .. } => "dual_replica",
            BackendConfig::Consensus { .. } => "consensus",
        }
    }

    pub async fn build(&self) -> Result<DynBackend, BackendError> {
        let backend: DynBackend = match self {
            BackendConfig::Memory => Arc::new(InMemoryBlockStore::new()),
            BackendConfig::Local { dir } => Arc::new(LocalFsBackend::open(dir).await?),
            BackendConfig::DualReplica { hosts } => Arc::new(DualReplicaBackend::new(hosts)?),
            BackendConfig::Consensus { endpoints, prefix } => {
                Arc::new(EtcdBlockStore::connect(endpoints, prefix).await?)
            }
        };
        tracing::info!("using {} block backend", self.kind());
        Ok(backend)
    }
}
