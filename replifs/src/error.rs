//! Error types shared by the namespace core and the block backends.

use crate::meta::block::BlockId;
use thiserror::Error;

/// Failures reported by a [`BlockBackend`](crate::cadapter::BlockBackend).
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed block protocol frame: {0}")]
    Protocol(String),

    #[error("block {0} is not stored on any reachable replica")]
    Missing(BlockId),

    #[error("node {node} rejected the request for block {block}")]
    Rejected { node: String, block: BlockId },

    #[error("no replica could serve block {block}: {reason}")]
    Unavailable { block: BlockId, reason: String },

    #[error("only {online} of {required} required replicas are online")]
    NoQuorum { online: usize, required: usize },

    #[error("etcd request failed: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("invalid backend configuration: {0}")]
    Config(String),
}

/// Failures surfaced by namespace operations.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("path does not exist: {0}")]
    NotFound(String),

    #[error("invalid file type: {0}")]
    InvalidType(String),

    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid entry name: {0:?}")]
    InvalidName(String),

    #[error("block backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),

    #[error("transaction {id} failed and was rolled back: {source}")]
    TransactionFailure {
        id: u64,
        #[source]
        source: Box<FsError>,
    },
}

pub type Result<T, E = FsError> = std::result::Result<T, E>;
