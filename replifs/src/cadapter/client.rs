//! TCP client for a single block worker node.
//!
//! Every call opens a fresh connection, sends one request frame and reads the
//! matching reply. Calls fail fast on any I/O error; retries are left to the
//! caller.

use crate::cadapter::wire::{self, Request};
use crate::error::BackendError;
use crate::meta::block::BlockId;
use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Clone, Debug)]
pub struct NodeClient {
    addr: String,
}

impl NodeClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn send(&self, req: &Request) -> Result<BufReader<TcpStream>, BackendError> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(&req.encode()).await?;
        stream.flush().await?;
        Ok(BufReader::new(stream))
    }

    pub async fn store(&self, id: BlockId, data: &[u8]) -> Result<(), BackendError> {
        let req = Request::Store {
            id,
            data: Bytes::copy_from_slice(data),
        };
        let mut conn = self.send(&req).await?;
        if wire::read_status(&mut conn).await? {
            Ok(())
        } else {
            Err(BackendError::Rejected {
                node: self.addr.clone(),
                block: id,
            })
        }
    }

    pub async fn fetch(&self, id: BlockId) -> Result<Vec<u8>, BackendError> {
        let mut conn = self.send(&Request::Fetch { id }).await?;
        wire::read_payload(&mut conn)
            .await?
            .ok_or(BackendError::Missing(id))
    }

    pub async fn purge(&self, id: BlockId) -> Result<(), BackendError> {
        let mut conn = self.send(&Request::Purge { id }).await?;
        if wire::read_status(&mut conn).await? {
            Ok(())
        } else {
            Err(BackendError::Rejected {
                node: self.addr.clone(),
                block: id,
            })
        }
    }
}
