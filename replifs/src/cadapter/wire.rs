//! Block node wire codec.
//!
//! Request frame: a 5-byte tag (`store`, `fetch` or `purge`), the block id as a
//! 20-byte right-aligned decimal, and for `store` a 10-byte decimal length
//! followed by that many raw bytes.
//!
//! Replies: `store` and `purge` answer with a 7-byte status (`SUCCESS` or
//! `ERROR` padded with spaces). `fetch` answers with a 10-byte zero-padded
//! length and the payload, or the 5-byte `ERROR` on a miss.

use crate::error::BackendError;
use crate::meta::block::BlockId;
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const TAG_LEN: usize = 5;
pub const ID_LEN: usize = 20;
pub const LEN_LEN: usize = 10;
pub const STATUS_LEN: usize = 7;

/// Upper bound on a single payload accepted from the wire.
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

const TAG_STORE: &[u8; TAG_LEN] = b"store";
const TAG_FETCH: &[u8; TAG_LEN] = b"fetch";
const TAG_PURGE: &[u8; TAG_LEN] = b"purge";
const MISS: &[u8; TAG_LEN] = b"ERROR";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Store { id: BlockId, data: Bytes },
    Fetch { id: BlockId },
    Purge { id: BlockId },
}

impl Request {
    pub fn id(&self) -> BlockId {
        match self {
            Request::Store { id, .. } | Request::Fetch { id } | Request::Purge { id } => *id,
        }
    }

    pub fn encode(&self) -> Bytes {
        let (tag, payload) = match self {
            Request::Store { data, .. } => (TAG_STORE, Some(data)),
            Request::Fetch { .. } => (TAG_FETCH, None),
            Request::Purge { .. } => (TAG_PURGE, None),
        };
        let extra = payload.map_or(0, |d| LEN_LEN + d.len());
        let mut buf = BytesMut::with_capacity(TAG_LEN + ID_LEN + extra);
        buf.put_slice(tag);
        buf.put_slice(format!("{:>width$}", self.id(), width = ID_LEN).as_bytes());
        if let Some(data) = payload {
            buf.put_slice(format!("{:>width$}", data.len(), width = LEN_LEN).as_bytes());
            buf.put_slice(data);
        }
        buf.freeze()
    }

    /// Reads one request frame. `Ok(None)` means the peer closed the stream.
    pub async fn read_from<R>(r: &mut R) -> Result<Option<Self>, BackendError>
    where
        R: AsyncRead + Unpin,
    {
        let mut tag = [0u8; TAG_LEN];
        match r.read_exact(&mut tag).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let id = read_decimal(r, ID_LEN, "block id").await?;
        match &tag {
            TAG_STORE => {
                let len = read_decimal(r, LEN_LEN, "payload length").await? as usize;
                let data = read_payload_bytes(r, len).await?;
                Ok(Some(Request::Store {
                    id,
                    data: Bytes::from(data),
                }))
            }
            TAG_FETCH => Ok(Some(Request::Fetch { id })),
            TAG_PURGE => Ok(Some(Request::Purge { id })),
            other => Err(BackendError::Protocol(format!(
                "unknown command tag {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

/// Status reply for `store` and `purge`.
pub fn encode_status(ok: bool) -> Bytes {
    let text = if ok { "SUCCESS" } else { "ERROR" };
    Bytes::from(format!("{text:<width$}", width = STATUS_LEN))
}

/// Reply for `fetch`: the payload, or a miss.
pub fn encode_payload(data: Option<&[u8]>) -> Bytes {
    match data {
        Some(data) => {
            let mut buf = BytesMut::with_capacity(LEN_LEN + data.len());
            buf.put_slice(format!("{:0width$}", data.len(), width = LEN_LEN).as_bytes());
            buf.put_slice(data);
            buf.freeze()
        }
        None => Bytes::from_static(MISS),
    }
}

/// Reads a 7-byte status reply; `true` on `SUCCESS`.
pub async fn read_status<R>(r: &mut R) -> Result<bool, BackendError>
where
    R: AsyncRead + Unpin,
{
    let mut status = [0u8; STATUS_LEN];
    r.read_exact(&mut status).await?;
    match String::from_utf8_lossy(&status).trim() {
        "SUCCESS" => Ok(true),
        "ERROR" => Ok(false),
        other => Err(BackendError::Protocol(format!("unexpected status {other:?}"))),
    }
}

/// Reads a fetch reply; `None` when the node does not hold the block.
pub async fn read_payload<R>(r: &mut R) -> Result<Option<Vec<u8>>, BackendError>
where
    R: AsyncRead + Unpin,
{
    let mut len_field = [0u8; LEN_LEN];
    r.read_exact(&mut len_field[..TAG_LEN]).await?;
    if &len_field[..TAG_LEN] == MISS {
        return Ok(None);
    }
    r.read_exact(&mut len_field[TAG_LEN..]).await?;
    let len = parse_decimal(&len_field, "payload length")? as usize;
    read_payload_bytes(r, len).await.map(Some)
}

async fn read_decimal<R>(r: &mut R, width: usize, field: &str) -> Result<u64, BackendError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; width];
    r.read_exact(&mut buf).await?;
    parse_decimal(&buf, field)
}

async fn read_payload_bytes<R>(r: &mut R, len: usize) -> Result<Vec<u8>, BackendError>
where
    R: AsyncRead + Unpin,
{
    if len > MAX_PAYLOAD {
        return Err(BackendError::Protocol(format!(
            "payload of {len} bytes exceeds limit of {MAX_PAYLOAD}"
        )));
    }
    let mut data = vec![0u8; len];
    r.read_exact(&mut data).await?;
    Ok(data)
}

fn parse_decimal(raw: &[u8], field: &str) -> Result<u64, BackendError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| BackendError::Protocol(format!("{field} is not ASCII")))?;
    text.trim()
        .parse::<u64>()
        .map_err(|e| BackendError::Protocol(format!("bad {field} {text:?}: {e}")))
}
