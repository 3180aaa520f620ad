//! Block worker node: serves `store`/`fetch`/`purge` frames over TCP.

use crate::cadapter::consensus::BlockStateMachine;
use crate::cadapter::wire::{self, Request};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Accepts connections forever, one task per connection.
pub async fn run_worker(listener: TcpListener, machine: Arc<BlockStateMachine>) -> io::Result<()> {
    tracing::info!(
        "block worker listening on {} (storage {})",
        listener.local_addr()?,
        machine.store().root().display()
    );
    loop {
        let (stream, peer) = listener.accept().await?;
        let machine = machine.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, machine).await {
                tracing::warn!("worker connection {peer} ended with error: {e}");
            }
        });
    }
}

/// Serves requests from one peer until it closes the stream. A malformed
/// frame gets an `ERROR` status and ends the connection.
pub async fn handle_connection(stream: TcpStream, machine: Arc<BlockStateMachine>) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    loop {
        let req = match Request::read_from(&mut reader).await {
            Ok(Some(req)) => req,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!("rejecting malformed request: {e}");
                write_half.write_all(&wire::encode_status(false)).await?;
                return write_half.shutdown().await;
            }
        };
        tracing::debug!("worker request {:?} for block {}", tag(&req), req.id());
        let reply = machine.apply(req).await;
        write_half.write_all(&reply).await?;
        write_half.flush().await?;
    }
}

fn tag(req: &Request) -> &'static str {
    match req {
        Request::Store { .. } => "store",
        Request::Fetch { .. } => "fetch",
        Request::Purge { .. } => "purge",
    }
}
