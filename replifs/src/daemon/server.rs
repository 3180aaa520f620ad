//! Line-protocol namespace server.
//!
//! Every connection owns exactly one [`Session`]. Each line is one command;
//! each reply is written back followed by a newline. Failures are reported as
//! `Error: <message>` and never close the connection.

use crate::cadapter::BlockBackend;
use crate::daemon::command::Command;
use crate::error::FsError;
use crate::meta::inode::{FileType, Inode};
use crate::vfs::{FileSystem, Session};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Accepts connections until the listener fails, spawning one task per
/// client.
pub async fn serve<B>(listener: TcpListener, fs: Arc<FileSystem<B>>) -> io::Result<()>
where
    B: BlockBackend + 'static,
{
    tracing::info!("namespace server listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        let fs = fs.clone();
        tokio::spawn(async move {
            tracing::info!("client connected: {peer}");
            match handle_connection(stream, fs).await {
                Ok(()) => tracing::info!("client disconnected: {peer}"),
                Err(e) => tracing::warn!("client {peer} dropped: {e}"),
            }
        });
    }
}

pub async fn handle_connection<B: BlockBackend>(stream: TcpStream, fs: Arc<FileSystem<B>>) -> io::Result<()> {
    let session = fs.open_session();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        tracing::debug!("session {}: {line}", session.id());
        let reply = match line.parse::<Command>() {
            Ok(cmd) => match execute(&fs, &session, cmd).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!("session {}: {line:?} failed: {e}", session.id());
                    format!("Error: {e}")
                }
            },
            Err(e) => format!("Error: {e}"),
        };
        write_half.write_all(reply.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;
    }
    Ok(())
}

/// Runs one parsed command against the session and renders the reply text.
pub async fn execute<B: BlockBackend>(fs: &FileSystem<B>, session: &Session, cmd: Command) -> Result<String, FsError> {
    let reply = match cmd {
        Command::Cd(path) => {
            let dir = fs.change_dir(session, &path)?;
            format!("Changed directory to {}", dir.path)
        }
        Command::Mkdir(name) => {
            fs.create_dir(session, &name)?;
            format!("Directory {name} created.")
        }
        Command::Write { name, data } => {
            fs.create_file(session, &name, data.as_bytes()).await?;
            format!("File {name} created.")
        }
        Command::Read(path) => {
            let data = fs.read_file(session, &path).await?;
            String::from_utf8_lossy(&data).into_owned()
        }
        Command::Rm(path) => {
            fs.delete_file(session, &path).await?;
            format!("Deleted file {path}.")
        }
        Command::Pwd => fs.working_dir_path(session)?,
        Command::Tree => fs.tree().to_string(),
        Command::Ls(path) => fs
            .list_dir(session, path.as_deref())?
            .into_iter()
            .map(|e| match e.kind {
                FileType::Dir => format!("{}/", e.name),
                FileType::File => e.name,
            })
            .collect::<Vec<_>>()
            .join(" "),
        Command::Stat(path) => render_stat(&fs.stat(session, &path)?),
    };
    Ok(reply)
}

fn render_stat(inode: &Inode) -> String {
    format!(
        "{} {} ino={} size={} owner={} group={} blocks={} created={} accessed={} modified={}",
        inode.path,
        inode.kind,
        inode.ino,
        inode.size,
        inode.owner,
        inode.group,
        inode.blocks.len(),
        inode.created.to_rfc3339(),
        inode.accessed.to_rfc3339(),
        inode.modified.to_rfc3339(),
    )
}
