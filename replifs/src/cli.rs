use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "replifs", version, about = "Replicated in-memory file system")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the namespace server
    Serve(ServeArgs),
    /// Start a block worker node
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// YAML config file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listening address
    #[arg(long, env = "REPLIFS_ADDR")]
    pub addr: Option<String>,

    /// Comma separated worker addresses; selects the dual-replica backend
    #[arg(long, env = "BLOCK_HOSTS", conflicts_with = "etcd_endpoints")]
    pub hosts: Option<String>,

    /// Comma separated etcd endpoints; selects the consensus backend
    #[arg(long, env = "REPLIFS_ETCD_ENDPOINTS")]
    pub etcd_endpoints: Option<String>,

    /// Owner of newly created entries
    #[arg(long, env = "REPLIFS_OWNER")]
    pub owner: Option<String>,

    /// Group of newly created entries
    #[arg(long, env = "REPLIFS_GROUP")]
    pub group: Option<String>,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Listening address
    #[arg(long, env = "REPLIFS_WORKER_ADDR", default_value = "127.0.0.1:9000")]
    pub addr: String,

    /// Block storage directory
    #[arg(long, env = "REPLIFS_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,
}
