//! Daemon processes
//!
//! Responsibilities:
//! - Run the namespace server: one task and one session per client
//!   connection, speaking a newline-delimited text protocol.
//! - Run block worker nodes that persist blocks for the dual-replica backend.
//!
//! Submodules:
//! - `command`: text command parsing
//! - `server`: namespace server accept loop and command execution
//! - `worker`: block worker accept loop
pub mod command;
pub mod server;
pub mod worker;
