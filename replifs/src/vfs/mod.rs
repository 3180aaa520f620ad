//! VFS layer (virtual filesystem)
//!
//! Responsibilities:
//! - Expose the namespace operations used by the transport: change directory,
//!   create directory, write, read, delete, list, stat and tree.
//! - Resolve every relative path against the caller's explicit session.
//! - Drive namespace mutations through transactions and delegate file bytes
//!   to the configured block backend.
//!
//! Submodules:
//! - `fs`: the `FileSystem` facade
//! - `session`: per-connection working directory
//! - `tree`: namespace snapshots rendered as text
pub mod fs;
pub mod session;
pub mod tree;

pub use fs::FileSystem;
pub use session::Session;
pub use tree::Tree;
