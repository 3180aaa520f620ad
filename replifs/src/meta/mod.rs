//! Namespace metadata
//!
//! Responsibilities:
//! - Model inodes, directory blocks and file block handles.
//! - Keep the block, inode and path stores mutually consistent under
//!   concurrent access.
//! - Provide transactional multi-step mutation with compensating rollback.
//!
//! Submodules:
//! - `inode`: inode records and path helpers
//! - `block`: directory blocks, file blocks and content splitting
//! - `index`: the three coupled stores, path resolution and tree walks
//! - `txn`: transactions and the transaction manager
pub mod block;
pub mod index;
pub mod inode;
pub mod txn;
