// Library crate for replifs: the namespace core, block backends and daemons,
// shared by the `replifs` binary and the integration tests.

pub mod cadapter;
pub mod config;
pub mod daemon;
pub mod error;
pub mod meta;
pub mod vfs;
