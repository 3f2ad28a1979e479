//! Side-effecting parts of the engine.

pub mod config;
pub mod init;
pub mod loader;
pub mod process;
pub mod producer;
pub mod store;
