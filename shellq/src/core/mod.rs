//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (paths, descriptor text, exit codes) and return deterministic outputs
//! suitable for tests.

pub mod classifier;
pub mod descriptor;
pub mod selector;
pub mod state;
pub mod types;
