//! Directory-backed shell job queue.
//!
//! Jobs move through `queued/ -> running/ -> {success,failed,canceled}/` as
//! files on disk; the directory holding a job's script is its state. The
//! crate is split the usual way:
//!
//! - **[`core`]**: Pure logic (state names, lanes, ordering, descriptor codec,
//!   outcome classification). No I/O.
//! - **[`io`]**: Filesystem and process side effects (store, loader,
//!   producer, config, child execution).
//!
//! Orchestration modules ([`runner`], [`worker`], [`interrupt`]) tie the two
//! together; [`engine::Engine`] bundles the shared handles for `shellqd`.

pub mod active;
pub mod cancel;
pub mod client;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod interrupt;
pub mod io;
pub mod logging;
pub mod runner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod worker;
