//! Sealrun: content-addressed blob storage and digest-gated task execution.
//!
//! Clients upload an algorithm and its inputs as blobs; a task later runs the
//! algorithm against the inputs in a throwaway workspace, but only after the
//! bytes in the workspace are shown to match the digests the requester
//! committed to.
//!
//! - [`store`]: blobs keyed by their SHA-256 digest
//! - [`runner`]: the typed task lifecycle (create, upload, verify, execute, destroy)
//! - [`pipeline`]: store → runner → store orchestration with deadlines

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod digest;
mod files;
pub mod logging;
pub mod pipeline;
pub mod runner;
pub mod store;
