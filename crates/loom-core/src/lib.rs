//! Loom core library: incremental structural indexing and ranked retrieval
//! over source repositories.
//!
//! The indexer splits files into content-hashed chunks, extracts per-file
//! structure (exports, imports, docstrings, sections, internals), resolves a
//! repository-local import graph and mines git history for change frequency
//! and co-change coupling. The query layer ranks files against `|`-separated
//! terms using those signals. [`engine::Engine`] is the entry point.

pub mod config;
pub mod engine;
pub mod errors;
pub mod indexer;
pub mod models;
pub mod query;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use engine::Engine;
pub use errors::{LoomError, LoomResult};
