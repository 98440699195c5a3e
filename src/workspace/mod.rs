//! Source tree access for the repair engine.
//!
//! Every path the engine touches is relative to one source tree root and is
//! resolved through [`SourceTree::resolve`], which refuses absolute paths and
//! `..` traversal. Writes go through [`write_atomic`] so a concurrent reader
//! never observes a partially written file.

mod scanner;
mod tree;

// Re-exports
pub use scanner::{list_sources, search_sources, SearchHit, MAX_SEARCH_MATCHES};
pub use tree::{write_atomic, SourceTree};
