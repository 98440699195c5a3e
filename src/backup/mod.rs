//! Reversible backup layer.
//!
//! Every mutation of a source file is preceded by a snapshot of its on-disk
//! bytes. History is append-only: restoring writes a new record instead of
//! discarding later ones.

mod store;

pub use store::{BackupRecord, BackupStore, RecordKind};
