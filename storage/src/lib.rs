//! Threat database storage.
//!
//! The update and lookup engines talk to storage through the [`Store`]
//! trait: per-list sorted prefix tables with their opaque server state, the
//! full-hash confirmation cache, and the process-wide update schedule. Two
//! backends ship here: [`MemoryStore`] for tests and ephemeral embedding,
//! and [`SqliteStore`] for durable single-file persistence.

mod memory;
mod sqlite;
mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{Store, StorageError, merge_prefix_table};
