//! Core domain types for sandbar.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies: threat-list identity, wildcard selectors, hash prefixes and
//! full hashes, cached full-hash entries, and update status codes.

mod hashes;
mod list;
mod status;

pub use hashes::{
    FullHash, FullHashEntry, HashError, HashPrefix, MAX_PREFIX_LEN, MIN_PREFIX_LEN, Metadata,
    PrefixMatch,
};
pub use list::{ListError, ListSelector, ThreatList};
pub use status::{UpdateStatus, UpdateTally};
