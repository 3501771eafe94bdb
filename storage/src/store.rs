//! The storage contract consumed by the update and lookup engines.

use sandbar_types::{FullHash, FullHashEntry, HashPrefix, PrefixMatch, ThreatList, UpdateTally};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("removal index {index} out of range for a table of {len} prefixes")]
    RemovalIndexOutOfRange { index: usize, len: usize },
    #[error("stored row is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Persistence contract for the threat database.
///
/// All timestamps are unix seconds supplied by the caller; a store never
/// reads the wall clock. Writes must be atomic per call: after a crash
/// either the previous table and state are intact or the new pair is fully
/// visible.
pub trait Store {
    /// Apply one list update and return the resulting sorted table.
    ///
    /// With `replace` the table starts from empty (FULL_UPDATE semantics);
    /// otherwise `removals` index into the current sorted table, then
    /// `additions` are merged, sorted, and deduplicated. The opaque server
    /// `state` is persisted alongside the table.
    fn apply_update(
        &mut self,
        list: &ThreatList,
        state: &str,
        additions: Vec<HashPrefix>,
        removals: &[usize],
        replace: bool,
    ) -> Result<Vec<HashPrefix>, StorageError>;

    /// Drop the table and state for `list`.
    fn reset(&mut self, list: &ThreatList) -> Result<(), StorageError>;

    /// The opaque server state for `list`; empty string when absent.
    fn state(&self, list: &ThreatList) -> Result<String, StorageError>;

    /// The current sorted prefix table for `list`.
    fn prefix_table(&self, list: &ThreatList) -> Result<Vec<HashPrefix>, StorageError>;

    /// For each (hash, list) pair, the longest stored prefix that is a
    /// byte-prefix of the hash, if any.
    fn matching_prefixes(
        &self,
        hashes: &[FullHash],
        lists: &[ThreatList],
    ) -> Result<Vec<PrefixMatch>, StorageError>;

    /// Merge confirmed full hashes into the cache and prune entries already
    /// expired at `now`. An entry replaces any previous one for the same
    /// (hash, list).
    fn cache_full_hashes(
        &mut self,
        entries: &[FullHashEntry],
        now: i64,
    ) -> Result<(), StorageError>;

    /// Unexpired cached entries for `hash` in any of `lists`.
    fn cached_full_hashes(
        &self,
        hash: &FullHash,
        lists: &[ThreatList],
        now: i64,
    ) -> Result<Vec<FullHashEntry>, StorageError>;

    /// Unix seconds before which `update()` must not run; 0 when never
    /// scheduled.
    fn next_update_time(&self) -> Result<i64, StorageError>;

    /// Record a successful update at `time` with the next window at `next`;
    /// resets the consecutive error counter.
    fn record_update(&mut self, time: i64, next: i64) -> Result<(), StorageError>;

    /// Record a failed update at `time`: `errors` consecutive failures,
    /// next attempt no sooner than `next`.
    fn record_update_error(
        &mut self,
        time: i64,
        next: i64,
        errors: u32,
    ) -> Result<(), StorageError>;

    /// The current schedule state.
    fn last_update(&self) -> Result<UpdateTally, StorageError>;
}

/// Shared table-merge semantics for both backends: removals index into the
/// sorted pre-removal table, then additions merge in, then the result is
/// sorted and deduplicated.
pub fn merge_prefix_table(
    mut table: Vec<HashPrefix>,
    additions: Vec<HashPrefix>,
    removals: &[usize],
) -> Result<Vec<HashPrefix>, StorageError> {
    if !removals.is_empty() {
        let len = table.len();
        let mut ordered = removals.to_vec();
        ordered.sort_unstable();
        ordered.dedup();
        for &index in ordered.iter().rev() {
            if index >= len {
                return Err(StorageError::RemovalIndexOutOfRange { index, len });
            }
            table.remove(index);
        }
    }
    table.extend(additions);
    table.sort_unstable();
    table.dedup();
    Ok(table)
}
