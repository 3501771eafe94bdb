//! In-memory store: the reference semantics of the [`Store`] contract.

use std::collections::BTreeMap;

use sandbar_types::{
    FullHash, FullHashEntry, HashPrefix, MAX_PREFIX_LEN, MIN_PREFIX_LEN, PrefixMatch, ThreatList,
    UpdateTally,
};

use crate::store::{Store, StorageError, merge_prefix_table};

#[derive(Debug, Default, Clone)]
struct ListTable {
    state: String,
    prefixes: Vec<HashPrefix>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Schedule {
    last: i64,
    next: i64,
    errors: u32,
}

/// Non-persistent [`Store`] backend. Useful for tests and for embedders
/// that accept re-downloading the database on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: BTreeMap<ThreatList, ListTable>,
    cache: Vec<FullHashEntry>,
    schedule: Schedule,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Longest stored prefix of `hash` in a sorted table.
fn longest_match(prefixes: &[HashPrefix], hash: &FullHash) -> Option<HashPrefix> {
    for len in (MIN_PREFIX_LEN..=MAX_PREFIX_LEN).rev() {
        let Ok(candidate) = hash.prefix(len) else {
            continue;
        };
        if prefixes.binary_search(&candidate).is_ok() {
            return Some(candidate);
        }
    }
    None
}

impl Store for MemoryStore {
    fn apply_update(
        &mut self,
        list: &ThreatList,
        state: &str,
        additions: Vec<HashPrefix>,
        removals: &[usize],
        replace: bool,
    ) -> Result<Vec<HashPrefix>, StorageError> {
        let current = if replace {
            Vec::new()
        } else {
            self.tables.get(list).map(|t| t.prefixes.clone()).unwrap_or_default()
        };
        let merged = merge_prefix_table(current, additions, removals)?;
        self.tables.insert(
            list.clone(),
            ListTable {
                state: state.to_string(),
                prefixes: merged.clone(),
            },
        );
        Ok(merged)
    }

    fn reset(&mut self, list: &ThreatList) -> Result<(), StorageError> {
        self.tables.remove(list);
        Ok(())
    }

    fn state(&self, list: &ThreatList) -> Result<String, StorageError> {
        Ok(self.tables.get(list).map(|t| t.state.clone()).unwrap_or_default())
    }

    fn prefix_table(&self, list: &ThreatList) -> Result<Vec<HashPrefix>, StorageError> {
        Ok(self.tables.get(list).map(|t| t.prefixes.clone()).unwrap_or_default())
    }

    fn matching_prefixes(
        &self,
        hashes: &[FullHash],
        lists: &[ThreatList],
    ) -> Result<Vec<PrefixMatch>, StorageError> {
        let mut matches = Vec::new();
        for hash in hashes {
            for list in lists {
                let Some(table) = self.tables.get(list) else {
                    continue;
                };
                if let Some(prefix) = longest_match(&table.prefixes, hash) {
                    matches.push(PrefixMatch {
                        prefix,
                        list: list.clone(),
                    });
                }
            }
        }
        Ok(matches)
    }

    fn cache_full_hashes(
        &mut self,
        entries: &[FullHashEntry],
        now: i64,
    ) -> Result<(), StorageError> {
        self.cache.retain(|cached| {
            cached.expires_at > now
                && !entries
                    .iter()
                    .any(|e| e.hash == cached.hash && e.list == cached.list)
        });
        self.cache.extend(entries.iter().cloned());
        Ok(())
    }

    fn cached_full_hashes(
        &self,
        hash: &FullHash,
        lists: &[ThreatList],
        now: i64,
    ) -> Result<Vec<FullHashEntry>, StorageError> {
        Ok(self
            .cache
            .iter()
            .filter(|e| e.hash == *hash && e.expires_at > now && lists.contains(&e.list))
            .cloned()
            .collect())
    }

    fn next_update_time(&self) -> Result<i64, StorageError> {
        Ok(self.schedule.next)
    }

    fn record_update(&mut self, time: i64, next: i64) -> Result<(), StorageError> {
        self.schedule = Schedule {
            last: time,
            next,
            errors: 0,
        };
        Ok(())
    }

    fn record_update_error(
        &mut self,
        time: i64,
        next: i64,
        errors: u32,
    ) -> Result<(), StorageError> {
        self.schedule = Schedule {
            last: time,
            next,
            errors,
        };
        Ok(())
    }

    fn last_update(&self) -> Result<UpdateTally, StorageError> {
        Ok(UpdateTally {
            time: self.schedule.last,
            errors: self.schedule.errors,
        })
    }
}
