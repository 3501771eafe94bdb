//! SQLite-backed store.
//!
//! One database file holds the per-list prefix tables, the full-hash
//! cache, and the update schedule. Every mutating call runs inside a
//! transaction, which is what makes `apply_update` crash-atomic: either
//! the previous table and state survive, or the new pair is fully visible.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use sandbar_types::{
    FullHash, FullHashEntry, HashPrefix, Metadata, PrefixMatch, ThreatList, UpdateTally,
};

use crate::store::{Store, StorageError, merge_prefix_table};

/// Durable [`Store`] backend over a single SQLite database.
pub struct SqliteStore {
    db: Connection,
}

impl SqliteStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS lists (
            id INTEGER PRIMARY KEY,
            threat_type TEXT NOT NULL,
            platform_type TEXT NOT NULL,
            threat_entry_type TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT '',
            UNIQUE (threat_type, platform_type, threat_entry_type)
        );

        CREATE TABLE IF NOT EXISTS prefixes (
            list_id INTEGER NOT NULL,
            prefix BLOB NOT NULL,
            PRIMARY KEY (list_id, prefix),
            FOREIGN KEY (list_id) REFERENCES lists(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS full_hashes (
            id INTEGER PRIMARY KEY,
            hash BLOB NOT NULL,
            threat_type TEXT NOT NULL,
            platform_type TEXT NOT NULL,
            threat_entry_type TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            UNIQUE (hash, threat_type, platform_type, threat_entry_type)
        );

        CREATE TABLE IF NOT EXISTS full_hash_metadata (
            hash_id INTEGER NOT NULL,
            key BLOB NOT NULL,
            value BLOB NOT NULL,
            FOREIGN KEY (hash_id) REFERENCES full_hashes(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS schedule (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_update INTEGER NOT NULL DEFAULT 0,
            next_update INTEGER NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0
        );
        INSERT OR IGNORE INTO schedule (id, last_update, next_update, errors)
        VALUES (1, 0, 0, 0);

        CREATE INDEX IF NOT EXISTS idx_full_hashes_hash
        ON full_hashes(hash);
    ";

    /// Open or create the threat database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Corrupt(format!("create {}: {e}", parent.display())))?;
        }
        let db = Connection::open(path)?;
        debug!(path = %path.display(), "opened threat database");
        Self::initialize(db)
    }

    /// Open a private in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(db: Connection) -> Result<Self, StorageError> {
        db.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )?;
        db.execute_batch(Self::SCHEMA)?;
        Ok(Self { db })
    }

    fn list_id(&self, list: &ThreatList) -> Result<Option<i64>, StorageError> {
        let id = self
            .db
            .query_row(
                "SELECT id FROM lists
                 WHERE threat_type = ?1 AND platform_type = ?2 AND threat_entry_type = ?3",
                params![
                    list.threat_type(),
                    list.platform_type(),
                    list.threat_entry_type()
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn load_table(&self, list_id: i64) -> Result<Vec<HashPrefix>, StorageError> {
        let mut stmt = self
            .db
            .prepare("SELECT prefix FROM prefixes WHERE list_id = ?1 ORDER BY prefix")?;
        let rows = stmt.query_map(params![list_id], |row| row.get::<_, Vec<u8>>(0))?;
        let mut table = Vec::new();
        for row in rows {
            table.push(HashPrefix::new(row?).map_err(|e| StorageError::Corrupt(e.to_string()))?);
        }
        Ok(table)
    }

    fn metadata(&self, hash_id: i64) -> Result<Metadata, StorageError> {
        let mut stmt = self
            .db
            .prepare("SELECT key, value FROM full_hash_metadata WHERE hash_id = ?1")?;
        let rows = stmt.query_map(params![hash_id], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut metadata = Metadata::new();
        for row in rows {
            let (key, value) = row?;
            metadata.insert(key, value);
        }
        Ok(metadata)
    }
}

impl Store for SqliteStore {
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
            match self.list_id(list)? {
                Some(id) => self.load_table(id)?,
                None => Vec::new(),
            }
        };
        let merged = merge_prefix_table(current, additions, removals)?;

        let tx = self.db.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO lists (threat_type, platform_type, threat_entry_type)
             VALUES (?1, ?2, ?3)",
            params![
                list.threat_type(),
                list.platform_type(),
                list.threat_entry_type()
            ],
        )?;
        let id: i64 = tx.query_row(
            "SELECT id FROM lists
             WHERE threat_type = ?1 AND platform_type = ?2 AND threat_entry_type = ?3",
            params![
                list.threat_type(),
                list.platform_type(),
                list.threat_entry_type()
            ],
            |row| row.get(0),
        )?;
        tx.execute("UPDATE lists SET state = ?1 WHERE id = ?2", params![state, id])?;
        tx.execute("DELETE FROM prefixes WHERE list_id = ?1", params![id])?;
        {
            let mut insert =
                tx.prepare("INSERT INTO prefixes (list_id, prefix) VALUES (?1, ?2)")?;
            for prefix in &merged {
                insert.execute(params![id, prefix.as_bytes()])?;
            }
        }
        tx.commit()?;
        Ok(merged)
    }

    fn reset(&mut self, list: &ThreatList) -> Result<(), StorageError> {
        self.db.execute(
            "DELETE FROM lists
             WHERE threat_type = ?1 AND platform_type = ?2 AND threat_entry_type = ?3",
            params![
                list.threat_type(),
                list.platform_type(),
                list.threat_entry_type()
            ],
        )?;
        Ok(())
    }

    fn state(&self, list: &ThreatList) -> Result<String, StorageError> {
        let state = self
            .db
            .query_row(
                "SELECT state FROM lists
                 WHERE threat_type = ?1 AND platform_type = ?2 AND threat_entry_type = ?3",
                params![
                    list.threat_type(),
                    list.platform_type(),
                    list.threat_entry_type()
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state.unwrap_or_default())
    }

    fn prefix_table(&self, list: &ThreatList) -> Result<Vec<HashPrefix>, StorageError> {
        match self.list_id(list)? {
            Some(id) => self.load_table(id),
            None => Ok(Vec::new()),
        }
    }

    fn matching_prefixes(
        &self,
        hashes: &[FullHash],
        lists: &[ThreatList],
    ) -> Result<Vec<PrefixMatch>, StorageError> {
        let mut lengths_stmt = self.db.prepare(
            "SELECT DISTINCT length(prefix) FROM prefixes WHERE list_id = ?1 ORDER BY 1 DESC",
        )?;
        let mut probe =
            self.db
                .prepare("SELECT 1 FROM prefixes WHERE list_id = ?1 AND prefix = ?2")?;

        let mut matches = Vec::new();
        for hash in hashes {
            for list in lists {
                let Some(id) = self.list_id(list)? else {
                    continue;
                };
                let lengths: Vec<i64> = lengths_stmt
                    .query_map(params![id], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                for &len in &lengths {
                    let Ok(candidate) = hash.prefix(len as usize) else {
                        continue;
                    };
                    if probe.exists(params![id, candidate.as_bytes()])? {
                        matches.push(PrefixMatch {
                            prefix: candidate,
                            list: list.clone(),
                        });
                        break;
                    }
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
        let tx = self.db.transaction()?;
        tx.execute("DELETE FROM full_hashes WHERE expires_at <= ?1", params![now])?;
        {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO full_hashes
                 (hash, threat_type, platform_type, threat_entry_type, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut insert_meta = tx.prepare(
                "INSERT INTO full_hash_metadata (hash_id, key, value) VALUES (?1, ?2, ?3)",
            )?;
            for entry in entries {
                insert.execute(params![
                    entry.hash.as_bytes().as_slice(),
                    entry.list.threat_type(),
                    entry.list.platform_type(),
                    entry.list.threat_entry_type(),
                    entry.expires_at,
                ])?;
                let hash_id = tx.last_insert_rowid();
                for (key, value) in &entry.metadata {
                    insert_meta.execute(params![hash_id, key, value])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn cached_full_hashes(
        &self,
        hash: &FullHash,
        lists: &[ThreatList],
        now: i64,
    ) -> Result<Vec<FullHashEntry>, StorageError> {
        let mut stmt = self.db.prepare(
            "SELECT id, threat_type, platform_type, threat_entry_type, expires_at
             FROM full_hashes WHERE hash = ?1 AND expires_at > ?2",
        )?;
        let rows = stmt.query_map(params![hash.as_bytes().as_slice(), now], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, threat, platform, entry_type, expires_at) = row?;
            let list = ThreatList::new(&threat, &platform, &entry_type)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
            if !lists.contains(&list) {
                continue;
            }
            entries.push(FullHashEntry {
                hash: *hash,
                list,
                metadata: self.metadata(id)?,
                expires_at,
            });
        }
        Ok(entries)
    }

    fn next_update_time(&self) -> Result<i64, StorageError> {
        Ok(self
            .db
            .query_row("SELECT next_update FROM schedule WHERE id = 1", [], |row| {
                row.get(0)
            })?)
    }

    fn record_update(&mut self, time: i64, next: i64) -> Result<(), StorageError> {
        self.db.execute(
            "UPDATE schedule SET last_update = ?1, next_update = ?2, errors = 0 WHERE id = 1",
            params![time, next],
        )?;
        Ok(())
    }

    fn record_update_error(
        &mut self,
        time: i64,
        next: i64,
        errors: u32,
    ) -> Result<(), StorageError> {
        self.db.execute(
            "UPDATE schedule SET last_update = ?1, next_update = ?2, errors = ?3 WHERE id = 1",
            params![time, next, errors],
        )?;
        Ok(())
    }

    fn last_update(&self) -> Result<UpdateTally, StorageError> {
        let (time, errors) = self.db.query_row(
            "SELECT last_update, errors FROM schedule WHERE id = 1",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, u32>(1)?)),
        )?;
        Ok(UpdateTally { time, errors })
    }
}
