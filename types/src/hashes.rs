//! Hash prefixes, full hashes, and cached full-hash entries.

use std::collections::BTreeMap;
use std::fmt;

use crate::list::ThreatList;

/// Shortest prefix the service hands out.
pub const MIN_PREFIX_LEN: usize = 4;
/// A "prefix" of the full digest length is the full hash itself.
pub const MAX_PREFIX_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("hash prefix must be {MIN_PREFIX_LEN}..={MAX_PREFIX_LEN} bytes, got {0}")]
    BadPrefixLength(usize),
    #[error("full hash must be exactly 32 bytes, got {0}")]
    BadHashLength(usize),
}

/// A leading-bytes view of a SHA-256 full hash, 4 to 32 bytes. Ordering is
/// lexicographic byte order, the order the update protocol sorts tables in.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashPrefix(Vec<u8>);

impl HashPrefix {
    pub fn new(bytes: Vec<u8>) -> Result<Self, HashError> {
        if !(MIN_PREFIX_LEN..=MAX_PREFIX_LEN).contains(&bytes.len()) {
            return Err(HashError::BadPrefixLength(bytes.len()));
        }
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false: a prefix is at least [`MIN_PREFIX_LEN`] bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for HashPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashPrefix(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// The complete 32-byte SHA-256 of a canonical lookup expression. A match
/// at this level is the authoritative verdict.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FullHash([u8; 32]);

impl FullHash {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The leading `len` bytes as a [`HashPrefix`].
    pub fn prefix(&self, len: usize) -> Result<HashPrefix, HashError> {
        if !(MIN_PREFIX_LEN..=MAX_PREFIX_LEN).contains(&len) {
            return Err(HashError::BadPrefixLength(len));
        }
        Ok(HashPrefix(self.0[..len].to_vec()))
    }

    #[must_use]
    pub fn starts_with(&self, prefix: &HashPrefix) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl From<[u8; 32]> for FullHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for FullHash {
    type Error = HashError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HashError::BadHashLength(bytes.len()))?;
        Ok(Self(array))
    }
}

impl fmt::Debug for FullHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FullHash(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Opaque key/value pairs the service attaches to a confirmed hash.
pub type Metadata = BTreeMap<Vec<u8>, Vec<u8>>;

/// A confirmed full hash cached from a `fullHashes:find` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullHashEntry {
    pub hash: FullHash,
    pub list: ThreatList,
    pub metadata: Metadata,
    /// Unix seconds after which this confirmation must be re-fetched.
    pub expires_at: i64,
}

/// A local prefix hit: the stored prefix that matched, and the list it
/// belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PrefixMatch {
    pub prefix: HashPrefix,
    pub list: ThreatList,
}
