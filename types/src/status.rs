//! Update outcome codes and the persisted update schedule.

use std::fmt;

/// Outcome of one `update()` run. The numeric codes are part of the public
/// surface and stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum UpdateStatus {
    /// A checksum mismatch forced at least one list back to empty.
    DatabaseReset = -6,
    /// The client could not even form a request (e.g. no lists resolved).
    InternalError = -3,
    /// Transport or protocol failure talking to the service.
    ServerError = -2,
    /// The update window has not opened yet.
    NoUpdate = -1,
    /// The service answered but no list received additions.
    NoData = 0,
    Successful = 1,
}

impl UpdateStatus {
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Severity rank used to combine per-list outcomes into one run status.
    #[must_use]
    pub(crate) fn severity(self) -> u8 {
        match self {
            Self::NoUpdate | Self::InternalError => 0,
            Self::NoData => 1,
            Self::Successful => 2,
            Self::ServerError => 3,
            Self::DatabaseReset => 4,
        }
    }

    /// The more severe of two statuses.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() { other } else { self }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DatabaseReset => "database reset",
            Self::InternalError => "internal error",
            Self::ServerError => "server error",
            Self::NoUpdate => "no update",
            Self::NoData => "no data",
            Self::Successful => "successful",
        };
        f.write_str(name)
    }
}

/// Persisted schedule state: when the last update attempt ran and how many
/// consecutive attempts have failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateTally {
    /// Unix seconds of the last recorded attempt; 0 when never attempted.
    pub time: i64,
    /// Consecutive failed attempts; reset to 0 on success.
    pub errors: u32,
}
