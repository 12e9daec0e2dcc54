use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for quarry operations.
///
/// Structured variants for the cases callers dispatch on, with `detail`
/// strings carrying the underlying parse or I/O context for log output.
#[derive(Error, Debug)]
pub enum QuarryError {
    // === Persistent-file read errors (defensive: drop the file, go cold) ===
    /// A snapshot or journal carried the wrong version stamp.
    #[error("bad version stamp in '{path}': {detail}")]
    Version { path: PathBuf, detail: String },

    /// A serialized record names a type tag that is not registered in the
    /// witness table.
    #[error("unknown type tag '{tag}': not registered in the witness table")]
    Schema { tag: String },

    /// The database snapshot failed to deserialize.
    #[error("database snapshot is malformed: {detail}")]
    CorruptSnapshot { detail: String },

    /// A journal chunk failed to deserialize (other than a truncated tail,
    /// which is tolerated silently).
    #[error("journal is malformed: {detail}")]
    CorruptJournal { detail: String },

    /// Malformed bytes detected by the low-level record codec.
    #[error("malformed record: {detail}")]
    Decode { detail: String },

    // === Write errors (strict: lost durability must surface) ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Host contract violations ===
    /// The request/finished protocol was violated by the host, e.g.
    /// `finished` for a key that is not building.
    #[error("protocol violation: {detail}")]
    Protocol { detail: String },
}

impl QuarryError {
    /// Create a decode error.
    pub fn decode(detail: impl Into<String>) -> Self {
        Self::Decode {
            detail: detail.into(),
        }
    }

    /// Create a snapshot-corruption error.
    pub fn corrupt_snapshot(detail: impl Into<String>) -> Self {
        Self::CorruptSnapshot {
            detail: detail.into(),
        }
    }

    /// Create a journal-corruption error.
    pub fn corrupt_journal(detail: impl Into<String>) -> Self {
        Self::CorruptJournal {
            detail: detail.into(),
        }
    }

    /// Create a protocol-violation error.
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol {
            detail: detail.into(),
        }
    }

    /// Whether this error comes from reading a persistent file.
    ///
    /// A broken cache is never worse than no cache: callers respond to a
    /// defensive error by warning, discarding the file, and proceeding cold.
    /// Everything else (failed writes, protocol violations) must surface.
    #[must_use]
    pub const fn is_defensive(&self) -> bool {
        matches!(
            self,
            Self::Version { .. }
                | Self::Schema { .. }
                | Self::CorruptSnapshot { .. }
                | Self::CorruptJournal { .. }
                | Self::Decode { .. }
        )
    }
}

/// Result type alias using `QuarryError`.
pub type Result<T> = std::result::Result<T, QuarryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_version() {
        let err = QuarryError::Version {
            path: PathBuf::from("build.database"),
            detail: "expected SHAKE-DATABASE-1-3".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "bad version stamp in 'build.database': expected SHAKE-DATABASE-1-3"
        );
    }

    #[test]
    fn error_display_schema() {
        let err = QuarryError::Schema {
            tag: "file-rule".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "unknown type tag 'file-rule': not registered in the witness table"
        );
    }

    #[test]
    fn defensive_classification() {
        assert!(QuarryError::decode("short read").is_defensive());
        assert!(
            QuarryError::corrupt_journal("bad chunk").is_defensive(),
            "journal corruption is recovered by dropping the journal"
        );
        assert!(!QuarryError::protocol("double finished").is_defensive());
        assert!(
            !QuarryError::Io(std::io::Error::other("disk full")).is_defensive(),
            "failed writes must surface"
        );
    }
}
