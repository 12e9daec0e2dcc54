//! ASCII version stamps at the head of persistent files.
//!
//! The stamp bakes in both the on-disk format revision and the host's
//! `user_version`; bumping either makes every existing file fail the exact
//! prefix match and forces a cold rebuild.

use std::path::Path;

use quarry_error::{QuarryError, Result};

/// Stamp at the head of a journal file.
#[must_use]
pub fn journal_stamp(user_version: u32) -> Vec<u8> {
    format!("SHAKE-JOURNAL-1-{user_version}\r\n").into_bytes()
}

/// Stamp at the head of a database snapshot.
#[must_use]
pub fn database_stamp(user_version: u32) -> Vec<u8> {
    format!("SHAKE-DATABASE-1-{user_version}\r\n").into_bytes()
}

/// Require `data` to begin with exactly `expected`, returning the remainder.
pub fn check_stamp<'a>(data: &'a [u8], expected: &[u8], path: &Path) -> Result<&'a [u8]> {
    if data.len() < expected.len() || &data[..expected.len()] != expected {
        return Err(QuarryError::Version {
            path: path.to_owned(),
            detail: format!(
                "expected {}",
                String::from_utf8_lossy(expected).trim_end()
            ),
        });
    }
    Ok(&data[expected.len()..])
}
