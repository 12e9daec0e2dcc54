//! The append-only journal of completed build results.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use quarry_error::{QuarryError, Result};
use quarry_types::codec::{ByteReader, ByteWriter};
use quarry_types::record;
use quarry_types::witness::{AnyKey, Witness};
use quarry_types::Info;
use tracing::debug;

use crate::{frame, stamp};

/// An open journal: the only write path for build results between snapshots.
///
/// Appends are serialized by the journal's own mutex. The file handle is
/// owned exclusively; [`Journal::close`] drops it and unlinks the file, after
/// which further appends are ignored (the snapshot written at close subsumes
/// every record).
pub struct Journal {
    path: PathBuf,
    witness: Arc<Witness>,
    file: Mutex<Option<BufWriter<File>>>,
}

impl Journal {
    /// Truncate-or-create the journal file and write its head: the version
    /// stamp and the witness table chunk.
    pub fn create(path: impl Into<PathBuf>, user_version: u32, witness: Arc<Witness>) -> Result<Self> {
        let path = path.into();
        let mut w = BufWriter::new(File::create(&path)?);
        w.write_all(&stamp::journal_stamp(user_version))?;
        let mut head = ByteWriter::new();
        witness.write_table(&mut head);
        frame::write_chunk(&mut w, &head.into_bytes())?;
        debug!(path = %path.display(), "journal opened");
        Ok(Self {
            path,
            witness,
            file: Mutex::new(Some(w)),
        })
    }

    /// Append one completed record as a single flushed chunk.
    ///
    /// A no-op once the journal has been closed.
    pub fn append(&self, key: &AnyKey, info: &Info) -> Result<()> {
        // Serialize outside the lock; only the chunk write is serialized.
        let mut body = ByteWriter::new();
        record::write_pair(&self.witness, &mut body, key, info)?;
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(w) = guard.as_mut() else {
            return Ok(());
        };
        frame::write_chunk(w, &body.into_bytes())?;
        Ok(())
    }

    /// Close the handle and unlink the file. Idempotent.
    pub fn close(&self) -> Result<()> {
        let taken = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut w) = taken else {
            return Ok(());
        };
        w.flush()?;
        drop(w);
        std::fs::remove_file(&self.path)?;
        debug!(path = %self.path.display(), "journal closed and unlinked");
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn journal_corruption(err: QuarryError, context: &str) -> QuarryError {
    match err {
        QuarryError::Decode { detail } => {
            QuarryError::corrupt_journal(format!("{context}: {detail}"))
        }
        other => other,
    }
}

/// Replay a journal left behind by an earlier run, inserting or overwriting
/// `Loaded` state in `map` for every complete record.
///
/// A torn tail chunk is dropped silently. Any other failure (wrong stamp,
/// unknown type tag, malformed chunk) returns an error with `map` untouched:
/// a broken journal is discarded wholesale rather than half-applied. Replay
/// is idempotent.
pub fn replay(
    path: &Path,
    user_version: u32,
    witness: &Witness,
    map: &mut HashMap<AnyKey, Info>,
) -> Result<usize> {
    let data = std::fs::read(path)?;
    let body = stamp::check_stamp(&data, &stamp::journal_stamp(user_version), path)?;

    let mut chunks = frame::chunks(body);
    let Some(head) = chunks.next() else {
        // Crash before the witness chunk landed: nothing to replay.
        debug!(path = %path.display(), "journal has no witness chunk, nothing to replay");
        return Ok(0);
    };
    let mut r = ByteReader::new(head);
    let table = witness
        .read_table(&mut r)
        .map_err(|err| journal_corruption(err, "witness table"))?;
    if !r.is_empty() {
        return Err(QuarryError::corrupt_journal(
            "trailing bytes after witness table",
        ));
    }

    // Parse everything before applying anything, so a corrupt record leaves
    // the caller's state exactly as loaded from the snapshot.
    let mut records = Vec::new();
    for chunk in chunks {
        let mut r = ByteReader::new(chunk);
        let pair = record::read_pair(&table, &mut r)
            .map_err(|err| journal_corruption(err, &format!("record {}", records.len())))?;
        if !r.is_empty() {
            return Err(QuarryError::corrupt_journal(format!(
                "record {}: {} unconsumed bytes in chunk",
                records.len(),
                r.remaining()
            )));
        }
        records.push(pair);
    }

    let count = records.len();
    for (key, info) in records {
        map.insert(key, info);
    }
    debug!(path = %path.display(), records = count, "journal replayed");
    Ok(count)
}
