//! Length-prefixed chunk framing over a byte stream.

use std::io::{self, Write};

/// Write one chunk (4-byte big-endian length, then the payload) and flush, so
/// the chunk is handed to the OS before the caller proceeds.
pub fn write_chunk<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "chunk exceeds u32 length"))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

/// Lazily iterate the chunks of a byte blob.
///
/// A truncated trailing chunk (incomplete length prefix or insufficient
/// payload) ends iteration silently; this is how a journal written up to the
/// moment of a crash still yields every complete record.
#[must_use]
pub fn chunks(blob: &[u8]) -> Chunks<'_> {
    Chunks { rest: blob }
}

#[derive(Debug)]
pub struct Chunks<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.rest.len() < 4 {
            return None;
        }
        let (len_bytes, rest) = self.rest.split_at(4);
        let len = u32::from_be_bytes(len_bytes.try_into().expect("4-byte slice"));
        let len = usize::try_from(len).expect("u32 fits usize");
        if rest.len() < len {
            return None;
        }
        let (chunk, rest) = rest.split_at(len);
        self.rest = rest;
        Some(chunk)
    }
}
