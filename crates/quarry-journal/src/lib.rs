//! Crash-tolerant persistence primitives: length-prefixed chunk framing,
//! version stamps, and the append-only journal of completed build results.
//!
//! The journal's layout is:
//! ```text
//! [ASCII stamp: SHAKE-JOURNAL-1-<user_version>\r\n   (not framed)]
//! [Chunk 0: serialized witness table]
//! [Chunk 1: (key, info) record]
//! [Chunk 2: (key, info) record]
//! ...
//! ```
//! Every chunk is a 4-byte big-endian length followed by that many payload
//! bytes, and every append flushes, so a crash leaves a complete prefix of
//! records plus at most one torn tail chunk, which readers drop silently.

pub mod frame;
pub mod stamp;

mod journal;

pub use journal::{replay, Journal};
