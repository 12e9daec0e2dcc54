//! The persistent dependency database at the heart of a forward-chaining
//! build system.
//!
//! Records, for every build target, the value last produced for it, the
//! dependencies observed while producing it, and timing metadata; coordinates
//! concurrent rebuild requests so every key is built at most once per run;
//! and persists the metadata durably via a crash-tolerant journal plus a
//! snapshot written on clean shutdown.

pub mod barrier;
pub mod snapshot;

mod db;

pub use barrier::Barrier;
pub use db::{Blocker, Database, DatabaseOptions, Response, Status};
