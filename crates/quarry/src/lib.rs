//! Public API facade for quarry, the persistent dependency database of a
//! forward-chaining build system.
//!
//! A build driver registers its concrete key and value types in a
//! [`Witness`], opens a [`Database`], then loops on [`Database::request`]:
//! the database answers with the keys to execute, the in-flight builds to
//! wait on, or the finished values. Completed executions are reported with
//! [`Database::finished`], which journals the result durably before waking
//! waiters. On [`Database::close`] the whole map is written back as a
//! snapshot and the journal is retired.
//!
//! The database decides *what* to execute and *when* a caller may proceed;
//! running recipes and scheduling threads belong to the host.

pub use quarry_db::{Barrier, Blocker, Database, DatabaseOptions, Response, Status};
pub use quarry_error::{QuarryError, Result};
pub use quarry_journal::{replay, Journal};
pub use quarry_types::{AnyKey, AnyValue, Info, Stored, Time, Trace, Witness};

pub use quarry_types::codec;
