//! Core data model for the quarry build database.
//!
//! Defines the logical clock ([`Time`]), the per-key build record ([`Info`]),
//! profiling spans ([`Trace`]), the type-erased key/value handles and witness
//! table ([`witness`]), and the byte-level codec ([`codec`]) shared by the
//! snapshot and journal formats.

pub mod codec;
pub mod record;
pub mod witness;

pub use witness::{AnyKey, AnyValue, Stored, WireTable, Witness};

/// A monotonically increasing logical counter scoped to one database.
///
/// Not wall-clock. It advances once per open/close cycle (plus once more when
/// a journal was replayed at open) and exists solely to order "was dependency
/// D produced at or before this entry's validation time?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(i64);

impl Time {
    /// The epoch of a database that has never been opened.
    pub const ZERO: Self = Self(0);

    /// Wrap a raw logical tick (used when reading a snapshot).
    #[must_use]
    pub const fn new(tick: i64) -> Self {
        Self(tick)
    }

    /// The raw logical tick (used when writing a snapshot).
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// The next logical tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// One profiling span recorded during a key's most recent execution.
///
/// `start` and `stop` are wall-clock seconds relative to the host's chosen
/// origin; the database stores them verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub label: String,
    pub start: f64,
    pub stop: f64,
}

impl Trace {
    pub fn new(label: impl Into<String>, start: f64, stop: f64) -> Self {
        Self {
            label: label.into(),
            start,
            stop,
        }
    }
}

/// The per-key record: the value last produced for a build target plus the
/// dependency and timing metadata needed to decide whether it is still
/// current.
#[derive(Debug, Clone, PartialEq)]
pub struct Info {
    /// The last produced value.
    pub value: AnyValue,
    /// Logical time at which `value` was last validated as current. May be
    /// older than `real_time` when a rebuild produced an equal value.
    pub time: Time,
    /// Ordered dependency groups observed while producing `value`. Groups
    /// correspond to separate demand points; within a group, keys may be
    /// evaluated in parallel.
    pub depends: Vec<Vec<AnyKey>>,
    /// Logical time of the most recent actual execution.
    pub real_time: Time,
    /// Wall-clock seconds of the most recent execution.
    pub execution: f64,
    /// Profiling spans from the most recent execution.
    pub traces: Vec<Trace>,
}

impl Info {
    /// A record freshly produced at logical time `now`.
    pub fn built(
        value: AnyValue,
        now: Time,
        depends: Vec<Vec<AnyKey>>,
        execution: f64,
        traces: Vec<Trace>,
    ) -> Self {
        Self {
            value,
            time: now,
            depends,
            real_time: now,
            execution,
            traces,
        }
    }
}
