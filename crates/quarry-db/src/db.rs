//! The persistent dependency database: in-memory status map, the
//! request/finished protocol, and the open/close lifecycle tying together
//! snapshot and journal.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_error::{QuarryError, Result};
use quarry_journal::{replay, Journal};
use quarry_types::witness::{AnyKey, AnyValue, Witness};
use quarry_types::{Info, Time, Trace};
use tracing::{debug, warn};

use crate::barrier::Barrier;
use crate::snapshot;

/// Host-supplied options consumed at open.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseOptions {
    /// Bumped by the host whenever its recipe semantics change; a mismatch
    /// fails every existing file's version stamp and forces a cold rebuild.
    pub user_version: u32,
}

/// The in-memory state of one key during a run.
#[derive(Debug)]
pub enum Status {
    /// Read from disk, not yet revalidated this run.
    Loaded(Info),
    /// Currently being computed; waiters block on the barrier. The prior
    /// loaded record, if any, is kept so an unchanged result can retain its
    /// old validation time.
    Building(Arc<Barrier>, Option<Info>),
    /// Computed or revalidated this run; terminal for this run.
    Built(Info),
}

impl Status {
    /// The record a snapshot keeps for this entry, if any. An in-flight build
    /// that never loaded prior state has nothing worth persisting.
    #[must_use]
    pub fn snapshot_info(&self) -> Option<&Info> {
        match self {
            Self::Loaded(info) | Self::Built(info) => Some(info),
            Self::Building(_, prior) => prior.as_ref(),
        }
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Loaded(_) => "loaded",
            Self::Building(..) => "building",
            Self::Built(_) => "built",
        }
    }
}

/// What a caller must do next after [`Database::request`].
#[derive(Debug)]
pub enum Response {
    /// Run each key (in any order, possibly concurrently) and report each via
    /// [`Database::finished`] before requesting again.
    Execute(Vec<AnyKey>),
    /// Some dependency is being built by another caller; wait, then request
    /// again.
    Block(Blocker),
    /// Every requested key resolved; values in request order.
    Ready(Vec<AnyValue>),
}

/// The live barriers a blocked request may wait on, captured so the wait
/// happens outside the status-map lock.
#[derive(Debug)]
pub struct Blocker {
    barriers: Vec<Arc<Barrier>>,
}

impl Blocker {
    /// Block until at least one of the builds in flight completes.
    pub fn wait(&self) {
        Barrier::wait_any(&self.barriers);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }
}

/// Accumulated "cannot answer yet" state of a traversal: keys the caller must
/// execute plus barriers it may wait on.
#[derive(Debug, Default)]
struct Pending {
    execute: Vec<AnyKey>,
    barriers: Vec<Arc<Barrier>>,
}

impl Pending {
    fn execute(key: AnyKey) -> Self {
        Self {
            execute: vec![key],
            barriers: Vec::new(),
        }
    }

    fn block(barrier: Arc<Barrier>) -> Self {
        Self {
            execute: Vec::new(),
            barriers: vec![barrier],
        }
    }

    fn merge(&mut self, other: Self) {
        self.execute.extend(other.execute);
        self.barriers.extend(other.barriers);
    }

    fn is_empty(&self) -> bool {
        self.execute.is_empty() && self.barriers.is_empty()
    }
}

/// Result of resolving one key under the lock.
enum Outcome {
    /// A value is available, produced/validated at the given logical time.
    Ready(Time, AnyValue),
    Pending(Pending),
}

/// First examination of a key: either it resolves on the spot (possibly
/// transitioning to `Building`), or its loaded record must have its
/// dependency history validated.
enum Step {
    Resolved(Outcome),
    Validate(Info),
}

/// One in-progress history validation on the explicit traversal stack.
struct ValidationFrame {
    key: AnyKey,
    info: Info,
    /// Index of the dependency group being checked.
    group: usize,
    /// Index of the next unexamined key within that group.
    member: usize,
    /// Latest logical time seen among the group's resolved dependencies.
    group_max: Time,
    /// Execute/block demands collected from the group so far.
    pending: Pending,
}

impl ValidationFrame {
    fn new(key: AnyKey, info: Info) -> Self {
        Self {
            key,
            info,
            group: 0,
            member: 0,
            group_max: Time::ZERO,
            pending: Pending::default(),
        }
    }
}

/// The persistent dependency database.
///
/// A passive object shared by parallel caller threads: it decides what to
/// execute and when a caller may proceed, but performs no scheduling of its
/// own. The status map sits behind a single mutex; `request` and `finished`
/// each take it exactly once and do no I/O while holding it.
pub struct Database {
    state: Mutex<HashMap<AnyKey, Status>>,
    /// Fixed for the whole run at open.
    timestamp: Time,
    journal: Journal,
    witness: Arc<Witness>,
    snapshot_path: PathBuf,
    user_version: u32,
}

fn sibling(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

impl Database {
    /// Open (or create) the database rooted at `base`.
    ///
    /// Reads `<base>.database`, replays and deletes any residual
    /// `<base>.journal` left by a crashed run (rewriting the snapshot so the
    /// recovered state is durable before the journal disappears), then opens
    /// a fresh journal. Unreadable files are discarded with a warning; a
    /// broken cache is never worse than no cache.
    pub fn open(base: impl AsRef<Path>, options: DatabaseOptions, witness: Arc<Witness>) -> Result<Self> {
        let base = base.as_ref();
        let snapshot_path = sibling(base, ".database");
        let journal_path = sibling(base, ".journal");

        let (snap_time, mut loaded) =
            match snapshot::read(&snapshot_path, options.user_version, &witness) {
                Ok(state) => state,
                Err(QuarryError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %snapshot_path.display(), "no snapshot, starting cold");
                    (Time::ZERO, HashMap::new())
                }
                Err(err) => {
                    warn!(
                        path = %snapshot_path.display(),
                        error = %err,
                        "discarding unreadable snapshot"
                    );
                    (Time::ZERO, HashMap::new())
                }
            };
        let mut timestamp = snap_time.next();

        if journal_path.exists() {
            match replay(&journal_path, options.user_version, &witness, &mut loaded) {
                Ok(records) => {
                    debug!(path = %journal_path.display(), records, "recovered journal")
                }
                Err(err) => warn!(
                    path = %journal_path.display(),
                    error = %err,
                    "discarding unreadable journal"
                ),
            }
            std::fs::remove_file(&journal_path)?;
            snapshot::write(
                &snapshot_path,
                options.user_version,
                &witness,
                timestamp,
                loaded.iter(),
            )?;
            // The rewritten snapshot occupies the current tick.
            timestamp = timestamp.next();
        }

        let journal = Journal::create(&journal_path, options.user_version, Arc::clone(&witness))?;
        let state = loaded
            .into_iter()
            .map(|(key, info)| (key, Status::Loaded(info)))
            .collect();
        Ok(Self {
            state: Mutex::new(state),
            timestamp,
            journal,
            witness,
            snapshot_path,
            user_version: options.user_version,
        })
    }

    /// The logical time of this run.
    #[must_use]
    pub fn timestamp(&self) -> Time {
        self.timestamp
    }

    /// The current record for `key`, if it has one (for profiling reports and
    /// tests; not part of the build protocol).
    #[must_use]
    pub fn info(&self, key: &AnyKey) -> Option<Info> {
        self.state.lock().get(key).and_then(|status| status.snapshot_info().cloned())
    }

    /// Ask what is needed to produce `keys`.
    ///
    /// `valid_stored` lets the host veto a loaded value (e.g. the file on
    /// disk no longer matches its stamp); it is consulted once per loaded
    /// entry per run. The traversal holds the status-map mutex throughout and
    /// touches no I/O. `Execute` takes precedence over `Block`, which takes
    /// precedence over `Ready`.
    pub fn request<F>(&self, mut valid_stored: F, keys: &[AnyKey]) -> Response
    where
        F: FnMut(&AnyKey, &AnyValue) -> bool,
    {
        let mut pending = Pending::default();
        let mut values = Vec::with_capacity(keys.len());
        {
            let mut map = self.state.lock();
            for key in keys {
                match resolve(&mut map, &mut valid_stored, key) {
                    Outcome::Ready(_, value) => values.push(value),
                    Outcome::Pending(p) => pending.merge(p),
                }
            }
        }
        if !pending.execute.is_empty() {
            Response::Execute(pending.execute)
        } else if !pending.barriers.is_empty() {
            Response::Block(Blocker {
                barriers: pending.barriers,
            })
        } else {
            Response::Ready(values)
        }
    }

    /// Report a completed execution of `key`.
    ///
    /// The key must be in `Building` state (exactly one `finished` per
    /// `Execute`); anything else is a host bug. If the prior loaded record
    /// held an equal value, the new record keeps the old validation time so
    /// downstream dependents stay valid.
    ///
    /// On success the journal entry is flushed before the barrier releases,
    /// so a waiter that observes `Built` can rely on the record being on
    /// disk. If the append fails, the barrier is still released (waiters must
    /// not hang on a surfaced write error) and the error is returned; a
    /// waiter may by then observe a `Built` record that never reached the
    /// journal, so the host has to treat the failure as fatal for the run
    /// rather than retry around it.
    pub fn finished(
        &self,
        key: &AnyKey,
        value: AnyValue,
        depends: Vec<Vec<AnyKey>>,
        execution: f64,
        traces: Vec<Trace>,
    ) -> Result<()> {
        let (barrier, info) = {
            let mut map = self.state.lock();
            let (barrier, prior) = match map.get(key) {
                Some(Status::Building(barrier, prior)) => (Arc::clone(barrier), prior.clone()),
                other => {
                    let state = other.map_or("absent", Status::name);
                    return Err(QuarryError::protocol(format!(
                        "finished called for {key:?} which is {state}, not building"
                    )));
                }
            };
            let mut info = Info::built(value, self.timestamp, depends, execution, traces);
            if let Some(prior) = prior {
                if prior.value == info.value {
                    info.time = prior.time;
                }
            }
            map.insert(key.clone(), Status::Built(info.clone()));
            (barrier, info)
        };
        let appended = self.journal.append(key, &info);
        barrier.release();
        appended
    }

    /// Write the snapshot from the live map and retire the journal.
    ///
    /// Write failures propagate; lost durability must surface.
    pub fn close(self) -> Result<()> {
        let map = self.state.into_inner();
        let entries = map
            .iter()
            .filter_map(|(key, status)| status.snapshot_info().map(|info| (key, info)));
        snapshot::write(
            &self.snapshot_path,
            self.user_version,
            &self.witness,
            self.timestamp,
            entries,
        )?;
        self.journal.close()
    }
}

/// Examine `key` once, transitioning it if its fate is decidable on the spot.
fn step<F>(map: &mut HashMap<AnyKey, Status>, valid_stored: &mut F, key: &AnyKey) -> Step
where
    F: FnMut(&AnyKey, &AnyValue) -> bool,
{
    enum Peek {
        Absent,
        Building(Arc<Barrier>),
        Built(Time, AnyValue),
        Loaded(Info),
    }

    let peek = match map.get(key) {
        None => Peek::Absent,
        Some(Status::Building(barrier, _)) => Peek::Building(Arc::clone(barrier)),
        Some(Status::Built(info)) => Peek::Built(info.time, info.value.clone()),
        Some(Status::Loaded(info)) => Peek::Loaded(info.clone()),
    };

    match peek {
        Peek::Absent => {
            map.insert(
                key.clone(),
                Status::Building(Arc::new(Barrier::new()), None),
            );
            Step::Resolved(Outcome::Pending(Pending::execute(key.clone())))
        }
        Peek::Building(barrier) => Step::Resolved(Outcome::Pending(Pending::block(barrier))),
        Peek::Built(time, value) => Step::Resolved(Outcome::Ready(time, value)),
        Peek::Loaded(info) => {
            if valid_stored(key, &info.value) {
                Step::Validate(info)
            } else {
                debug!(key = ?key, "stored value rejected by host, rebuilding");
                map.insert(
                    key.clone(),
                    Status::Building(Arc::new(Barrier::new()), Some(info)),
                );
                Step::Resolved(Outcome::Pending(Pending::execute(key.clone())))
            }
        }
    }
}

/// Resolve one requested key, validating loaded dependency history as needed.
///
/// An explicit frame stack rather than recursion, so arbitrarily deep
/// dependency chains cannot exhaust the thread stack while the status-map
/// lock is held. Dependency groups are checked in their original demand
/// order: a group that demands execution or blocking propagates immediately
/// and later groups are not consulted, mirroring the fact that a rebuilt
/// recipe might never request them.
fn resolve<F>(map: &mut HashMap<AnyKey, Status>, valid_stored: &mut F, key: &AnyKey) -> Outcome
where
    F: FnMut(&AnyKey, &AnyValue) -> bool,
{
    let mut stack: Vec<ValidationFrame> = Vec::new();
    let mut current = key.clone();
    loop {
        let mut outcome = match step(map, valid_stored, &current) {
            Step::Resolved(outcome) => Some(outcome),
            Step::Validate(info) => {
                stack.push(ValidationFrame::new(current.clone(), info));
                None
            }
        };

        // Feed results upward until some frame demands a fresh key.
        loop {
            let Some(frame) = stack.last_mut() else {
                return outcome.expect("empty stack implies a finished outcome");
            };

            if let Some(result) = outcome.take() {
                match result {
                    Outcome::Ready(time, _) => frame.group_max = frame.group_max.max(time),
                    Outcome::Pending(p) => frame.pending.merge(p),
                }
            }

            if frame.group == frame.info.depends.len() {
                // Every group checked out: the entry is valid as loaded.
                let frame = stack.pop().expect("frame just observed");
                let time = frame.info.time;
                let value = frame.info.value.clone();
                map.insert(frame.key, Status::Built(frame.info));
                outcome = Some(Outcome::Ready(time, value));
                continue;
            }

            if frame.member < frame.info.depends[frame.group].len() {
                current = frame.info.depends[frame.group][frame.member].clone();
                frame.member += 1;
                break;
            }

            // The whole group has been examined.
            if !frame.pending.is_empty() {
                let frame = stack.pop().expect("frame just observed");
                outcome = Some(Outcome::Pending(frame.pending));
                continue;
            }
            if frame.group_max > frame.info.time {
                // A dependency was re-produced after this entry was last
                // validated; its output may have changed.
                let frame = stack.pop().expect("frame just observed");
                debug!(key = ?frame.key, "dependency newer than entry, rebuilding");
                let pending = Pending::execute(frame.key.clone());
                map.insert(
                    frame.key,
                    Status::Building(Arc::new(Barrier::new()), Some(frame.info)),
                );
                outcome = Some(Outcome::Pending(pending));
                continue;
            }
            frame.group += 1;
            frame.member = 0;
            frame.group_max = Time::ZERO;
        }
    }
}
