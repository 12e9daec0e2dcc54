//! Criterion micro-benchmarks for the request traversal.
//!
//! Benchmarks:
//! - Memoized lookup of an already-built key
//! - First-run validation of a deep loaded dependency chain
//! - First-run validation of a wide single-group fan-out

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use quarry_db::{Database, DatabaseOptions, Response};
use quarry_error::Result;
use quarry_types::codec::{ByteReader, ByteWriter};
use quarry_types::witness::Stored;
use quarry_types::{AnyKey, AnyValue, Witness};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TargetKey(String);

impl Stored for TargetKey {
    const TAG: &'static str = "target";

    fn store(&self, out: &mut ByteWriter) {
        out.put_str(&self.0);
    }

    fn load(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self(r.get_str()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Digest(u64);

impl Stored for Digest {
    const TAG: &'static str = "digest";

    fn store(&self, out: &mut ByteWriter) {
        out.put_uvarint(self.0);
    }

    fn load(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self(r.get_uvarint()?))
    }
}

fn witness() -> Arc<Witness> {
    let mut w = Witness::new();
    w.register::<TargetKey>();
    w.register::<Digest>();
    Arc::new(w)
}

fn key(name: &str) -> AnyKey {
    AnyKey::new(TargetKey(name.to_owned()))
}

fn open(dir: &tempfile::TempDir) -> Database {
    Database::open(
        dir.path().join("build"),
        DatabaseOptions { user_version: 1 },
        witness(),
    )
    .unwrap()
}

fn run_all(db: &Database, keys: &[AnyKey], deps_of: impl Fn(&AnyKey) -> Vec<Vec<AnyKey>>) {
    loop {
        match db.request(|_, _| true, keys) {
            Response::Execute(todo) => {
                for k in todo {
                    let deps = deps_of(&k);
                    db.finished(&k, AnyValue::new(Digest(1)), deps, 0.0, vec![])
                        .unwrap();
                }
            }
            Response::Block(blocker) => blocker.wait(),
            Response::Ready(_) => return,
        }
    }
}

/// Benchmark: request a key that is already built this run.
fn bench_memoized_request(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    let target = [key("hot")];
    run_all(&db, &target, |_| vec![]);

    c.bench_function("request_memoized", |b| {
        b.iter(|| match db.request(|_, _| true, black_box(&target)) {
            Response::Ready(values) => values,
            _ => unreachable!("key is built"),
        });
    });
}

/// Benchmark: validate a 1000-deep loaded chain, then hit the memoized path.
fn bench_deep_chain_validation(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("build");
    const DEPTH: usize = 1000;

    let db = Database::open(&base, DatabaseOptions { user_version: 1 }, witness()).unwrap();
    // Bottom-up so every dependency exists when its dependent records it.
    for level in (0..DEPTH).rev() {
        let name = format!("n{level}");
        let deps = if level + 1 < DEPTH {
            vec![vec![key(&format!("n{}", level + 1))]]
        } else {
            vec![]
        };
        run_all(&db, &[key(&name)], |_| deps.clone());
    }
    db.close().unwrap();

    c.bench_function("request_deep_chain", |b| {
        b.iter_batched(
            || Database::open(&base, DatabaseOptions { user_version: 1 }, witness()).unwrap(),
            |db| match db.request(|_, _| true, black_box(&[key("n0")])) {
                Response::Ready(values) => values,
                _ => unreachable!("the loaded chain validates"),
            },
            BatchSize::PerIteration,
        );
    });
}

/// Benchmark: validate one key with a single 1000-wide dependency group.
fn bench_wide_group_validation(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("build");
    const WIDTH: usize = 1000;

    let db = Database::open(&base, DatabaseOptions { user_version: 1 }, witness()).unwrap();
    let leaves: Vec<AnyKey> = (0..WIDTH).map(|i| key(&format!("leaf{i}"))).collect();
    run_all(&db, &leaves, |_| vec![]);
    run_all(&db, &[key("root")], |_| vec![leaves.clone()]);
    db.close().unwrap();

    c.bench_function("request_wide_group", |b| {
        b.iter_batched(
            || Database::open(&base, DatabaseOptions { user_version: 1 }, witness()).unwrap(),
            |db| match db.request(|_, _| true, black_box(&[key("root")])) {
                Response::Ready(values) => values,
                _ => unreachable!("the loaded fan-out validates"),
            },
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(
    benches,
    bench_memoized_request,
    bench_deep_chain_validation,
    bench_wide_group_validation
);
criterion_main!(benches);
