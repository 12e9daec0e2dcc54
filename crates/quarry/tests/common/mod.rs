//! Shared fixtures for the end-to-end tests: a string-named target key and a
//! digest value, plus a single-threaded build driver.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use quarry::codec::{ByteReader, ByteWriter};
use quarry::{
    AnyKey, AnyValue, Database, DatabaseOptions, Response, Result, Stored, Witness,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey(pub String);

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
pub struct Digest(pub u64);

impl Stored for Digest {
    const TAG: &'static str = "digest";

    fn store(&self, out: &mut ByteWriter) {
        out.put_uvarint(self.0);
    }

    fn load(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self(r.get_uvarint()?))
    }
}

pub fn witness() -> Arc<Witness> {
    let mut w = Witness::new();
    w.register::<TargetKey>();
    w.register::<Digest>();
    Arc::new(w)
}

pub fn key(name: &str) -> AnyKey {
    AnyKey::new(TargetKey(name.to_owned()))
}

pub fn value(digest: u64) -> AnyValue {
    AnyValue::new(Digest(digest))
}

pub fn open(base: &Path, user_version: u32) -> Database {
    Database::open(base, DatabaseOptions { user_version }, witness()).unwrap()
}

pub fn accept_all(_: &AnyKey, _: &AnyValue) -> bool {
    true
}

/// Drive a build to completion on the current thread, running demanded keys
/// with `run` (which returns the value and observed dependency groups).
pub fn build<R>(db: &Database, keys: &[AnyKey], mut run: R) -> Vec<AnyValue>
where
    R: FnMut(&AnyKey) -> (AnyValue, Vec<Vec<AnyKey>>),
{
    loop {
        match db.request(accept_all, keys) {
            Response::Execute(todo) => {
                for k in todo {
                    let (v, deps) = run(&k);
                    db.finished(&k, v, deps, 0.0, vec![]).unwrap();
                }
            }
            Response::Block(blocker) => blocker.wait(),
            Response::Ready(values) => return values,
        }
    }
}
