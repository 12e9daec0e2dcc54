//! Type erasure for heterogeneous keys and values, and the witness table that
//! lets them share one binary format.
//!
//! A build graph mixes many concrete key and value types, yet a single
//! snapshot or journal must serialize all of them. Each concrete type
//! registers once in a [`Witness`]: an ordered table of `(tag, decoder)`
//! entries. On write, the table itself is serialized first as the ordered list
//! of tags; every subsequent key or value is prefixed by its index into that
//! list. On read, the file's own tag list is resolved against the registered
//! table, so index assignment is free to differ between files and runs.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use quarry_error::{QuarryError, Result};

use crate::codec::{ByteReader, ByteWriter};

/// A concrete key or value type persisted through the witness table.
///
/// `TAG` must be unique across the process and stable across runs; it is what
/// ties a record on disk back to the registered decoder.
pub trait Stored: Any + fmt::Debug + Send + Sync {
    /// Stable identifier for this type in serialized witness tables.
    const TAG: &'static str;

    /// Append this value's wire form.
    fn store(&self, out: &mut ByteWriter);

    /// Parse the wire form written by [`Stored::store`].
    fn load(r: &mut ByteReader<'_>) -> Result<Self>
    where
        Self: Sized;
}

/// Object-safe view over a [`Stored`] type, carrying equality and hashing
/// across the erasure boundary.
trait DynStored: Any + fmt::Debug + Send + Sync {
    fn tag(&self) -> &'static str;
    fn dyn_eq(&self, other: &dyn DynStored) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn store(&self, out: &mut ByteWriter);
    fn as_any(&self) -> &dyn Any;
}

impl<T: Stored + Eq + Hash> DynStored for T {
    fn tag(&self) -> &'static str {
        T::TAG
    }

    fn dyn_eq(&self, other: &dyn DynStored) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|o| self == o)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        // Mix the concrete type in so equal bit patterns of different types
        // do not collide.
        TypeId::of::<T>().hash(&mut state);
        Hash::hash(self, &mut state);
    }

    fn store(&self, out: &mut ByteWriter) {
        Stored::store(self, out);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An erased build-target identity. Two keys are equal iff they are the same
/// concrete type and compare equal there.
#[derive(Clone)]
pub struct AnyKey(Arc<dyn DynStored>);

impl AnyKey {
    pub fn new<T: Stored + Eq + Hash>(key: T) -> Self {
        Self(Arc::new(key))
    }

    /// The registered tag of the underlying concrete type.
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        self.0.tag()
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }
}

impl PartialEq for AnyKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_ref())
    }
}

impl Eq for AnyKey {}

impl Hash for AnyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

impl fmt::Debug for AnyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An erased build result. Equality-comparable so a rebuild can detect "the
/// output did not change".
#[derive(Clone)]
pub struct AnyValue(Arc<dyn DynStored>);

impl AnyValue {
    pub fn new<T: Stored + Eq + Hash>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// The registered tag of the underlying concrete type.
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        self.0.tag()
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }
}

impl PartialEq for AnyValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_ref())
    }
}

impl Eq for AnyValue {}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type DecodeFn = fn(&mut ByteReader<'_>) -> Result<Arc<dyn DynStored>>;

fn decode_raw<T: Stored + Eq + Hash>(r: &mut ByteReader<'_>) -> Result<Arc<dyn DynStored>> {
    Ok(Arc::new(T::load(r)?))
}

struct WitnessEntry {
    tag: &'static str,
    decode: DecodeFn,
}

impl fmt::Debug for WitnessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WitnessEntry").field("tag", &self.tag).finish()
    }
}

/// Ordered registry of the concrete key/value types a database persists.
///
/// Registration happens once, before the database opens; the database holds
/// the table behind an `Arc`, so it is immutable for the lifetime of every
/// file written against it.
#[derive(Debug, Default)]
pub struct Witness {
    entries: Vec<WitnessEntry>,
    by_tag: HashMap<&'static str, usize>,
}

impl Witness {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concrete type. Panics on a duplicate tag: two types sharing
    /// one tag is a host configuration bug that would corrupt every file
    /// written afterwards.
    pub fn register<T: Stored + Eq + Hash>(&mut self) {
        assert!(
            !self.by_tag.contains_key(T::TAG),
            "witness tag {:?} registered twice",
            T::TAG
        );
        self.by_tag.insert(T::TAG, self.entries.len());
        self.entries.push(WitnessEntry {
            tag: T::TAG,
            decode: decode_raw::<T>,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the table head: the ordered list of registered tags.
    pub fn write_table(&self, w: &mut ByteWriter) {
        w.put_len(self.entries.len());
        for entry in &self.entries {
            w.put_str(entry.tag);
        }
    }

    /// Parse a table head written by [`Witness::write_table`] (possibly by an
    /// earlier run with different registration order) and resolve every tag
    /// against this registry. An unregistered tag is a schema mismatch and
    /// fails the whole file.
    pub fn read_table(&self, r: &mut ByteReader<'_>) -> Result<WireTable<'_>> {
        let count = r.get_len()?;
        let mut entries = Vec::new();
        for _ in 0..count {
            let tag = r.get_str()?;
            let index = self
                .by_tag
                .get(tag.as_str())
                .ok_or(QuarryError::Schema { tag })?;
            entries.push(&self.entries[*index]);
        }
        Ok(WireTable { entries })
    }

    /// Write one key: witness index, then the type's own bytes.
    pub fn put_key(&self, w: &mut ByteWriter, key: &AnyKey) -> Result<()> {
        self.put_obj(w, key.0.as_ref())
    }

    /// Write one value: witness index, then the type's own bytes.
    pub fn put_value(&self, w: &mut ByteWriter, value: &AnyValue) -> Result<()> {
        self.put_obj(w, value.0.as_ref())
    }

    fn put_obj(&self, w: &mut ByteWriter, obj: &dyn DynStored) -> Result<()> {
        let index = self.by_tag.get(obj.tag()).ok_or_else(|| QuarryError::Schema {
            tag: obj.tag().to_owned(),
        })?;
        w.put_len(*index);
        obj.store(w);
        Ok(())
    }
}

/// A file's witness table resolved against the process registry: maps the
/// indices found on the wire back to decoders.
#[derive(Debug)]
pub struct WireTable<'w> {
    entries: Vec<&'w WitnessEntry>,
}

impl WireTable<'_> {
    pub fn get_key(&self, r: &mut ByteReader<'_>) -> Result<AnyKey> {
        Ok(AnyKey(self.get_obj(r)?))
    }

    pub fn get_value(&self, r: &mut ByteReader<'_>) -> Result<AnyValue> {
        Ok(AnyValue(self.get_obj(r)?))
    }

    fn get_obj(&self, r: &mut ByteReader<'_>) -> Result<Arc<dyn DynStored>> {
        let index = r.get_len()?;
        let entry = self.entries.get(index).ok_or_else(|| {
            QuarryError::decode(format!(
                "witness index {index} out of range: file declares {} types",
                self.entries.len()
            ))
        })?;
        (entry.decode)(r)
    }
}
