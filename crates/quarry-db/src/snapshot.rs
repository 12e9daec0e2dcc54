//! The database snapshot: a whole-map serialization written at close (and
//! after a journal replay at open).
//!
//! Layout:
//! ```text
//! [ASCII stamp: SHAKE-DATABASE-1-<user_version>\r\n]
//! [i64 BE: logical time of the writing run]
//! [witness table: ordered tag list]
//! [varint: record count]
//! [(key, info) records]
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use quarry_error::{QuarryError, Result};
use quarry_journal::stamp;
use quarry_types::codec::{ByteReader, ByteWriter};
use quarry_types::record;
use quarry_types::witness::{AnyKey, Witness};
use quarry_types::{Info, Time};

/// Serialize `entries` at logical time `time` and write the file in one shot.
pub fn write<'a>(
    path: &Path,
    user_version: u32,
    witness: &Witness,
    time: Time,
    entries: impl IntoIterator<Item = (&'a AnyKey, &'a Info)>,
) -> Result<()> {
    let entries: Vec<_> = entries.into_iter().collect();
    let mut body = ByteWriter::new();
    body.put_i64_be(time.get());
    witness.write_table(&mut body);
    body.put_len(entries.len());
    for (key, info) in entries {
        record::write_pair(witness, &mut body, key, info)?;
    }

    let mut file = File::create(path)?;
    file.write_all(&stamp::database_stamp(user_version))?;
    file.write_all(&body.into_bytes())?;
    file.flush()?;
    Ok(())
}

fn snapshot_corruption(err: QuarryError) -> QuarryError {
    match err {
        QuarryError::Decode { detail } => QuarryError::corrupt_snapshot(detail),
        other => other,
    }
}

/// Read a snapshot back as the logical time of the writing run plus the map
/// of loaded records.
///
/// All failures are reported as errors; the caller decides to proceed cold
/// (reads are defensive).
pub fn read(
    path: &Path,
    user_version: u32,
    witness: &Witness,
) -> Result<(Time, HashMap<AnyKey, Info>)> {
    let data = std::fs::read(path)?;
    let body = stamp::check_stamp(&data, &stamp::database_stamp(user_version), path)?;

    let mut r = ByteReader::new(body);
    let time = Time::new(r.get_i64_be().map_err(snapshot_corruption)?);
    let table = witness.read_table(&mut r).map_err(snapshot_corruption)?;
    let count = r.get_len().map_err(snapshot_corruption)?;
    let mut map = HashMap::new();
    for _ in 0..count {
        let (key, info) = record::read_pair(&table, &mut r).map_err(snapshot_corruption)?;
        map.insert(key, info);
    }
    if !r.is_empty() {
        return Err(QuarryError::corrupt_snapshot(format!(
            "{} bytes of trailing garbage",
            r.remaining()
        )));
    }
    Ok((time, map))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quarry_types::codec::{ByteReader, ByteWriter};
    use quarry_types::witness::Stored;
    use quarry_types::AnyValue;

    use super::*;

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

    fn info(digest: u64, time: i64) -> Info {
        Info {
            value: AnyValue::new(Digest(digest)),
            time: Time::new(time),
            depends: vec![vec![key("dep")]],
            real_time: Time::new(time),
            execution: 0.5,
            traces: vec![],
        }
    }

    #[test]
    fn roundtrip_preserves_time_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.database");
        let witness = witness();

        let mut map = HashMap::new();
        map.insert(key("a"), info(1, 3));
        map.insert(key("b"), info(2, 5));
        write(&path, 7, &witness, Time::new(9), map.iter()).unwrap();

        let (time, got) = read(&path, 7, &witness).unwrap();
        assert_eq!(time, Time::new(9));
        assert_eq!(got, map);
    }

    #[test]
    fn empty_map_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.database");
        let witness = witness();
        write(&path, 1, &witness, Time::new(1), std::iter::empty()).unwrap();
        let (time, got) = read(&path, 1, &witness).unwrap();
        assert_eq!(time, Time::new(1));
        assert!(got.is_empty());
    }

    #[test]
    fn version_bump_rejects_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.database");
        let witness = witness();
        write(&path, 3, &witness, Time::new(1), std::iter::empty()).unwrap();
        let err = read(&path, 4, &witness).unwrap_err();
        assert!(matches!(err, QuarryError::Version { .. }));
    }

    #[test]
    fn truncated_snapshot_is_corrupt_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.database");
        let witness = witness();
        let mut map = HashMap::new();
        map.insert(key("a"), info(1, 1));
        write(&path, 1, &witness, Time::new(2), map.iter()).unwrap();

        let full = std::fs::read(&path).unwrap();
        let stamp_len = stamp::database_stamp(1).len();
        for cut in stamp_len..full.len() {
            std::fs::write(&path, &full[..cut]).unwrap();
            let err = read(&path, 1, &witness).unwrap_err();
            assert!(
                matches!(err, QuarryError::CorruptSnapshot { .. }),
                "cut at {cut}: got {err}"
            );
        }
    }

    #[test]
    fn trailing_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.database");
        let witness = witness();
        write(&path, 1, &witness, Time::new(1), std::iter::empty()).unwrap();
        let mut data = std::fs::read(&path).unwrap();
        data.push(0);
        std::fs::write(&path, &data).unwrap();
        let err = read(&path, 1, &witness).unwrap_err();
        assert!(matches!(err, QuarryError::CorruptSnapshot { .. }));
    }

    #[test]
    fn unknown_tag_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.database");
        let witness = witness();
        let mut map = HashMap::new();
        map.insert(key("a"), info(1, 1));
        write(&path, 1, &witness, Time::new(2), map.iter()).unwrap();

        let mut partial = Witness::new();
        partial.register::<TargetKey>();
        let err = read(&path, 1, &partial).unwrap_err();
        assert!(matches!(err, QuarryError::Schema { .. }));
    }

    #[test]
    fn missing_file_surfaces_as_io_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.database");
        let err = read(&path, 1, &witness()).unwrap_err();
        match err {
            QuarryError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::NotFound),
            other => panic!("expected Io, got {other}"),
        }
    }
}
