//! Wire form of a `(key, info)` record.
//!
//! The same encoding is used by journal chunks and by snapshot entries. Field
//! order follows [`Info`]: value, validation time, dependency groups, real
//! time, execution seconds, traces.

use quarry_error::Result;

use crate::codec::{ByteReader, ByteWriter};
use crate::witness::{AnyKey, WireTable, Witness};
use crate::{Info, Time, Trace};

pub fn write_pair(witness: &Witness, w: &mut ByteWriter, key: &AnyKey, info: &Info) -> Result<()> {
    witness.put_key(w, key)?;
    write_info(witness, w, info)
}

pub fn write_info(witness: &Witness, w: &mut ByteWriter, info: &Info) -> Result<()> {
    witness.put_value(w, &info.value)?;
    w.put_i64_be(info.time.get());
    w.put_len(info.depends.len());
    for group in &info.depends {
        w.put_len(group.len());
        for key in group {
            witness.put_key(w, key)?;
        }
    }
    w.put_i64_be(info.real_time.get());
    w.put_f64_be(info.execution);
    w.put_len(info.traces.len());
    for trace in &info.traces {
        w.put_str(&trace.label);
        w.put_f64_be(trace.start);
        w.put_f64_be(trace.stop);
    }
    Ok(())
}

pub fn read_pair(table: &WireTable<'_>, r: &mut ByteReader<'_>) -> Result<(AnyKey, Info)> {
    let key = table.get_key(r)?;
    let info = read_info(table, r)?;
    Ok((key, info))
}

pub fn read_info(table: &WireTable<'_>, r: &mut ByteReader<'_>) -> Result<Info> {
    let value = table.get_value(r)?;
    let time = Time::new(r.get_i64_be()?);
    let group_count = r.get_len()?;
    let mut depends = Vec::new();
    for _ in 0..group_count {
        let key_count = r.get_len()?;
        let mut group = Vec::new();
        for _ in 0..key_count {
            group.push(table.get_key(r)?);
        }
        depends.push(group);
    }
    let real_time = Time::new(r.get_i64_be()?);
    let execution = r.get_f64_be()?;
    let trace_count = r.get_len()?;
    let mut traces = Vec::new();
    for _ in 0..trace_count {
        let label = r.get_str()?;
        let start = r.get_f64_be()?;
        let stop = r.get_f64_be()?;
        traces.push(Trace { label, start, stop });
    }
    Ok(Info {
        value,
        time,
        depends,
        real_time,
        execution,
        traces,
    })
}
