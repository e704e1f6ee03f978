// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The wire format for describing a histogram across an IPC boundary,
//! before any samples are shared: name, shape, and flags, so the
//! receiving side can look up or create the equivalent local histogram
//! through its own [`crate::registry::StatisticsRegistry`].
//!
//! Mirrors `histogram.cc`'s `SerializeInfoImpl`/`DeserializeInfoImpl`:
//! the receiving side always clears [`Flag::IpcSerializationSource`],
//! since that bit only ever means "this description just arrived over
//! the wire" and must not propagate past the process that received it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::flags::{Flag, Flags};
use crate::histogram::{ConstructionArgs, Histogram, HistogramType};
use crate::sample::Sample;

fn type_tag(kind: HistogramType) -> u32 {
    match kind {
        HistogramType::Exponential => 0,
        HistogramType::Linear => 1,
        HistogramType::Boolean => 2,
        HistogramType::Custom => 3,
        HistogramType::Sparse => 4,
        HistogramType::Dummy => 5,
    }
}

fn type_from_tag(tag: u32) -> Result<HistogramType, Error> {
    match tag {
        0 => Ok(HistogramType::Exponential),
        1 => Ok(HistogramType::Linear),
        2 => Ok(HistogramType::Boolean),
        3 => Ok(HistogramType::Custom),
        4 => Ok(HistogramType::Sparse),
        5 => Ok(HistogramType::Dummy),
        _ => Err(Error::MalformedWireRecord),
    }
}

/// A histogram description decoded off the wire: enough to identify or
/// construct the equivalent local histogram, but no sample data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickledHistogram {
    pub name: String,
    pub construction_args: ConstructionArgs,
    pub flags: u32,
    pub ranges_checksum: u32,
}

/// Serializes `histogram`'s name, shape, and flags (not its samples) for
/// transport to another process.
pub fn serialize_info(histogram: &Histogram) -> Bytes {
    let args = histogram.construction_args();
    let mut buf = BytesMut::with_capacity(32 + histogram.name().len());

    buf.put_u32(type_tag(args.kind));
    buf.put_u32(histogram.flags().bits());
    buf.put_u32(histogram.name().len() as u32);
    buf.put_slice(histogram.name().as_bytes());
    buf.put_i32(args.min);
    buf.put_i32(args.max);
    buf.put_u32(args.bucket_count as u32);
    buf.put_u32(histogram.ranges().map(|r| r.checksum()).unwrap_or(0));

    if let Some(boundaries) = &args.custom_boundaries {
        buf.put_u32(boundaries.len() as u32);
        for value in boundaries {
            buf.put_i32(*value);
        }
    }

    buf.freeze()
}

/// Parses a description written by [`serialize_info`], unconditionally
/// clearing [`Flag::IpcSerializationSource`] from the decoded flags.
pub fn deserialize_info(mut bytes: impl Buf) -> Result<PickledHistogram, Error> {
    if bytes.remaining() < 20 {
        return Err(Error::MalformedWireRecord);
    }
    let tag = bytes.get_u32();
    let kind = type_from_tag(tag)?;
    let flags = Flags::from_bits(bytes.get_u32());
    flags.clear(Flag::IpcSerializationSource);

    let name_len = bytes.get_u32() as usize;
    if bytes.remaining() < name_len {
        return Err(Error::MalformedWireRecord);
    }
    let mut name_bytes = vec![0u8; name_len];
    bytes.copy_to_slice(&mut name_bytes);
    let name = String::from_utf8(name_bytes).map_err(|_| Error::MalformedWireRecord)?;

    if bytes.remaining() < 16 {
        return Err(Error::MalformedWireRecord);
    }
    let min: Sample = bytes.get_i32();
    let max: Sample = bytes.get_i32();
    let bucket_count = bytes.get_u32() as usize;
    let ranges_checksum = bytes.get_u32();

    let construction_args = match kind {
        HistogramType::Custom => {
            if bytes.remaining() < 4 {
                return Err(Error::MalformedWireRecord);
            }
            let boundary_count = bytes.get_u32() as usize;
            if bytes.remaining() < boundary_count * 4 {
                return Err(Error::MalformedWireRecord);
            }
            let mut boundaries = Vec::with_capacity(boundary_count);
            for _ in 0..boundary_count {
                boundaries.push(bytes.get_i32());
            }
            ConstructionArgs::custom(boundaries)
        }
        HistogramType::Sparse => ConstructionArgs::sparse(),
        HistogramType::Dummy => ConstructionArgs::dummy(),
        _ => ConstructionArgs::bucketed(kind, min, max, bucket_count),
    };

    Ok(PickledHistogram { name, construction_args, flags: flags.bits(), ranges_checksum })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ScopedRegistry;

    #[test]
    fn round_trips_a_bucketed_histogram_description() {
        let _guard = ScopedRegistry::new();
        let histogram = crate::histogram::exponential::get("Latency", 1, 100, 10);
        histogram.flags().set(Flag::UmaTargeted);
        histogram.flags().set(Flag::IpcSerializationSource);

        let wire = serialize_info(&histogram);
        let decoded = deserialize_info(wire).unwrap();

        assert_eq!(decoded.name, "Latency");
        assert_eq!(decoded.construction_args.kind, HistogramType::Exponential);
        assert_eq!(decoded.construction_args.min, 1);
        assert_eq!(decoded.construction_args.max, 100);
        assert_eq!(decoded.construction_args.bucket_count, 10);
        assert_eq!(decoded.ranges_checksum, histogram.ranges().unwrap().checksum());
        assert!(Flags::from_bits(decoded.flags).has(Flag::UmaTargeted));
        assert!(!Flags::from_bits(decoded.flags).has(Flag::IpcSerializationSource));
    }

    #[test]
    fn round_trips_a_sparse_histogram_description() {
        let _guard = ScopedRegistry::new();
        let histogram = crate::histogram::sparse::get("Errors");

        let wire = serialize_info(&histogram);
        let decoded = deserialize_info(wire).unwrap();

        assert_eq!(decoded.name, "Errors");
        assert_eq!(decoded.construction_args.kind, HistogramType::Sparse);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = Bytes::from_static(&[0, 0, 0, 0]);
        assert_eq!(deserialize_info(bytes), Err(Error::MalformedWireRecord));
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(99);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_i32(0);
        buf.put_i32(0);
        buf.put_u32(0);
        buf.put_u32(0);
        assert_eq!(deserialize_info(buf.freeze()), Err(Error::MalformedWireRecord));
    }
}
