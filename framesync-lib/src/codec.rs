//! Compact binary encoding of [FrameRecord]s for transport between processes.
//!
//! Records are encoded as MessagePack maps with camel-case field names inside a versioned
//! envelope, i.e., the schema version is the `v` field of the same map. Absent optional
//! values are encoded as nil.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::FrameFormat;
use crate::prelude::*;
use crate::record::{BadReason, FrameRecord};

/// Schema version written by [encode].
pub const SCHEMA_VERSION: u8 = 1;

#[derive(Deserialize)]
struct Envelope {
    v: u8,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    v: u8,
    spacecraft_id: Option<i32>,
    name: String,
    vcid: Option<i32>,
    format: FrameFormat,
    seq_count: i32,
    max_seq_count: i32,
    version: i32,
    size: i32,
    first_packet_pointer: i32,
    header_size: i32,
    data_area_size: i32,
    is_frame_idle: bool,
    is_dead_code: bool,
    is_frame_bad: bool,
    bad_reason: Option<BadReason>,
    #[serde(with = "serde_bytes")]
    header: Option<Vec<u8>>,
}

fn to_i32<T: TryInto<i32> + Copy + std::fmt::Display>(field: &str, value: T) -> Result<i32> {
    value
        .try_into()
        .map_err(|_| Error::Codec(format!("{field} value {value} does not fit in int32")))
}

fn from_i32<T: TryFrom<i32>>(field: &str, value: i32) -> Result<T> {
    T::try_from(value).map_err(|_| Error::Codec(format!("invalid {field} value {value}")))
}

/// Encode `record` using the current schema version.
///
/// # Errors
/// [Error::Codec] if a value cannot be represented.
pub fn encode(record: &FrameRecord) -> Result<Vec<u8>> {
    let wire = WireRecord {
        v: SCHEMA_VERSION,
        spacecraft_id: record.spacecraft_id.map(i32::from),
        name: record.name.clone(),
        vcid: record.vcid.map(i32::from),
        format: FrameFormat::clone(&record.format),
        seq_count: to_i32("seqCount", record.seq_count)?,
        max_seq_count: to_i32("maxSeqCount", record.max_seq_count)?,
        version: i32::from(record.version),
        size: to_i32("size", record.size)?,
        first_packet_pointer: i32::from(record.first_packet_pointer),
        header_size: to_i32("headerSize", record.header_size)?,
        data_area_size: to_i32("dataAreaSize", record.data_area_size)?,
        is_frame_idle: record.is_idle,
        is_dead_code: record.is_dead_code,
        is_frame_bad: record.is_bad,
        bad_reason: record.bad_reason,
        header: record.header.clone(),
    };
    rmp_serde::to_vec_named(&wire).map_err(|err| Error::Codec(err.to_string()))
}

/// Decode a record produced by [encode].
///
/// # Errors
/// [Error::UnsupportedVersion] if the schema version is not known, otherwise
/// [Error::Codec] if `buf` is not a valid record.
pub fn decode(buf: &[u8]) -> Result<FrameRecord> {
    let envelope: Envelope =
        rmp_serde::from_slice(buf).map_err(|err| Error::Codec(err.to_string()))?;
    if envelope.v != SCHEMA_VERSION {
        return Err(Error::UnsupportedVersion(envelope.v));
    }
    let wire: WireRecord =
        rmp_serde::from_slice(buf).map_err(|err| Error::Codec(err.to_string()))?;

    Ok(FrameRecord {
        name: wire.name,
        format: Arc::new(wire.format),
        spacecraft_id: wire
            .spacecraft_id
            .map(|x| from_i32("spacecraftId", x))
            .transpose()?,
        vcid: wire.vcid.map(|x| from_i32("vcid", x)).transpose()?,
        seq_count: from_i32("seqCount", wire.seq_count)?,
        max_seq_count: from_i32("maxSeqCount", wire.max_seq_count)?,
        version: from_i32("version", wire.version)?,
        size: from_i32("size", wire.size)?,
        first_packet_pointer: from_i32("firstPacketPointer", wire.first_packet_pointer)?,
        header_size: from_i32("headerSize", wire.header_size)?,
        data_area_size: from_i32("dataAreaSize", wire.data_area_size)?,
        is_idle: wire.is_frame_idle,
        is_dead_code: wire.is_dead_code,
        is_bad: wire.is_frame_bad,
        bad_reason: wire.bad_reason,
        header: wire.header,
    })
}

/// Decode `buf`, logging and dropping it if it is not a valid record.
pub fn decode_or_log(buf: &[u8]) -> Option<FrameRecord> {
    match decode(buf) {
        Ok(rec) => Some(rec),
        Err(err) => {
            warn!(len = buf.len(), "dropping undecodable frame record: {err}");
            None
        }
    }
}
