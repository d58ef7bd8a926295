use std::fmt::Display;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::catalog::FrameFormat;
use crate::header::{Scid, Vcid};

/// Reason a frame was flagged as bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum BadReason {
    /// Reed-Solomon decoding failed.
    RsError,
    /// Frame checksum did not match.
    CrcError,
    /// Virtual channel is not one of the configured valid channels.
    BadVcid,
    /// The frame header could not be decoded.
    BadHeader,
    BadPktPointer,
    TurboError,
    Unknown,
}

impl Display for BadReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BadReason::RsError => "RS_ERROR",
            BadReason::CrcError => "CRC_ERROR",
            BadReason::BadVcid => "BAD_VCID",
            BadReason::BadHeader => "BAD_HEADER",
            BadReason::BadPktPointer => "BAD_PKT_POINTER",
            BadReason::TurboError => "TURBO_ERROR",
            BadReason::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Metadata describing a single synchronized frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// Name of the matched frame format.
    pub name: String,
    pub format: Arc<FrameFormat>,
    pub spacecraft_id: Option<Scid>,
    pub vcid: Option<Vcid>,
    pub seq_count: u32,
    pub max_seq_count: u32,
    pub version: u8,
    /// Total CADU size, including ASM.
    pub size: usize,
    pub first_packet_pointer: u16,
    pub header_size: usize,
    pub data_area_size: usize,
    pub is_idle: bool,
    pub is_dead_code: bool,
    pub is_bad: bool,
    pub bad_reason: Option<BadReason>,
    pub header: Option<Vec<u8>>,
}

impl FrameRecord {
    /// New record for `format` with no header information.
    pub fn new(format: Arc<FrameFormat>) -> Self {
        FrameRecord {
            name: format.name.clone(),
            spacecraft_id: None,
            vcid: None,
            seq_count: 0,
            max_seq_count: 0,
            version: 0,
            size: format.cadu_size,
            first_packet_pointer: 0,
            header_size: format.header_size,
            data_area_size: format.data_area_size,
            is_idle: false,
            is_dead_code: false,
            is_bad: false,
            bad_reason: None,
            header: None,
            format,
        }
    }

    /// Flag this record bad for `reason`.
    pub fn mark_bad(&mut self, reason: BadReason) {
        self.is_bad = true;
        self.bad_reason = Some(reason);
    }

    /// Offset of the data area relative to the start of the CADU.
    #[must_use]
    pub fn data_area_offset(&self) -> usize {
        self.format.asm_len() + self.header_size
    }

    /// Number of frames missing between `last` and this record on the same virtual channel.
    #[must_use]
    pub fn missing_since(&self, last: &FrameRecord) -> u32 {
        missing_frames(self.seq_count, last.seq_count, self.max_seq_count)
    }
}

/// Compute the number of missing frames between sequence counts `last` and `cur` for a
/// counter that rolls over to 0 after `max`.
///
/// A repeated count is considered a full rollover, i.e., `max` missing frames.
#[must_use]
pub fn missing_frames(cur: u32, last: u32, max: u32) -> u32 {
    if cur == last {
        return max;
    }

    let expected = if last >= max { 0 } else { last + 1 };

    if cur == expected {
        0
    } else if cur < last {
        max - last + cur
    } else {
        cur - last - 1
    }
}
