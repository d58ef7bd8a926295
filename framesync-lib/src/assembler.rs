//! Frame record construction and validation.
use std::sync::Arc;

use tracing::trace;

use crate::catalog::FrameFormat;
use crate::checksum::ChecksumCalculator;
use crate::config::SyncConfig;
use crate::header::HeaderParser;
use crate::record::{BadReason, FrameRecord};

/// Builds a [FrameRecord] from the bytes of a confirmed CADU.
///
/// Validation runs in this order, after the header is decoded:
/// 1. dead-code fill at the start of the frame header
/// 2. idle flag from the header
/// 3. checksum, if the format has error control and checking is enabled
/// 4. VCID, only for frames that are neither idle, dead-code, nor already bad
///
/// A header that cannot be decoded produces a bad record with [BadReason::BadHeader]
/// and no further validation.
pub struct FrameAssembler<'a> {
    config: &'a SyncConfig,
}

impl<'a> FrameAssembler<'a> {
    pub fn new(config: &'a SyncConfig) -> Self {
        FrameAssembler { config }
    }

    /// `cadu` contains exactly one frame starting with its ASM.
    pub fn assemble(
        &self,
        format: &Arc<FrameFormat>,
        parser: &dyn HeaderParser,
        checksum: Option<&dyn ChecksumCalculator>,
        cadu: &[u8],
    ) -> FrameRecord {
        let mut rec = FrameRecord::new(Arc::clone(format));
        let asm_len = format.asm_len();
        let body = cadu.get(asm_len..).unwrap_or_default();

        let Some(header) = parser.parse(body) else {
            trace!(format = %format.name, "cannot decode header");
            rec.mark_bad(BadReason::BadHeader);
            return rec;
        };

        rec.spacecraft_id = Some(header.scid);
        rec.vcid = Some(header.vcid);
        rec.seq_count = header.seq_count;
        rec.max_seq_count = header.max_seq_count;
        rec.version = header.version;
        rec.first_packet_pointer = header.data_pointer;
        rec.header = Some(header.bytes);

        rec.is_dead_code = parser.is_dead_code(body);
        rec.is_idle = header.idle;

        if format.has_error_control && self.config.checksum_check {
            if let Some(calc) = checksum {
                let len = format.header_size + format.data_area_size;
                let computed = calc.calculate(cadu, asm_len, len);
                let expected = calc.expected(cadu, format.checksum_offset());
                if computed.is_none() || computed != expected {
                    trace!(format = %format.name, ?computed, ?expected, "checksum mismatch");
                    rec.mark_bad(BadReason::CrcError);
                }
            }
        }

        if !rec.is_idle
            && !rec.is_dead_code
            && !rec.is_bad
            && !self.config.is_valid_vcid(header.vcid)
        {
            rec.mark_bad(BadReason::BadVcid);
        }

        rec
    }
}
