//! Transfer frame header parsing.
//!
//! The synchronizer does not know about header layouts itself; it asks a
//! [HeaderParserProvider] for a [HeaderParser] per frame format when it is constructed.
use crate::catalog::{FrameFormat, HeaderLayout};

pub type Scid = u16;
pub type Vcid = u16;

/// Pattern marking the content of a frame as dead-code fill.
pub const DEAD_CODE: u32 = 0xdead_c0de;

/// Fixed position header fields common to all supported frame layouts.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    /// Transfer frame version number, i.e., the version field value plus 1.
    pub version: u8,
    pub scid: Scid,
    pub vcid: Vcid,
    /// Virtual channel frame count.
    pub seq_count: u32,
    /// Value after which `seq_count` rolls over to 0.
    pub max_seq_count: u32,
    /// First header pointer into the data area.
    pub data_pointer: u16,
    pub idle: bool,
    /// All header bytes.
    pub bytes: Vec<u8>,
}

/// Decodes the header for one frame format.
pub trait HeaderParser: Send + Sync {
    /// Decode the header from `dat`, which starts at the first byte following the ASM.
    /// Returns `None` if there are not enough bytes.
    fn parse(&self, dat: &[u8]) -> Option<FrameHeader>;

    /// True when the frame content starting at `dat` is dead-code fill.
    fn is_dead_code(&self, dat: &[u8]) -> bool {
        dat.len() >= 4 && u32::from_be_bytes([dat[0], dat[1], dat[2], dat[3]]) == DEAD_CODE
    }
}

/// Creates the [HeaderParser] to use for a frame format.
pub trait HeaderParserProvider: Send + Sync {
    fn parser_for(&self, format: &FrameFormat) -> Box<dyn HeaderParser>;
}

/// Provides [TmHeaderParser] or [AosHeaderParser] based on [FrameFormat::layout].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHeaderParsers;

impl HeaderParserProvider for DefaultHeaderParsers {
    fn parser_for(&self, format: &FrameFormat) -> Box<dyn HeaderParser> {
        match format.layout {
            HeaderLayout::Tm => Box::new(TmHeaderParser::new(format.header_size)),
            HeaderLayout::Aos => Box::new(AosHeaderParser::new(format.header_size)),
        }
    }
}

/// CCSDS TM Transfer Frame primary header.
///
/// Ref: 132.0-B-3, Section 4.1.2
#[derive(Debug, Clone)]
pub struct TmHeaderParser {
    header_len: usize,
}

impl TmHeaderParser {
    /// Primary header length in bytes
    pub const LEN: usize = 6;
    /// First header pointer value indicating only idle data
    pub const IDLE: u16 = 0x7fe;
    /// Maximum virtual channel frame count
    pub const COUNTER_MAX: u32 = 0xff;

    /// `header_len` is the total header length, including any secondary header.
    pub fn new(header_len: usize) -> Self {
        TmHeaderParser {
            header_len: header_len.max(Self::LEN),
        }
    }
}

impl HeaderParser for TmHeaderParser {
    fn parse(&self, dat: &[u8]) -> Option<FrameHeader> {
        if dat.len() < self.header_len {
            return None;
        }
        let x = u16::from_be_bytes([dat[0], dat[1]]);
        let status = u16::from_be_bytes([dat[4], dat[5]]);
        let data_pointer = status & 0x7ff;
        Some(FrameHeader {
            version: ((dat[0] >> 6) & 0x3) + 1,
            scid: (x >> 4) & 0x3ff,
            vcid: (x >> 1) & 0x7,
            seq_count: u32::from(dat[3]),
            max_seq_count: Self::COUNTER_MAX,
            data_pointer,
            idle: data_pointer == Self::IDLE,
            bytes: dat[..self.header_len].to_vec(),
        })
    }
}

/// CCSDS AOS Transfer Frame (VCDU) primary header, followed by an optional insert zone
/// and the M_PDU header.
///
/// Ref: 732.0-B-4, Section 4.1.2
#[derive(Debug, Clone)]
pub struct AosHeaderParser {
    header_len: usize,
}

impl AosHeaderParser {
    /// VCDU header length in bytes
    pub const LEN: usize = 6;
    /// VCID indicating a fill frame
    pub const FILL: Vcid = 63;
    /// Maximum value for the VCDU counter before rollover
    pub const COUNTER_MAX: u32 = 0xff_ffff;

    /// `header_len` is the total header length. When it is long enough to include the 2
    /// byte M_PDU header, the data pointer is read from its last 2 bytes.
    pub fn new(header_len: usize) -> Self {
        AosHeaderParser {
            header_len: header_len.max(Self::LEN),
        }
    }
}

impl HeaderParser for AosHeaderParser {
    fn parse(&self, dat: &[u8]) -> Option<FrameHeader> {
        if dat.len() < self.header_len {
            return None;
        }
        let x = u16::from_be_bytes([dat[0], dat[1]]);
        let vcid = x & 0x3f;
        let data_pointer = if self.header_len >= Self::LEN + 2 {
            let end = self.header_len;
            u16::from_be_bytes([dat[end - 2], dat[end - 1]]) & 0x7ff
        } else {
            0
        };
        Some(FrameHeader {
            version: ((dat[0] >> 6) & 0x3) + 1,
            scid: (x >> 6) & 0xff,
            vcid,
            seq_count: u32::from_be_bytes([0, dat[2], dat[3], dat[4]]),
            max_seq_count: Self::COUNTER_MAX,
            data_pointer,
            idle: vcid == Self::FILL,
            bytes: dat[..self.header_len].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_aos_header() {
        let dat: Vec<u8> = vec![
            0x55, 0x61, // version 2, scid 85, vcid 33
            0x01, 0xe2, 0x40, // counter 123456
            0x05, // replay:false, frame count usage:false, frame-count-cycle:5
            0x02, 0xaa, // first-header-pointer 682
        ];

        let header = AosHeaderParser::new(8).parse(&dat).unwrap();

        assert_eq!(header.version, 2);
        assert_eq!(header.scid, 85);
        assert_eq!(header.vcid, 33);
        assert_eq!(header.seq_count, 123_456);
        assert_eq!(header.data_pointer, 682);
        assert!(!header.idle);
        assert_eq!(header.bytes, dat);
    }

    #[test]
    fn aos_fill_vcid_is_idle() {
        let dat: Vec<u8> = vec![0x40, 0x3f, 0, 0, 1, 0];
        let header = AosHeaderParser::new(6).parse(&dat).unwrap();
        assert_eq!(header.vcid, AosHeaderParser::FILL);
        assert!(header.idle);
        assert_eq!(header.data_pointer, 0);
    }

    #[test]
    fn decode_tm_header() {
        let dat: Vec<u8> = vec![
            0x0b, 0xc5, // version 1, scid 188, vcid 2, ocf flag
            0x11, // master channel frame count
            0x22, // virtual channel frame count
            0x18, 0x10, // fhp 16
        ];

        let header = TmHeaderParser::new(6).parse(&dat).unwrap();

        assert_eq!(header.version, 1);
        assert_eq!(header.scid, 188);
        assert_eq!(header.vcid, 2);
        assert_eq!(header.seq_count, 0x22);
        assert_eq!(header.max_seq_count, 255);
        assert_eq!(header.data_pointer, 16);
        assert!(!header.idle);
    }

    #[test]
    fn tm_idle_pointer_is_idle() {
        let dat: Vec<u8> = vec![0x0b, 0xc5, 0, 0, 0x07, 0xfe];
        let header = TmHeaderParser::new(6).parse(&dat).unwrap();
        assert!(header.idle);
    }

    #[test]
    fn decode_header_minmax() {
        for parser in [
            Box::new(TmHeaderParser::new(6)) as Box<dyn HeaderParser>,
            Box::new(AosHeaderParser::new(6)),
        ] {
            parser.parse(&[0, 0, 0, 0, 0, 0]).unwrap();
            parser.parse(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).unwrap();
        }
    }

    #[test]
    fn decode_header_is_none_when_data_too_short() {
        assert!(TmHeaderParser::new(6).parse(&[0u8; 5]).is_none());
        assert!(AosHeaderParser::new(10).parse(&[0u8; 8]).is_none());
    }

    #[test]
    fn dead_code_detection() {
        let parser = TmHeaderParser::new(6);
        assert!(parser.is_dead_code(&[0xde, 0xad, 0xc0, 0xde, 0x00]));
        assert!(!parser.is_dead_code(&[0xde, 0xad, 0xc0]));
        assert!(!parser.is_dead_code(&[0x0b, 0xc5, 0x11, 0x22]));
    }
}
