//! Frame error control computation.
use crc::{Crc, CRC_16_IBM_3740, CRC_32_ISO_HDLC};

use crate::catalog::{ChecksumKind, FrameFormat};

/// Computes and extracts frame checksums.
pub trait ChecksumCalculator: Send + Sync {
    /// Compute the checksum over `len` bytes of `frame` starting at `offset`, or `None` if
    /// `frame` is too short.
    fn calculate(&self, frame: &[u8], offset: usize, len: usize) -> Option<u32>;

    /// Read the checksum stored in `frame` at `location`, or `None` if `frame` is too short.
    fn expected(&self, frame: &[u8], location: usize) -> Option<u32>;
}

/// Creates the [ChecksumCalculator] used for a frame format.
pub trait ChecksumProvider: Send + Sync {
    /// Returns `None` if the format's checksum is not supported.
    fn checksum_for(&self, format: &FrameFormat) -> Option<Box<dyn ChecksumCalculator>>;
}

/// Provides [Crc16] or [Crc32] based on [FrameFormat::checksum].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultChecksums;

impl ChecksumProvider for DefaultChecksums {
    fn checksum_for(&self, format: &FrameFormat) -> Option<Box<dyn ChecksumCalculator>> {
        match format.checksum {
            ChecksumKind::Crc16 => Some(Box::new(Crc16::new())),
            ChecksumKind::Crc32 => Some(Box::new(Crc32::new())),
        }
    }
}

fn region(frame: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    frame.get(offset..offset.checked_add(len)?)
}

/// CRC-16-CCITT (poly 0x1021, init 0xffff) frame error control field.
///
/// Ref: 132.0-B-3, Section 4.1.6
pub struct Crc16 {
    alg: Crc<u16>,
}

impl Crc16 {
    pub const SIZE: usize = 2;

    pub fn new() -> Self {
        Self {
            alg: Crc::<u16>::new(&CRC_16_IBM_3740),
        }
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumCalculator for Crc16 {
    fn calculate(&self, frame: &[u8], offset: usize, len: usize) -> Option<u32> {
        region(frame, offset, len).map(|dat| u32::from(self.alg.checksum(dat)))
    }

    fn expected(&self, frame: &[u8], location: usize) -> Option<u32> {
        let dat = region(frame, location, Self::SIZE)?;
        Some(u32::from(u16::from_be_bytes([dat[0], dat[1]])))
    }
}

/// CRC-32 (ISO-HDLC) frame checksum.
pub struct Crc32 {
    alg: Crc<u32>,
}

impl Crc32 {
    pub const SIZE: usize = 4;

    pub fn new() -> Self {
        Self {
            alg: Crc::<u32>::new(&CRC_32_ISO_HDLC),
        }
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumCalculator for Crc32 {
    fn calculate(&self, frame: &[u8], offset: usize, len: usize) -> Option<u32> {
        region(frame, offset, len).map(|dat| self.alg.checksum(dat))
    }

    fn expected(&self, frame: &[u8], location: usize) -> Option<u32> {
        let dat = region(frame, location, Self::SIZE)?;
        Some(u32::from_be_bytes([dat[0], dat[1], dat[2], dat[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_check_value() {
        // standard check input for CRC-16/IBM-3740
        let crc = Crc16::new();
        assert_eq!(crc.calculate(b"123456789", 0, 9), Some(0x29b1));
    }

    #[test]
    fn crc32_check_value() {
        let crc = Crc32::new();
        assert_eq!(crc.calculate(b"123456789", 0, 9), Some(0xcbf4_3926));
    }

    #[test]
    fn crc16_round_trip_in_frame() {
        let crc = Crc16::new();
        let mut frame = vec![0u8; 12];
        frame[4..10].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        let sum = crc.calculate(&frame, 4, 6).unwrap();
        frame[10..12].copy_from_slice(&u16::try_from(sum).unwrap().to_be_bytes());

        assert_eq!(crc.expected(&frame, 10), Some(sum));
    }

    #[test]
    fn crc32_fixture_frame() {
        let frame = hex::decode("1acffc1d313233343536373839cbf43926").unwrap();
        let crc = Crc32::new();

        assert_eq!(crc.calculate(&frame, 4, 9), crc.expected(&frame, 13));
    }

    #[test]
    fn region_out_of_range_is_none() {
        let crc = Crc32::new();
        assert!(crc.calculate(&[0u8; 4], 2, 4).is_none());
        assert!(crc.expected(&[0u8; 4], 1).is_none());
        assert!(crc.calculate(&[0u8; 4], usize::MAX, 2).is_none());
    }
}
