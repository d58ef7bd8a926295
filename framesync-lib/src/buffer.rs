use std::collections::VecDeque;

use hifitime::Epoch;
use tracing::trace;

use crate::prelude::*;

/// Ground station descriptor attached to received data.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Station {
    pub antenna_id: u32,
    /// Signal bit rate in bits per second.
    pub bit_rate: f64,
}

impl Station {
    pub fn new(antenna_id: u32, bit_rate: f64) -> Self {
        Station {
            antenna_id,
            bit_rate,
        }
    }
}

/// A unit of raw received data as produced by a ground receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    data: Vec<u8>,
    ert: Epoch,
    station: Station,
}

impl RawChunk {
    pub fn new(data: Vec<u8>, ert: Epoch, station: Station) -> Self {
        RawChunk { data, ert, station }
    }

    /// Create a chunk from a receiver buffer described by a byte offset and a length in
    /// bits. Only whole bytes are used, i.e., `bit_len / 8` bytes starting at `offset`.
    ///
    /// # Errors
    /// [Error::OutOfBounds] if the described range is not within `buf`.
    pub fn from_bits(
        buf: &[u8],
        offset: usize,
        bit_len: usize,
        ert: Epoch,
        station: Station,
    ) -> Result<Self> {
        let len = bit_len / 8;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= buf.len())
            .ok_or(Error::OutOfBounds {
                offset,
                len,
                total: buf.len(),
            })?;
        Ok(RawChunk::new(buf[offset..end].to_vec(), ert, station))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Earth receive time recorded at the end of this chunk.
    #[must_use]
    pub fn ert(&self) -> Epoch {
        self.ert
    }

    #[must_use]
    pub fn station(&self) -> &Station {
        &self.station
    }
}

/// Presents a sequence of [RawChunk]s as one contiguous, randomly addressable range of
/// bytes `[0, len)`.
///
/// Offsets are relative to the first retained chunk. When the oldest chunk is dropped all
/// offsets shift down by its length and [ByteStreamBuffer::base] grows by the same amount,
/// so `base + offset` is always the absolute position in the stream.
#[derive(Debug, Default)]
pub struct ByteStreamBuffer {
    chunks: VecDeque<RawChunk>,
    // Absolute stream offset one past the end of each chunk in `chunks`
    ends: VecDeque<u64>,
    total: usize,
    base: u64,
    // ERT of the chunk boundary preceding the first retained chunk
    boundary_ert: Option<Epoch>,
}

impl ByteStreamBuffer {
    pub fn new() -> Self {
        ByteStreamBuffer::default()
    }

    /// Append a chunk to the end of the stream.
    pub fn consume(&mut self, chunk: RawChunk) {
        if self.chunks.is_empty() && self.boundary_ert.is_none() {
            self.boundary_ert = Some(chunk.ert);
        }
        if chunk.is_empty() {
            trace!("ignoring empty chunk");
            return;
        }
        self.total += chunk.len();
        self.ends.push_back(self.base + self.total as u64);
        self.chunks.push_back(chunk);
    }

    /// Total number of bytes currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Absolute stream offset of the first buffered byte.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Length of the oldest buffered chunk, if any.
    #[must_use]
    pub fn first_len(&self) -> Option<usize> {
        self.chunks.front().map(RawChunk::len)
    }

    fn out_of_bounds(&self, offset: usize, len: usize) -> Error {
        Error::OutOfBounds {
            offset,
            len,
            total: self.total,
        }
    }

    // Index of the chunk containing offset and the offset within that chunk.
    fn locate(&self, offset: usize) -> Result<(usize, usize)> {
        if offset >= self.total {
            return Err(self.out_of_bounds(offset, 1));
        }
        let abs = self.base + offset as u64;
        let idx = self.ends.partition_point(|end| *end <= abs);
        let Some(chunk) = self.chunks.get(idx) else {
            return Err(self.out_of_bounds(offset, 1));
        };
        let end = usize::try_from(self.ends[idx] - self.base)
            .map_err(|_| self.out_of_bounds(offset, 1))?;
        Ok((idx, offset - (end - chunk.len())))
    }

    /// # Errors
    /// [Error::OutOfBounds] if `offset` is not within `[0, len)`.
    pub fn byte_at(&self, offset: usize) -> Result<u8> {
        let (idx, local) = self.locate(offset)?;
        Ok(self.chunks[idx].data[local])
    }

    /// Big-endian u32 starting at `offset`, possibly spanning chunks.
    ///
    /// # Errors
    /// [Error::OutOfBounds] if the 4 bytes are not all buffered.
    pub fn u32_at(&self, offset: usize) -> Result<u32> {
        if offset.saturating_add(4) > self.total {
            return Err(self.out_of_bounds(offset, 4));
        }
        let (idx, local) = self.locate(offset)?;
        let chunk = &self.chunks[idx].data;
        if local + 4 <= chunk.len() {
            let b = &chunk[local..local + 4];
            return Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
        }
        let mut buf = [0u8; 4];
        self.copy_into(offset, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Contiguous copy of `len` bytes starting at `offset`.
    ///
    /// # Errors
    /// [Error::OutOfBounds] if `offset + len` exceeds the buffered length.
    pub fn range_copy(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.copy_into(offset, &mut buf)?;
        Ok(buf)
    }

    fn copy_into(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        if offset.checked_add(len).map_or(true, |end| end > self.total) {
            return Err(self.out_of_bounds(offset, len));
        }
        if len == 0 {
            return Ok(());
        }
        let (mut idx, mut local) = self.locate(offset)?;
        let mut filled = 0;
        while filled < len {
            let chunk = &self.chunks[idx].data;
            let n = (chunk.len() - local).min(len - filled);
            buf[filled..filled + n].copy_from_slice(&chunk[local..local + n]);
            filled += n;
            idx += 1;
            local = 0;
        }
        Ok(())
    }

    /// ERT associated with the byte at `offset`.
    ///
    /// ERTs are recorded at the end of a chunk, so this is the ERT of the chunk preceding
    /// the one holding `offset`, or the stream start ERT if there is no preceding chunk.
    ///
    /// # Errors
    /// [Error::OutOfBounds] if `offset` is not within `[0, len)`.
    pub fn ert_at(&self, offset: usize) -> Result<Epoch> {
        let (idx, _) = self.locate(offset)?;
        if idx == 0 {
            return Ok(self.boundary_ert.unwrap_or(self.chunks[0].ert));
        }
        Ok(self.chunks[idx - 1].ert)
    }

    /// Station descriptor of the chunk holding `offset`.
    ///
    /// # Errors
    /// [Error::OutOfBounds] if `offset` is not within `[0, len)`.
    pub fn station_at(&self, offset: usize) -> Result<&Station> {
        let (idx, _) = self.locate(offset)?;
        Ok(&self.chunks[idx].station)
    }

    /// Remove the oldest chunk returning its length, or `None` if empty.
    ///
    /// Callers holding offsets into this buffer must reduce them by the returned length.
    pub fn drop_oldest(&mut self) -> Option<usize> {
        let chunk = self.chunks.pop_front()?;
        self.ends.pop_front();
        let len = chunk.len();
        self.total -= len;
        self.base += len as u64;
        self.boundary_ert = Some(chunk.ert);
        trace!(len, base = self.base, "dropped chunk");
        Some(len)
    }
}
