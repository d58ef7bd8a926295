//! Frame synchronization state machine.
use std::sync::Arc;

use hifitime::Epoch;
#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::{debug, info, span, trace, warn, Level, Span};

use crate::assembler::FrameAssembler;
use crate::buffer::{ByteStreamBuffer, RawChunk};
use crate::catalog::{FormatCatalog, FrameFormat, MIN_ASM_LEN};
use crate::checksum::{ChecksumCalculator, ChecksumProvider, DefaultChecksums};
use crate::config::SyncConfig;
use crate::event::{EventSink, StationSnapshot, SyncEvent};
use crate::header::{DefaultHeaderParsers, HeaderParser, HeaderParserProvider};
use crate::prelude::*;
use crate::record::{BadReason, FrameRecord};

/// External components the engine is constructed with.
pub struct Collaborators<S> {
    /// Receives all events.
    pub sink: S,
    pub headers: Box<dyn HeaderParserProvider>,
    pub checksums: Box<dyn ChecksumProvider>,
}

impl<S> Collaborators<S> {
    /// Collaborators using the built-in header parsers and checksums.
    pub fn new(sink: S) -> Self {
        Collaborators {
            sink,
            headers: Box::new(DefaultHeaderParsers),
            checksums: Box::new(DefaultChecksums),
        }
    }

    #[must_use]
    pub fn with_headers<P: HeaderParserProvider + 'static>(mut self, provider: P) -> Self {
        self.headers = Box::new(provider);
        self
    }

    #[must_use]
    pub fn with_checksums<P: ChecksumProvider + 'static>(mut self, provider: P) -> Self {
        self.checksums = Box::new(provider);
        self
    }
}

/// Running totals kept by a [SyncEngine].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SyncStats {
    pub bytes_in: u64,
    pub frames: u64,
    pub frame_bytes: u64,
    pub out_of_sync_bytes: u64,
    pub idle_frames: u64,
    pub dead_code_frames: u64,
    pub bad_frames: u64,
    pub acquisitions: u64,
    pub losses: u64,
}

/// Locates transfer frames in a chunked byte stream.
///
/// Chunks are provided using [SyncEngine::consume] and the end of the stream is signaled
/// using [SyncEngine::flush]. All results are published to the [EventSink] in stream order,
/// and every input byte is reported exactly once, either as part of a
/// [SyncEvent::TelemetryFrame] or a [SyncEvent::OutOfSyncData].
///
/// A frame is accepted at an offset when the quick 32-bit ASM compare succeeds, the full
/// ASM matches, and the ASM of any known format follows at the end of the frame. Formats
/// are tried in catalog order and the first to succeed wins.
///
/// # Example
/// ```
/// use framesync::{
///     Collaborators, Epoch, FormatCatalog, FrameFormat, RawChunk, Station, SyncConfig,
///     SyncEngine, SyncEvent, ASM,
/// };
///
/// let format = FrameFormat::builder()
///     .name("TM")
///     .asm(ASM)
///     .cadu_size(16)
///     .header_size(6)
///     .data_area_size(6)
///     .build();
/// let catalog = FormatCatalog::new(vec![format]).unwrap();
/// let mut engine = SyncEngine::new(
///     catalog,
///     SyncConfig::default(),
///     Collaborators::new(Vec::<SyncEvent>::new()),
/// );
///
/// // two frames, so the first is confirmed by the ASM of the second
/// let mut data = Vec::new();
/// for _ in 0..2 {
///     data.extend_from_slice(&ASM);
///     data.extend_from_slice(&[0u8; 12]);
/// }
/// let ert = Epoch::from_gpst_seconds(0.0);
/// engine.consume(RawChunk::new(data, ert, Station::new(1, 1e6))).unwrap();
/// engine.flush().unwrap();
///
/// let kinds: Vec<_> = engine.into_sink().iter().map(SyncEvent::kind).collect();
/// assert_eq!(kinds, vec!["IN_SYNC", "TELEMETRY_FRAME", "TELEMETRY_FRAME"]);
/// ```
pub struct SyncEngine<S: EventSink> {
    catalog: FormatCatalog,
    config: SyncConfig,
    sink: S,
    parsers: Vec<Box<dyn HeaderParser>>,
    checksums: Vec<Option<Box<dyn ChecksumCalculator>>>,
    buffer: ByteStreamBuffer,

    // Next offset to examine
    cursor: usize,
    // First offset not yet reported in an event
    last_cursor: usize,
    in_sync: bool,
    // Format index of the last published frame
    current: Option<usize>,
    last_record: Option<FrameRecord>,
    last_frame_ert: Option<Epoch>,
    flushed: bool,

    stats: SyncStats,
    span: Span,
}

impl<S: EventSink> SyncEngine<S> {
    pub fn new(catalog: FormatCatalog, config: SyncConfig, collaborators: Collaborators<S>) -> Self {
        let Collaborators {
            sink,
            headers,
            checksums,
        } = collaborators;

        let parsers = catalog.iter().map(|f| headers.parser_for(f)).collect();
        let checksums = catalog
            .iter()
            .map(|f| {
                let calc = checksums.checksum_for(f);
                if f.has_error_control && calc.is_none() {
                    warn!(format = %f.name, "no checksum available; checksums will not be checked");
                }
                calc
            })
            .collect();
        let in_sync = config.presynchronized;

        SyncEngine {
            catalog,
            config,
            sink,
            parsers,
            checksums,
            buffer: ByteStreamBuffer::new(),
            cursor: 0,
            last_cursor: 0,
            in_sync,
            current: None,
            last_record: None,
            last_frame_ert: None,
            flushed: false,
            stats: SyncStats::default(),
            span: span!(Level::DEBUG, "framesync"),
        }
    }

    /// Use `span` as the parent context for all logging done by this engine.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn is_in_sync(&self) -> bool {
        self.in_sync
    }

    #[must_use]
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    #[must_use]
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Absolute stream offset of the next byte to be examined.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.buffer.base() + self.cursor as u64
    }

    /// Format of the most recently published frame.
    #[must_use]
    pub fn current_format(&self) -> Option<&Arc<FrameFormat>> {
        self.current.map(|idx| self.catalog.get(idx))
    }

    /// Number of bytes currently retained.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn catalog(&self) -> &FormatCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Add `chunk` to the stream and publish whatever events it makes possible.
    ///
    /// # Errors
    /// [Error::StreamEnded] if called after [SyncEngine::flush]. Other errors indicate an
    /// internal bookkeeping problem.
    pub fn consume(&mut self, chunk: RawChunk) -> Result<()> {
        if self.flushed {
            return Err(Error::StreamEnded);
        }
        let span = self.span.clone();
        let _guard = span.enter();

        trace!(len = chunk.len(), "consume");
        self.stats.bytes_in += chunk.len() as u64;
        self.buffer.consume(chunk);
        self.drive()
    }

    /// Signal the end of the stream, publishing events for all remaining bytes.
    ///
    /// If in sync, frames continue to be matched at the cursor and the final frame is
    /// accepted without a following ASM when it exactly fills the remaining bytes. No
    /// further scanning is done, so everything else becomes a final
    /// [SyncEvent::OutOfSyncData].
    ///
    /// Only the first call has any effect.
    ///
    /// # Errors
    /// Errors indicate an internal bookkeeping problem.
    pub fn flush(&mut self) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        if self.flushed {
            debug!("already flushed");
            return Ok(());
        }
        self.flushed = true;

        if self.in_sync {
            self.maintain(true)?;
        }
        let total = self.buffer.len();
        if self.last_cursor < total {
            if self.in_sync {
                self.lose_sync("end of stream")?;
            }
            self.cursor = total;
            self.report_out_of_sync()?;
        }

        let stats = &self.stats;
        info!(
            bytes_in = stats.bytes_in,
            frames = stats.frames,
            out_of_sync_bytes = stats.out_of_sync_bytes,
            idle = stats.idle_frames,
            dead_code = stats.dead_code_frames,
            bad = stats.bad_frames,
            acquisitions = stats.acquisitions,
            losses = stats.losses,
            "stream complete"
        );
        Ok(())
    }

    // Alternate between maintain and scan until neither can make progress.
    fn drive(&mut self) -> Result<()> {
        loop {
            let changed = if self.in_sync {
                self.maintain(false)?
            } else {
                self.scan()?
            };
            if !changed {
                return Ok(());
            }
        }
    }

    // True if there are enough bytes beyond cursor to attempt a match for any format,
    // including the following ASM. When flushing there will be no more data so any
    // possible ASM position qualifies.
    fn has_window(&self, flush: bool) -> bool {
        let needed = if flush {
            MIN_ASM_LEN
        } else {
            self.catalog.max_frame_len() + 2 * self.catalog.max_asm_len()
        };
        self.cursor + needed <= self.buffer.len()
    }

    /// Index of the first format with a confirmed frame at `offset`.
    fn find_next(&self, offset: usize, flush: bool) -> Result<Option<usize>> {
        let total = self.buffer.len();
        if offset + MIN_ASM_LEN > total {
            return Ok(None);
        }
        let quick = self.buffer.u32_at(offset)?;

        for (idx, format) in self.catalog.iter().enumerate() {
            let (Some(asm), Some(quick_asm)) = (&format.asm, self.catalog.quick_asm(idx)) else {
                continue;
            };
            if offset + format.cadu_size > total || quick != quick_asm {
                continue;
            }
            if !self.asm_matches(offset, asm)? {
                trace!(offset, format = %format.name, "partial asm match");
                continue;
            }

            let next = offset + format.cadu_size;
            if flush && next == total {
                trace!(offset, format = %format.name, "accepting final frame");
                return Ok(Some(idx));
            }
            if next + MIN_ASM_LEN <= total {
                let following = self.buffer.u32_at(next)?;
                let confirmed = (0..self.catalog.len())
                    .any(|j| self.catalog.quick_asm(j) == Some(following));
                if confirmed {
                    return Ok(Some(idx));
                }
            }
            trace!(offset, format = %format.name, "asm not confirmed by following frame");
        }

        Ok(None)
    }

    // Compare the full ASM, last byte first.
    fn asm_matches(&self, offset: usize, asm: &[u8]) -> Result<bool> {
        for (i, b) in asm.iter().enumerate().rev() {
            if self.buffer.byte_at(offset + i)? != *b {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Emit frames while each is followed by another, returning true if sync was lost.
    fn maintain(&mut self, flush: bool) -> Result<bool> {
        while self.has_window(flush) {
            match self.find_next(self.cursor, flush)? {
                Some(idx) => self.publish_frame(idx, false)?,
                None => {
                    let reason = match self.current {
                        Some(idx) => format!(
                            "no asm at expected offset for format {}",
                            self.catalog.get(idx).name
                        ),
                        None => "no asm at expected offset".to_string(),
                    };
                    self.lose_sync(&reason)?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Search byte by byte for a frame, returning true if sync was acquired.
    fn scan(&mut self) -> Result<bool> {
        let threshold = self.config.threshold();

        while self.has_window(false) {
            if self.cursor - self.last_cursor >= threshold {
                self.report_out_of_sync()?;
            }
            if let Some(idx) = self.find_next(self.cursor, false)? {
                self.report_out_of_sync()?;
                self.in_sync = true;
                self.stats.acquisitions += 1;
                debug!(
                    offset = self.position(),
                    format = %self.catalog.get(idx).name,
                    "acquired sync"
                );
                self.publish_frame(idx, true)?;
                return Ok(true);
            }
            self.cursor += 1;
        }
        Ok(false)
    }

    fn snapshot(&self, offset: usize) -> Result<StationSnapshot> {
        let offset = offset.min(self.buffer.len().saturating_sub(1));
        Ok(StationSnapshot {
            station: self.buffer.station_at(offset)?.clone(),
            ert: self.buffer.ert_at(offset)?,
        })
    }

    // Publish the frame of format `idx` at cursor and move past it.
    fn publish_frame(&mut self, idx: usize, acquired: bool) -> Result<()> {
        let format = Arc::clone(self.catalog.get(idx));
        let data = self.buffer.range_copy(self.cursor, format.cadu_size)?;
        let station = self.snapshot(self.cursor)?;
        let record = FrameAssembler::new(&self.config).assemble(
            &format,
            self.parsers[idx].as_ref(),
            self.checksums[idx].as_deref(),
            &data,
        );
        trace!(
            offset = self.position(),
            format = %format.name,
            vcid = ?record.vcid,
            seq = record.seq_count,
            "frame"
        );

        self.stats.frames += 1;
        self.stats.frame_bytes += data.len() as u64;
        self.stats.idle_frames += u64::from(record.is_idle);
        self.stats.dead_code_frames += u64::from(record.is_dead_code);
        self.stats.bad_frames += u64::from(record.is_bad);

        if acquired {
            self.sink.publish(SyncEvent::InSync {
                station: station.clone(),
                record: record.clone(),
            });
        }
        if record.bad_reason == Some(BadReason::BadVcid) {
            self.sink.publish(SyncEvent::BadFrame {
                station: station.clone(),
                record: record.clone(),
            });
        }
        self.current = Some(idx);
        self.last_frame_ert = Some(station.ert);
        self.last_record = Some(record.clone());
        self.sink.publish(SyncEvent::TelemetryFrame {
            station,
            offset: self.position(),
            record,
            data,
        });

        self.cursor += format.cadu_size;
        self.last_cursor = self.cursor;
        self.drop_consumed();
        Ok(())
    }

    fn lose_sync(&mut self, reason: &str) -> Result<()> {
        debug!(offset = self.position(), reason, "lost sync");
        let station = self.snapshot(self.cursor)?;
        self.in_sync = false;
        self.stats.losses += 1;
        self.sink.publish(SyncEvent::LossOfSync {
            station,
            last_record: self.last_record.clone(),
            last_frame_ert: self.last_frame_ert,
            reason: reason.to_string(),
        });
        Ok(())
    }

    // Report [last_cursor, cursor) as out of sync, if not empty.
    fn report_out_of_sync(&mut self) -> Result<()> {
        if self.cursor == self.last_cursor {
            return Ok(());
        }
        let len = self.cursor - self.last_cursor;
        let data = self.buffer.range_copy(self.last_cursor, len)?;
        let station = self.snapshot(self.last_cursor)?;
        let offset = self.buffer.base() + self.last_cursor as u64;
        trace!(offset, len, "out of sync data");

        self.stats.out_of_sync_bytes += len as u64;
        self.sink.publish(SyncEvent::OutOfSyncData {
            station,
            offset,
            data,
        });
        self.last_cursor = self.cursor;
        self.drop_consumed();
        Ok(())
    }

    // Drop chunks that both cursors have moved past.
    fn drop_consumed(&mut self) {
        while let Some(len) = self.buffer.first_len() {
            if len > self.last_cursor {
                break;
            }
            self.buffer.drop_oldest();
            self.cursor -= len;
            self.last_cursor -= len;
        }
    }
}
