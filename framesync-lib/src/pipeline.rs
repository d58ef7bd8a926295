//! Drive a [SyncEngine] from a byte reader on a background thread.
use std::io::{ErrorKind, Read};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender};
use hifitime::{Duration, Epoch};
use tracing::{debug, error, span, Level};

use crate::buffer::{RawChunk, Station};
use crate::catalog::FormatCatalog;
use crate::config::SyncConfig;
use crate::engine::{Collaborators, SyncEngine, SyncStats};
use crate::event::{EventSink, SyncEvent};
use crate::prelude::*;

/// Options for [sync_reader].
#[derive(Debug, Clone)]
pub struct ReaderOpts {
    /// Number of bytes read for each [RawChunk].
    pub chunk_len: usize,
    /// Station attached to every chunk. Its bit rate is used to derive chunk ERTs.
    pub station: Station,
    /// ERT of the first byte in the stream.
    pub start_ert: Epoch,
    /// Number of events that may be waiting for the consumer before the reader blocks.
    pub buffer_size: usize,
}

impl ReaderOpts {
    pub const DEFAULT_CHUNK_LEN: usize = 65536;
    pub const DEFAULT_BUFFER_SIZE: usize = 1024;

    pub fn new(station: Station, start_ert: Epoch) -> Self {
        ReaderOpts {
            chunk_len: Self::DEFAULT_CHUNK_LEN,
            station,
            start_ert,
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
        }
    }

    #[must_use]
    pub fn with_chunk_len(mut self, chunk_len: usize) -> Self {
        self.chunk_len = chunk_len.max(1);
        self
    }

    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// ERT at which the byte at `offset` was received, based on the station bit rate.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ert_at(&self, offset: u64) -> Epoch {
        if self.station.bit_rate <= 0.0 {
            return self.start_ert;
        }
        let secs = (offset * 8) as f64 / self.station.bit_rate;
        self.start_ert + Duration::from_seconds(secs)
    }
}

struct ChannelSink(Sender<Result<SyncEvent>>);

impl EventSink for ChannelSink {
    fn publish(&mut self, event: SyncEvent) {
        if self.0.send(Ok(event)).is_err() {
            debug!("failed to send event: receiver disconnected");
        }
    }
}

// Read until `buf` is full or the reader is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn feed<R: Read, S: EventSink>(
    reader: &mut R,
    engine: &mut SyncEngine<S>,
    opts: &ReaderOpts,
) -> Result<()> {
    let mut total: u64 = 0;
    loop {
        let mut buf = vec![0u8; opts.chunk_len.max(1)];
        let num = read_full(reader, &mut buf)?;
        if num == 0 {
            break;
        }
        buf.truncate(num);
        total += num as u64;
        // ERTs are recorded at the end of a chunk
        let ert = opts.ert_at(total);
        engine.consume(RawChunk::new(buf, ert, opts.station.clone()))?;
    }
    engine.flush()
}

/// Synchronize frames from `reader`, yielding events in stream order.
///
/// Reading and synchronizing is done in a background thread. An I/O or internal error ends
/// the stream after being yielded as the last item.
///
/// # Errors
/// If the background thread cannot be started.
///
/// # Example
/// ```no_run
/// use std::fs::File;
/// use framesync::{sync_reader, Epoch, FormatCatalog, JsonFormatFile, ReaderOpts, Station, SyncConfig};
///
/// let catalog = FormatCatalog::from_provider(&JsonFormatFile::new("formats.json")).unwrap();
/// let opts = ReaderOpts::new(Station::new(34, 15e6), Epoch::from_gpst_seconds(0.0));
/// let events = sync_reader(File::open("stream.dat").unwrap(), catalog, SyncConfig::default(), opts)
///     .unwrap();
/// for event in events.filter_map(Result::ok) {
///     println!("{}", event.kind());
/// }
/// ```
pub fn sync_reader<R>(
    reader: R,
    catalog: FormatCatalog,
    config: SyncConfig,
    opts: ReaderOpts,
) -> Result<SyncedEvents>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = bounded(opts.buffer_size);
    let mut reader = reader;

    let handle = thread::Builder::new()
        .name("framesync_reader".into())
        .spawn(move || {
            let span = span!(Level::DEBUG, "reader", chunk_len = opts.chunk_len);
            let mut engine =
                SyncEngine::new(catalog, config, Collaborators::new(ChannelSink(tx.clone())))
                    .with_span(span);
            if let Err(err) = feed(&mut reader, &mut engine, &opts) {
                error!("synchronization failed: {err}");
                if tx.send(Err(err)).is_err() {
                    debug!("failed to send error: receiver disconnected");
                }
            }
            engine.stats().clone()
        })?;

    Ok(SyncedEvents {
        events: rx,
        handle: Some(handle),
        stats: None,
    })
}

/// Iterator over the events produced by [sync_reader].
pub struct SyncedEvents {
    events: Receiver<Result<SyncEvent>>,
    handle: Option<JoinHandle<SyncStats>>,
    stats: Option<SyncStats>,
}

impl SyncedEvents {
    /// Engine statistics, available once the iterator is exhausted.
    #[must_use]
    pub fn stats(&self) -> Option<&SyncStats> {
        self.stats.as_ref()
    }
}

impl Iterator for SyncedEvents {
    type Item = Result<SyncEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        // recv blocks until an event is available or the reader thread exits
        match self.events.recv() {
            Ok(zult) => Some(zult),
            Err(_) => {
                if let Some(handle) = self.handle.take() {
                    match handle.join() {
                        Ok(stats) => self.stats = Some(stats),
                        Err(_) => error!("reader thread panicked"),
                    }
                }
                None
            }
        }
    }
}
