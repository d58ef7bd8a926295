#![doc = include_str!("../README.md")]

mod error;
mod prelude;

pub mod assembler;
pub mod buffer;
pub mod catalog;
pub mod checksum;
#[cfg(feature = "serde")]
pub mod codec;
pub mod config;
pub mod engine;
pub mod event;
pub mod header;
pub mod pipeline;
pub mod record;

pub use assembler::FrameAssembler;
pub use buffer::{ByteStreamBuffer, RawChunk, Station};
#[cfg(feature = "serde")]
pub use catalog::JsonFormatFile;
pub use catalog::{
    ChecksumKind, EncodingType, FormatCatalog, FormatProvider, FrameFormat, HeaderLayout, ASM,
    MIN_ASM_LEN,
};
pub use checksum::{ChecksumCalculator, ChecksumProvider, Crc16, Crc32, DefaultChecksums};
pub use config::SyncConfig;
pub use engine::{Collaborators, SyncEngine, SyncStats};
pub use error::{Error, Result};
pub use event::{EventBus, EventSink, StationSnapshot, Subscriber, SyncEvent};
pub use header::{
    AosHeaderParser, DefaultHeaderParsers, FrameHeader, HeaderParser, HeaderParserProvider,
    Scid, TmHeaderParser, Vcid, DEAD_CODE,
};
pub use hifitime::Epoch;
pub use pipeline::{sync_reader, ReaderOpts, SyncedEvents};
pub use record::{missing_frames, BadReason, FrameRecord};
