#![allow(dead_code)]

use framesync::{
    ChecksumCalculator, Collaborators, Crc16, Epoch, FormatCatalog, FrameFormat, RawChunk,
    Station, SyncConfig, SyncEngine, SyncEvent, TmHeaderParser, ASM,
};

pub const SCID: u16 = 42;

pub fn station() -> Station {
    Station::new(34, 1e6)
}

pub fn ert(secs: usize) -> Epoch {
    Epoch::from_gpst_seconds(secs as f64)
}

/// TM format with a CRC-16 and no OCF.
pub fn tm_format(name: &str, cadu_size: usize) -> FrameFormat {
    FrameFormat::builder()
        .name(name)
        .asm(ASM)
        .cadu_size(cadu_size)
        .header_size(6)
        .data_area_size(cadu_size - ASM.len() - 6 - 2)
        .has_error_control(true)
        .build()
}

pub fn catalog(formats: Vec<FrameFormat>) -> FormatCatalog {
    FormatCatalog::new(formats).unwrap()
}

/// TM frame with a valid checksum, with the data area filled from `payload` and zeros.
pub fn frame_with(format: &FrameFormat, vcid: u16, seq: u8, fhp: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = ASM.to_vec();
    frame.extend(((SCID << 4) | ((vcid & 0x7) << 1)).to_be_bytes());
    frame.extend([0, seq]);
    frame.extend(fhp.to_be_bytes());
    let data_len = payload.len().min(format.data_area_size);
    frame.extend(&payload[..data_len]);
    frame.resize(format.checksum_offset(), 0);
    let crc = Crc16::new()
        .calculate(&frame, ASM.len(), format.header_size + format.data_area_size)
        .unwrap();
    frame.extend(u16::try_from(crc).unwrap().to_be_bytes());
    frame.resize(format.cadu_size, 0);
    frame
}

pub fn tm_frame(format: &FrameFormat, vcid: u16, seq: u8) -> Vec<u8> {
    frame_with(format, vcid, seq, 0, &[])
}

pub fn idle_frame(format: &FrameFormat, vcid: u16, seq: u8) -> Vec<u8> {
    frame_with(format, vcid, seq, TmHeaderParser::IDLE, &[])
}

/// `num` back to back frames with sequence counts 0..num.
pub fn frames(format: &FrameFormat, num: usize) -> Vec<u8> {
    (0..num)
        .flat_map(|seq| tm_frame(format, 0, u8::try_from(seq).unwrap()))
        .collect()
}

pub fn engine(catalog: FormatCatalog, config: SyncConfig) -> SyncEngine<Vec<SyncEvent>> {
    SyncEngine::new(catalog, config, Collaborators::new(Vec::new()))
}

/// Feed `data` in chunks of `chunk_len`, each with an ERT of its index in seconds.
pub fn feed(engine: &mut SyncEngine<Vec<SyncEvent>>, data: &[u8], chunk_len: usize) {
    for (idx, dat) in data.chunks(chunk_len).enumerate() {
        engine
            .consume(RawChunk::new(dat.to_vec(), ert(idx), station()))
            .unwrap();
    }
}

pub fn run(
    catalog: FormatCatalog,
    config: SyncConfig,
    data: &[u8],
    chunk_len: usize,
) -> Vec<SyncEvent> {
    let mut engine = engine(catalog, config);
    feed(&mut engine, data, chunk_len);
    engine.flush().unwrap();
    engine.into_sink()
}

pub fn kinds(events: &[SyncEvent]) -> Vec<&'static str> {
    events.iter().map(SyncEvent::kind).collect()
}

pub fn count(events: &[SyncEvent], kind: &str) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

/// Concatenate all reported bytes in event order.
pub fn reassemble(events: &[SyncEvent]) -> Vec<u8> {
    let mut dat = Vec::new();
    for event in events {
        match event {
            SyncEvent::OutOfSyncData { data, .. } | SyncEvent::TelemetryFrame { data, .. } => {
                dat.extend(data);
            }
            _ => {}
        }
    }
    dat
}

/// Assert each reported range starts where the previous one ended.
pub fn assert_contiguous(events: &[SyncEvent]) {
    let mut expected: u64 = 0;
    for event in events {
        match event {
            SyncEvent::OutOfSyncData { offset, data, .. }
            | SyncEvent::TelemetryFrame { offset, data, .. } => {
                assert_eq!(*offset, expected, "gap or overlap at {event:?}");
                expected += data.len() as u64;
            }
            _ => {}
        }
    }
}
