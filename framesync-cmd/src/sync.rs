use std::{
    fs::File,
    io::{stdout, BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use framesync::{FrameRecord, SyncEvent, SyncedEvents};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

/// Frame fields included in event output.
#[derive(Debug, Clone, Serialize)]
struct FrameLine {
    format: String,
    scid: Option<u16>,
    vcid: Option<u16>,
    seq_count: u32,
    idle: bool,
    dead_code: bool,
    bad: bool,
    bad_reason: Option<String>,
}

impl From<&FrameRecord> for FrameLine {
    fn from(rec: &FrameRecord) -> Self {
        FrameLine {
            format: rec.name.clone(),
            scid: rec.spacecraft_id,
            vcid: rec.vcid,
            seq_count: rec.seq_count,
            idle: rec.is_idle,
            dead_code: rec.is_dead_code,
            bad: rec.is_bad,
            bad_reason: rec.bad_reason.map(|r| r.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct EventLine {
    kind: &'static str,
    ert: String,
    antenna: u32,
    offset: Option<u64>,
    len: Option<usize>,
    frame: Option<FrameLine>,
    reason: Option<String>,
}

impl From<&SyncEvent> for EventLine {
    fn from(event: &SyncEvent) -> Self {
        let station = event.station();
        let mut line = EventLine {
            kind: event.kind(),
            ert: station.ert.to_string(),
            antenna: station.station.antenna_id,
            offset: None,
            len: None,
            frame: event.record().map(FrameLine::from),
            reason: None,
        };
        match event {
            SyncEvent::OutOfSyncData { offset, data, .. }
            | SyncEvent::TelemetryFrame { offset, data, .. } => {
                line.offset = Some(*offset);
                line.len = Some(data.len());
            }
            SyncEvent::LossOfSync { reason, .. } => line.reason = Some(reason.clone()),
            SyncEvent::InSync { .. } | SyncEvent::BadFrame { .. } => {}
        }
        line
    }
}

fn render_text(line: &EventLine) -> String {
    let mut s = format!("{:<16} {} antenna={}", line.kind, line.ert, line.antenna);
    if let (Some(offset), Some(len)) = (line.offset, line.len) {
        s.push_str(&format!(" offset={offset} len={len}"));
    }
    if let Some(frame) = &line.frame {
        s.push_str(&format!(
            " format={} scid={} vcid={} seq={}",
            frame.format,
            frame.scid.map_or("-".to_string(), |x| x.to_string()),
            frame.vcid.map_or("-".to_string(), |x| x.to_string()),
            frame.seq_count,
        ));
        if frame.idle {
            s.push_str(" idle");
        }
        if frame.dead_code {
            s.push_str(" dead-code");
        }
        if let Some(reason) = &frame.bad_reason {
            s.push_str(&format!(" bad={reason}"));
        }
    }
    if let Some(reason) = &line.reason {
        s.push_str(&format!(" reason=\"{reason}\""));
    }
    s
}

/// Write one line per event to stdout, and frame bytes to `output` if provided.
pub fn sync(mut events: SyncedEvents, format: &Format, output: Option<&Path>) -> Result<()> {
    let mut dst = match output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create output {path:?}"))?,
        )),
        None => None,
    };
    let mut out = stdout().lock();

    for event in events.by_ref() {
        let event = event.context("synchronizing")?;
        let line = EventLine::from(&event);
        match format {
            Format::Json => {
                serde_json::to_writer(&mut out, &line).context("serializing to json")?;
                writeln!(out).context("writing to stdout")?;
            }
            Format::Text => writeln!(out, "{}", render_text(&line)).context("writing to stdout")?,
        }
        if let (Some(dst), SyncEvent::TelemetryFrame { data, .. }) = (dst.as_mut(), &event) {
            dst.write_all(data).context("writing frame")?;
        }
    }
    if let Some(mut dst) = dst {
        dst.flush().context("flushing output")?;
    }
    if let Some(stats) = events.stats() {
        info!(
            "{} frames, {} out of sync bytes from {} bytes",
            stats.frames, stats.out_of_sync_bytes, stats.bytes_in
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use framesync::{BadReason, Epoch, FrameFormat, Station, StationSnapshot, ASM};

    use super::*;

    #[test]
    fn telemetry_frame_text() {
        let format = FrameFormat::builder()
            .name("TM")
            .asm(ASM)
            .cadu_size(16)
            .header_size(6)
            .data_area_size(6)
            .build();
        let mut record = FrameRecord::new(Arc::new(format));
        record.vcid = Some(3);
        record.spacecraft_id = Some(42);
        record.seq_count = 9;
        record.mark_bad(BadReason::BadVcid);
        let event = SyncEvent::TelemetryFrame {
            station: StationSnapshot {
                station: Station::new(7, 1e6),
                ert: Epoch::from_gpst_seconds(0.0),
            },
            offset: 32,
            record,
            data: vec![0u8; 16],
        };

        let line = EventLine::from(&event);
        assert_eq!(line.offset, Some(32));
        assert_eq!(line.len, Some(16));
        let text = render_text(&line);
        assert!(text.starts_with("TELEMETRY_FRAME"), "{text}");
        assert!(
            text.contains("offset=32 len=16 format=TM scid=42 vcid=3 seq=9 bad=BAD_VCID"),
            "{text}"
        );
    }
}
