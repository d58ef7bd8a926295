use anyhow::{Context, Result};
use framesync::{FrameRecord, SyncEvent, Vcid};
use handlebars::handlebars_helper;
use serde::Serialize;
use std::{
    cmp,
    collections::{BTreeMap, HashMap},
    io::{stdout, Write},
    path::Path,
};
use tracing::debug;

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

#[derive(Default, Debug, Clone, Serialize)]
struct Summary {
    total_bytes: u64,
    total_frames: usize,
    out_of_sync_bytes: u64,
    acquisitions: usize,
    losses: usize,
    first_ert: Option<String>,
    last_ert: Option<String>,
}

#[derive(Default, Debug, Clone, Serialize)]
struct VcidSummary {
    total_frames: usize,
    missing_frames: u64,
    idle_frames: usize,
    dead_code_frames: usize,
    bad_frames: usize,
}

#[derive(Debug, Clone, Serialize)]
struct Info {
    filename: String,
    summary: Summary,
    formats: BTreeMap<String, usize>,
    vcids: BTreeMap<Vcid, VcidSummary>,
}

fn summarize<I>(fpath: &Path, events: I) -> Result<Info>
where
    I: Iterator<Item = framesync::Result<SyncEvent>>,
{
    let mut summary = Summary::default();
    let mut formats: BTreeMap<String, usize> = BTreeMap::default();
    let mut vcids: BTreeMap<Vcid, VcidSummary> = BTreeMap::default();
    let mut last: HashMap<Vcid, FrameRecord> = HashMap::default();
    let mut first_ert = None;
    let mut last_ert = None;

    for event in events {
        let event = event.context("synchronizing")?;
        let ert = event.station().ert;
        first_ert = Some(first_ert.map_or(ert, |cur| cmp::min(ert, cur)));
        last_ert = Some(last_ert.map_or(ert, |cur| cmp::max(ert, cur)));

        match event {
            SyncEvent::InSync { .. } => summary.acquisitions += 1,
            SyncEvent::LossOfSync { .. } => summary.losses += 1,
            SyncEvent::OutOfSyncData { data, .. } => {
                summary.total_bytes += data.len() as u64;
                summary.out_of_sync_bytes += data.len() as u64;
            }
            SyncEvent::BadFrame { .. } => {}
            SyncEvent::TelemetryFrame { record, data, .. } => {
                summary.total_bytes += data.len() as u64;
                summary.total_frames += 1;
                *formats.entry(record.name.clone()).or_default() += 1;

                let Some(vcid) = record.vcid else {
                    debug!("frame without a vcid: {record:?}");
                    continue;
                };
                let vc = vcids.entry(vcid).or_default();
                vc.total_frames += 1;
                vc.idle_frames += usize::from(record.is_idle);
                vc.dead_code_frames += usize::from(record.is_dead_code);
                vc.bad_frames += usize::from(record.is_bad);
                // Only count missing for frames carrying data
                if !record.is_idle && !record.is_dead_code {
                    if let Some(prev) = last.get(&vcid) {
                        vc.missing_frames += u64::from(record.missing_since(prev));
                    }
                    last.insert(vcid, record);
                }
            }
        }
    }
    summary.first_ert = first_ert.map(|e| e.to_string());
    summary.last_ert = last_ert.map(|e| e.to_string());

    Ok(Info {
        filename: fpath.to_string_lossy().to_string(),
        summary,
        formats,
        vcids,
    })
}

pub fn info<I>(fpath: &Path, events: I, format: &Format) -> Result<()>
where
    I: Iterator<Item = framesync::Result<SyncEvent>>,
{
    let info = summarize(fpath, events)?;

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &info).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&info).context("serializing info")?;
            stdout()
                .write_all(str::as_bytes(&data))
                .context("writing to stdout")
        }
    }
}

fn render_text(info: &Info) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let num = usize::try_from(num).unwrap_or_default().max(v.len());
        format!("{v:>num$}")
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("info", TEXT_TEMPLATE)
        .context("registering template")?;

    hb.render("info", &info).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ filename }}
===============================================================================================
First:        {{ summary.first_ert }}
Last:         {{ summary.last_ert }}
Bytes:        {{ summary.total_bytes }}
Frames:       {{ summary.total_frames }}
Out of sync:  {{ summary.out_of_sync_bytes }}
Acquisitions: {{ summary.acquisitions }}
Losses:       {{ summary.losses }}
Formats:      {{ #each formats }}{{ @key }}={{ this }}{{ #if @last }}{{ else }}, {{ /if }}{{ /each }}
-----------------------------------------------------------------------------------------------
VCID     Count   Missing      Idle  DeadCode       Bad
-----------------------------------------------------------------------------------------------
{{ #each vcids }}{{ lpad 4 @key }}  {{ lpad 8 total_frames }}  {{ lpad 8 missing_frames }}  {{ lpad 8 idle_frames }}  {{ lpad 8 dead_code_frames }}  {{ lpad 8 bad_frames }}
{{/each }}
";

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use framesync::{Epoch, FrameFormat, Station, StationSnapshot, ASM};

    use super::*;

    fn station() -> StationSnapshot {
        StationSnapshot {
            station: Station::new(1, 1e6),
            ert: Epoch::from_gpst_seconds(0.0),
        }
    }

    fn frame(vcid: Vcid, seq: u32) -> SyncEvent {
        let format = FrameFormat::builder()
            .name("TM")
            .asm(ASM)
            .cadu_size(16)
            .header_size(6)
            .data_area_size(6)
            .build();
        let mut record = FrameRecord::new(Arc::new(format));
        record.vcid = Some(vcid);
        record.seq_count = seq;
        record.max_seq_count = 255;
        SyncEvent::TelemetryFrame {
            station: station(),
            offset: 0,
            record,
            data: vec![0u8; 16],
        }
    }

    #[test]
    fn summarize_events() {
        let events = vec![
            SyncEvent::OutOfSyncData {
                station: station(),
                offset: 0,
                data: vec![0u8; 10],
            },
            frame(1, 254),
            frame(1, 1),
            frame(2, 7),
        ];

        let info = summarize(Path::new("x.dat"), events.into_iter().map(Ok)).unwrap();

        assert_eq!(info.summary.total_bytes, 58);
        assert_eq!(info.summary.total_frames, 3);
        assert_eq!(info.summary.out_of_sync_bytes, 10);
        assert_eq!(info.formats["TM"], 3);
        assert_eq!(info.vcids[&1].total_frames, 2);
        assert_eq!(info.vcids[&1].missing_frames, 2);
        assert_eq!(info.vcids[&2].missing_frames, 0);

        let text = render_text(&info).unwrap();
        assert!(text.contains("Formats:      TM=3"), "{text}");
    }
}
