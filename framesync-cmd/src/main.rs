mod info;
mod sync;

use std::io::stderr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use framesync::{
    sync_reader, FormatCatalog, JsonFormatFile, ReaderOpts, Station, SyncConfig, SyncedEvents,
    Vcid,
};
use hifitime::Epoch;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize frames in a raw data file and print the resulting events.
    ///
    /// Each event is written to stdout as a single line.
    Sync {
        #[command(flatten)]
        opts: SyncArgs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: sync::Format,

        /// Write synchronized frames, including ASM, to this file.
        #[arg(short, long, value_name = "path")]
        output: Option<PathBuf>,

        /// Delete output file if it already exists
        #[arg(long, action)]
        clobber: bool,
    },
    /// Show a summary of frames found in a raw data file.
    Info {
        #[command(flatten)]
        opts: SyncArgs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: info::Format,
    },
}

#[derive(Args)]
struct SyncArgs {
    /// JSON file containing an array of frame format definitions.
    #[arg(short = 'F', long, value_name = "path")]
    formats: PathBuf,

    /// JSON synchronizer configuration. Command line options override its values.
    #[arg(short, long, value_name = "path")]
    config: Option<PathBuf>,

    /// Verify frame checksums for formats with error control.
    #[arg(long, action)]
    checksum_check: bool,

    /// Report out of sync data after this many bytes.
    #[arg(long, value_name = "bytes")]
    threshold: Option<usize>,

    /// Valid VCIDs or VCID ranges.
    ///
    /// This accepts a CSV of VCIDs as well as ranges of the format <start>-<end>
    /// where start and end are inclusive, e.g., --vcids 0-5,16,63. If not provided only
    /// VCID 0 is considered valid.
    #[arg(long, value_name = "csv", value_delimiter = ',')]
    vcids: Vec<String>,

    /// Input is expected to start with a frame.
    #[arg(long, action)]
    presynchronized: bool,

    /// Ground station antenna identifier.
    #[arg(long, default_value = "0")]
    antenna: u32,

    /// Signal bit rate used to derive receive times.
    #[arg(long, default_value = "0", value_name = "bps")]
    bit_rate: f64,

    /// Receive time of the first byte (RFC3339). Defaults to now.
    #[arg(long, value_parser = parse_timestamp, value_name = "timestamp")]
    start: Option<Epoch>,

    /// Number of bytes read at a time.
    #[arg(long, default_value = "65536", value_name = "bytes")]
    chunk_len: usize,

    /// Input raw data file.
    input: PathBuf,
}

impl SyncArgs {
    fn sync_config(&self) -> Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let file = std::fs::File::open(path)
                    .with_context(|| format!("opening config {path:?}"))?;
                serde_json::from_reader(std::io::BufReader::new(file))
                    .with_context(|| format!("parsing config {path:?}"))?
            }
            None => SyncConfig::default(),
        };
        if self.checksum_check {
            config = config.with_checksum_check(true);
        }
        if let Some(threshold) = self.threshold {
            config = config.with_out_of_sync_threshold(threshold);
        }
        if !self.vcids.is_empty() {
            let vcids = parse_number_ranges(self.vcids.clone())?
                .into_iter()
                .map(|v| Vcid::try_from(v).map_err(|_| anyhow!("invalid vcid {v}")))
                .collect::<Result<Vec<Vcid>>>()?;
            config = config.with_valid_vcids(vcids);
        }
        if self.presynchronized {
            config = config.with_presynchronized(true);
        }
        Ok(config)
    }

    /// Start synchronizing the input in the background.
    fn events(&self) -> Result<SyncedEvents> {
        let catalog = FormatCatalog::from_provider(&JsonFormatFile::new(&self.formats))
            .with_context(|| format!("loading frame formats from {:?}", self.formats))?;
        let config = self.sync_config()?;
        debug!("{config:?}");

        let start = match self.start {
            Some(start) => start,
            None => Epoch::now().context("getting current time")?,
        };
        let opts = ReaderOpts::new(Station::new(self.antenna, self.bit_rate), start)
            .with_chunk_len(self.chunk_len);
        let src = std::fs::File::open(&self.input)
            .with_context(|| format!("opening input {:?}", self.input))?;

        Ok(sync_reader(
            std::io::BufReader::new(src),
            catalog,
            config,
            opts,
        )?)
    }
}

fn parse_number_ranges(list: Vec<String>) -> Result<Vec<u32>> {
    let rx = regex::Regex::new(r"^(?:(\d+)|(\d+)-(\d+))$").context("compiling regex")?;
    let mut values = Vec::default();
    for (i, s) in list.into_iter().enumerate() {
        let Some(cap) = rx.captures(s.trim()) else {
            bail!("invalid number or range at {i}: {s}");
        };

        if cap.get(1).is_some() {
            let x = cap[1]
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid number value"))?;
            values.push(x);
        } else {
            let start = cap[2]
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid range value"))?;
            let end = cap[3]
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid range value"))?;
            if start >= end {
                bail!("invalid range {s}")
            }
            values.extend(start..=end);
        }
    }

    Ok(values)
}

fn parse_timestamp(s: &str) -> Result<Epoch, String> {
    Epoch::from_str(s).map_err(|_| "Could not parse into an RFC3339 timestamp".to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("FRAMESYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Sync {
            opts,
            format,
            output,
            clobber,
        } => {
            if let Some(output) = output {
                if !clobber && output.exists() {
                    bail!("{output:?} exists; use --clobber");
                }
            }
            sync::sync(opts.events()?, format, output.as_deref())
        }
        Commands::Info { opts, format } => info::info(&opts.input, opts.events()?, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_ranges() {
        let values =
            parse_number_ranges(vec!["0-3".into(), "16".into(), " 63".into()]).unwrap();
        assert_eq!(values, vec![0, 1, 2, 3, 16, 63]);
    }

    #[test]
    fn invalid_number_ranges() {
        assert!(parse_number_ranges(vec!["3-1".into()]).is_err());
        assert!(parse_number_ranges(vec!["x".into()]).is_err());
    }

    #[test]
    fn timestamp() {
        assert!(parse_timestamp("2024-12-06T17:38:15Z").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
