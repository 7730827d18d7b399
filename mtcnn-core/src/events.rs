//! TensorBoard event log export.
//!
//! Event files are a sequence of TFRecords, each framed as
//!
//! ```text
//! u64 length (LE) | u32 masked crc32c(length) | payload | u32 masked crc32c(payload)
//! ```
//!
//! where the payload is a serialized [`Event`]. The first record always
//! carries the file version string TensorBoard checks for.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use log::{debug, info};
use prost::Message;

use crate::graph::Graph;
use crate::proto::{Event, encode_graph, event::What};

/// Version tag written as the first event of every file.
pub const FILE_VERSION: &str = "brain.Event:2";

const MASK_DELTA: u32 = 0xa282_ead8;
const HEADER_LEN: usize = 12;
const FOOTER_LEN: usize = 4;

/// CRC32C with the TFRecord rotation mask applied.
pub fn masked_crc32c(bytes: &[u8]) -> u32 {
    let crc = crc32c::crc32c(bytes);
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Frame one payload as a TFRecord.
pub fn encode_record(payload: &[u8]) -> Vec<u8> {
    let length = (payload.len() as u64).to_le_bytes();
    let mut record = Vec::with_capacity(HEADER_LEN + payload.len() + FOOTER_LEN);
    record.extend_from_slice(&length);
    record.extend_from_slice(&masked_crc32c(&length).to_le_bytes());
    record.extend_from_slice(payload);
    record.extend_from_slice(&masked_crc32c(payload).to_le_bytes());
    record
}

/// Split a buffer of TFRecords into payloads, verifying both checksums of each.
pub fn decode_records(mut bytes: &[u8]) -> Result<Vec<&[u8]>> {
    let mut payloads = Vec::new();
    while !bytes.is_empty() {
        let index = payloads.len();
        anyhow::ensure!(
            bytes.len() >= HEADER_LEN,
            "record {index}: truncated header ({} bytes left)",
            bytes.len()
        );
        let (length_bytes, rest) = bytes.split_at(8);
        let length = u64::from_le_bytes(length_bytes.try_into()?);
        let length_crc = u32::from_le_bytes(rest[..4].try_into()?);
        anyhow::ensure!(
            length_crc == masked_crc32c(length_bytes),
            "record {index}: length checksum mismatch"
        );

        let length = usize::try_from(length)
            .with_context(|| format!("record {index}: length {length} does not fit in memory"))?;
        let rest = &rest[4..];
        anyhow::ensure!(
            rest.len() >= length.saturating_add(FOOTER_LEN),
            "record {index}: truncated payload ({length} bytes announced, {} available)",
            rest.len()
        );
        let (payload, rest) = rest.split_at(length);
        let payload_crc = u32::from_le_bytes(rest[..FOOTER_LEN].try_into()?);
        anyhow::ensure!(
            payload_crc == masked_crc32c(payload),
            "record {index}: payload checksum mismatch"
        );
        payloads.push(payload);
        bytes = &rest[FOOTER_LEN..];
    }
    Ok(payloads)
}

/// Read and verify every event in a TensorBoard event file.
pub fn read_events<P: AsRef<Path>>(path: P) -> Result<Vec<Event>> {
    let path = path.as_ref();
    let bytes =
        fs::read(path).with_context(|| format!("failed to read event file {}", path.display()))?;
    decode_records(&bytes)
        .with_context(|| format!("corrupt event file {}", path.display()))?
        .into_iter()
        .enumerate()
        .map(|(index, payload)| {
            Event::decode(payload).with_context(|| format!("record {index} is not an Event"))
        })
        .collect()
}

/// Appends events to a fresh `events.out.tfevents.<secs>.<host>` file.
pub struct EventWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl EventWriter {
    /// Create `log_dir` if needed and start a new event file in it.
    pub fn create<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)
            .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is before the Unix epoch")?;
        let path = log_dir.join(format!(
            "events.out.tfevents.{}.{}",
            now.as_secs(),
            host_name()
        ));
        let file = File::create(&path)
            .with_context(|| format!("failed to create event file {}", path.display()))?;

        let mut writer = Self {
            path,
            file: BufWriter::new(file),
        };
        writer.write_event(What::FileVersion(FILE_VERSION.to_string()))?;
        writer.flush()?;
        debug!("event log opened at {}", writer.path.display());
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event carrying the serialized graph.
    pub fn add_graph(&mut self, graph: &Graph) -> Result<()> {
        self.write_event(What::GraphDef(encode_graph(graph)))?;
        info!(
            "Wrote graph with {} nodes to {}",
            graph.len(),
            self.path.display()
        );
        Ok(())
    }

    fn write_event(&mut self, what: What) -> Result<()> {
        let event = Event {
            wall_time: wall_time(),
            step: 0,
            what: Some(what),
        };
        self.file
            .write_all(&encode_record(&event.encode_to_vec()))
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))
    }

    /// Flush and close the file, returning its path.
    pub fn close(mut self) -> Result<PathBuf> {
        self.flush()?;
        Ok(self.path)
    }
}

fn wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

/// Machine name used as the event file suffix, as TensorFlow's writer does.
fn host_name() -> String {
    file_safe_host(&gethostname::gethostname().to_string_lossy())
}

fn file_safe_host(raw: &str) -> String {
    let host = raw.trim();
    if host.is_empty() || host.contains(['/', '\\']) {
        "localhost".to_string()
    } else {
        host.to_string()
    }
}
