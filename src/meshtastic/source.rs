//! Packet producers.
//!
//! A [`DeviceSource`] owns a blocking read loop and hands each decoded packet to the
//! ingest queue. Sources run on their own OS thread ([`spawn_source`]) so a stalled
//! device never holds up the runtime.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::thread;

use anyhow::{Context, Result};

use super::RawPacket;
use crate::ingest::{Enqueue, IngestHandle};
use crate::logutil::escape_log;

/// What a source did before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SourceSummary {
    pub lines: u64,
    pub accepted: u64,
    pub shed: u64,
    pub malformed: u64,
    /// The queue closed underneath the source (dispatcher shutting down).
    pub queue_closed: bool,
}

pub trait DeviceSource: Send {
    /// Human readable origin for logs.
    fn describe(&self) -> String;

    /// Read until the device goes quiet for good or the queue closes.
    fn run(self: Box<Self>, handle: IngestHandle) -> Result<SourceSummary>;
}

/// Decoded packets as JSON, one per line, from a file or stdin.
pub struct JsonLinesSource {
    label: String,
    reader: Box<dyn BufRead + Send>,
}

impl JsonLinesSource {
    /// `-` reads standard input; anything else is a file path.
    pub fn open(spec: &str) -> Result<Self> {
        if spec == "-" {
            return Ok(Self::from_reader("stdin", BufReader::new(io::stdin())));
        }
        let path = Path::new(spec);
        let file = File::open(path)
            .with_context(|| format!("opening packet source {}", path.display()))?;
        Ok(Self::from_reader(spec, BufReader::new(file)))
    }

    pub fn from_reader(label: &str, reader: impl BufRead + Send + 'static) -> Self {
        Self {
            label: label.to_string(),
            reader: Box::new(reader),
        }
    }
}

impl DeviceSource for JsonLinesSource {
    fn describe(&self) -> String {
        format!("json-lines:{}", self.label)
    }

    fn run(self: Box<Self>, handle: IngestHandle) -> Result<SourceSummary> {
        let JsonLinesSource { label, mut reader } = *self;
        let mut summary = SourceSummary::default();
        let mut buf = Vec::new();
        let mut line_no = 0u64;
        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .with_context(|| format!("reading {}", label))?;
            if read == 0 {
                break;
            }
            line_no += 1;
            let packet = match decode_line(&buf) {
                Ok(None) => continue,
                Ok(Some(p)) => p,
                Err(reason) => {
                    summary.lines += 1;
                    summary.malformed += 1;
                    handle.metrics().inc_validation_failures();
                    log::warn!(
                        "{} line {}: malformed packet ({}): {}",
                        label,
                        line_no,
                        reason,
                        escape_log(String::from_utf8_lossy(&buf).trim())
                    );
                    continue;
                }
            };
            summary.lines += 1;
            match handle.submit(packet) {
                Enqueue::Accepted => summary.accepted += 1,
                Enqueue::Shed => summary.shed += 1,
                Enqueue::Closed => {
                    summary.queue_closed = true;
                    log::info!("{}: ingest queue closed, source stopping", label);
                    break;
                }
            }
        }
        Ok(summary)
    }
}

// Blank lines decode to `None`.
fn decode_line(raw: &[u8]) -> std::result::Result<Option<RawPacket>, String> {
    let text = std::str::from_utf8(raw).map_err(|e| format!("not UTF-8: {}", e))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some).map_err(|e| e.to_string())
}

/// Run `source` on a dedicated thread. The thread owns `handle`; when it finishes the
/// handle is dropped, which lets the dispatcher finish once the queue is empty.
pub fn spawn_source(
    source: Box<dyn DeviceSource>,
    handle: IngestHandle,
) -> io::Result<thread::JoinHandle<Result<SourceSummary>>> {
    let name = source.describe();
    thread::Builder::new()
        .name("meshstation-source".to_string())
        .spawn(move || {
            log::info!("packet source {} started", name);
            let result = source.run(handle);
            match &result {
                Ok(s) => log::info!(
                    "packet source {} finished: {} lines, {} accepted, {} shed, {} malformed",
                    name,
                    s.lines,
                    s.accepted,
                    s.shed,
                    s.malformed
                ),
                Err(e) => log::error!("packet source {} failed: {:#}", name, e),
            }
            result
        })
}
