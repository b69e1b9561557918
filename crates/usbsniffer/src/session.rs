//! A capture session: draining the analyzer's ring and writing the trace.
//!
//! Captured words are reordered as each chunk is drained and kept in memory.
//! Nothing is decoded or written until [`CaptureSession::finish`], which
//! decodes the whole capture before creating the output file. A one-shot
//! capture is a session drained once; a continuous capture drains
//! repeatedly as the write pointer advances.

use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Error};
use log::{debug, info, warn};

use crate::Result;
use crate::capture::SessionConfig;
use crate::error::TransportError;
use crate::event::{Event, decode_events, words_from_bytes};
use crate::reorder::reorder_records;
use crate::ring::{RingRegion, extract};
use crate::transport::MemoryTransport;
use crate::usb::Speed;
use crate::writer::{LogWriter, TraceWriter};

/// Outcome of a finished session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceSummary {
    /// Capture words collected.
    pub words: usize,
    /// Events passed to the writer.
    pub events: usize,
    /// The trace file, if one was written.
    pub output: Option<PathBuf>,
}

pub struct CaptureSession {
    config: SessionConfig,
    region: RingRegion,
    read_ptr: u32,
    last_write: Option<u32>,
    read_register: Option<u32>,
    words: Vec<u32>,
}

impl CaptureSession {
    /// Start a session reading `region` from its base.
    pub fn new(config: SessionConfig, region: RingRegion) -> CaptureSession {
        CaptureSession {
            config,
            region,
            read_ptr: region.base(),
            last_write: None,
            read_register: None,
            words: Vec::new(),
        }
    }

    /// Report each new read pointer to the analyzer by writing it to
    /// `address` after every drain.
    pub fn with_read_register(mut self, address: u32) -> CaptureSession {
        self.read_register = Some(address);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn read_ptr(&self) -> u32 {
        self.read_ptr
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Copy out everything captured up to and including the word at
    /// `write_ptr`. Returns the number of bytes drained, which is zero if
    /// the write pointer has not moved since the last drain.
    pub fn drain<T>(&mut self, transport: &mut T, write_ptr: u32) -> Result<usize>
    where
        T: MemoryTransport + ?Sized,
    {
        if !self.region.contains(write_ptr) {
            return Err(TransportError::PointerOutOfRange { pointer: write_ptr }.into());
        }
        if self.last_write == Some(write_ptr) {
            return Ok(0);
        }
        let count = self.region.pending_bytes(self.read_ptr, write_ptr) as usize;
        if count == 0 {
            return Ok(0);
        }

        let bytes = extract(transport, &self.region, self.read_ptr, count)?;
        self.extend_from_bytes(&bytes)?;

        self.read_ptr = self.region.advance(write_ptr, 4);
        self.last_write = Some(write_ptr);
        if let Some(register) = self.read_register {
            transport
                .write_word(register, self.read_ptr)
                .context("Failed to update the capture read pointer")?;
        }
        debug!("Drained {count} bytes, next read at {:#010x}", self.read_ptr);
        Ok(count)
    }

    /// Append a chunk of capture memory, in the analyzer's write order.
    pub fn extend_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mut words = words_from_bytes(bytes)?;
        reorder_records(&mut words)?;
        self.words.extend_from_slice(&words);
        Ok(())
    }

    /// Decode the capture and write the trace.
    ///
    /// No file is created if nothing was captured or the capture does not
    /// decode. If writing fails, the partial file is removed.
    pub fn finish(self) -> Result<TraceSummary> {
        write_trace(self.config, &self.words)
    }
}

/// Write a trace from capture memory already copied out of the analyzer,
/// in the order the analyzer wrote it. Every word is kept; nothing is
/// treated as ring pointer state.
pub fn write_capture(config: SessionConfig, capture: &[u8]) -> Result<TraceSummary> {
    let mut words = words_from_bytes(capture)?;
    reorder_records(&mut words)?;
    write_trace(config, &words)
}

/// Decode forward-ordered capture words and write them as a trace.
pub fn write_trace(config: SessionConfig, words: &[u32]) -> Result<TraceSummary> {
    let SessionConfig { speed, include_sof, output, format } = config;

    if words.is_empty() {
        info!("No data captured, not writing {}", output.display());
        return Ok(TraceSummary { words: 0, events: 0, output: None });
    }

    let mut events = decode_events(words).context("Failed to decode capture")?;
    if !include_sof {
        events.retain(|event| !matches!(event, Event::Sof { .. }));
    }

    let mut writer = TraceWriter::create(&output, format)?;
    if let Err(error) = write_events(&mut writer, &events, speed) {
        if let Err(close_error) = writer.close() {
            warn!("Failed to close {}: {close_error}", output.display());
        }
        if let Err(remove_error) = fs::remove_file(&output) {
            warn!("Failed to remove partial trace {}: {remove_error}", output.display());
        }
        return Err(Error::from(error).context(format!("Failed to write {}", output.display())));
    }

    info!(
        "Wrote {} events from {} capture words at {} to {}",
        events.len(),
        words.len(),
        speed.description(),
        output.display()
    );
    Ok(TraceSummary {
        words: words.len(),
        events: events.len(),
        output: Some(output),
    })
}

/// Pass every event to `writer`, then close it.
pub fn write_events<L>(writer: &mut L, events: &[Event], speed: Speed) -> io::Result<()>
where
    L: LogWriter + ?Sized,
{
    for event in events {
        writer.add_event(event, speed)?;
    }
    writer.close()
}
