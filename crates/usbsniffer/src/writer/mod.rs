//! Output trace formats.
//!
//! Three formats share one [`LogWriter`] contract. The format is picked once
//! per session from the destination's file extension and fixed from then on.

pub mod raw;
pub mod replay;
pub mod text;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Error};
use log::warn;

use crate::error::FormatError;
use crate::event::Event;
use crate::usb::{PID, Speed};

pub use raw::RawWriter;
pub use replay::ReplayWriter;
pub use text::TextWriter;

/// Consumer of decoded bus events, in capture order.
///
/// Once closed a writer is inert: further events are discarded and further
/// closes succeed without effect.
pub trait LogWriter {
    fn add_sof(&mut self, frame: u16, speed: Speed) -> io::Result<()>;

    fn add_reset(&mut self, active: bool, cycle_delta: u32, speed: Speed) -> io::Result<()>;

    fn add_token(&mut self, pid: PID, device: u8, endpoint: u8, cycle_delta: u32)
        -> io::Result<()>;

    fn add_handshake(&mut self, pid: PID, cycle_delta: u32) -> io::Result<()>;

    fn add_data(&mut self, pid: PID, bytes: &[u8], cycle_delta: u32) -> io::Result<()>;

    /// Flush and release the sink.
    fn close(&mut self) -> io::Result<()>;

    fn add_event(&mut self, event: &Event, speed: Speed) -> io::Result<()> {
        match event {
            Event::Sof { frame } => self.add_sof(*frame, speed),
            Event::Reset { active, cycle_delta } => self.add_reset(*active, *cycle_delta, speed),
            Event::Token { pid, device, endpoint, cycle_delta } => {
                self.add_token(*pid, *device, *endpoint, *cycle_delta)
            }
            Event::Handshake { pid, cycle_delta } => self.add_handshake(*pid, *cycle_delta),
            Event::Data { pid, cycle_delta, bytes } => self.add_data(*pid, bytes, *cycle_delta),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceFormat {
    /// `.usb`: PHY-level replay frames.
    Replay,
    /// `.raw`: length-prefixed packets.
    Raw,
    /// `.txt`: human-readable listing.
    Text,
}

impl TraceFormat {
    pub fn from_path(path: &Path) -> Result<TraceFormat, FormatError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| FormatError::UnsupportedExtension(path.to_path_buf()))?;
        match extension.to_ascii_lowercase().as_str() {
            "usb" => Ok(TraceFormat::Replay),
            "raw" => Ok(TraceFormat::Raw),
            "txt" => Ok(TraceFormat::Text),
            _ => Err(FormatError::UnsupportedExtension(path.to_path_buf())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TraceFormat::Replay => "usb",
            TraceFormat::Raw => "raw",
            TraceFormat::Text => "txt",
        }
    }
}

/// The writer selected for a session.
pub enum TraceWriter<W: Write> {
    Replay(ReplayWriter<W>),
    Raw(RawWriter<W>),
    Text(TextWriter<W>),
}

impl<W: Write> TraceWriter<W> {
    pub fn new(format: TraceFormat, sink: W) -> TraceWriter<W> {
        match format {
            TraceFormat::Replay => TraceWriter::Replay(ReplayWriter::new(sink)),
            TraceFormat::Raw => TraceWriter::Raw(RawWriter::new(sink)),
            TraceFormat::Text => TraceWriter::Text(TextWriter::new(sink)),
        }
    }

    pub fn format(&self) -> TraceFormat {
        match self {
            TraceWriter::Replay(_) => TraceFormat::Replay,
            TraceWriter::Raw(_) => TraceFormat::Raw,
            TraceWriter::Text(_) => TraceFormat::Text,
        }
    }

    /// Recover the sink, if the writer has not been closed.
    pub fn into_inner(self) -> Option<W> {
        match self {
            TraceWriter::Replay(writer) => writer.into_inner(),
            TraceWriter::Raw(writer) => writer.into_inner(),
            TraceWriter::Text(writer) => writer.into_inner(),
        }
    }
}

impl TraceWriter<BufWriter<File>> {
    /// Create the file at `path` and a writer of `format` on top of it.
    pub fn create(path: &Path, format: TraceFormat) -> Result<Self, Error> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(TraceWriter::new(format, BufWriter::new(file)))
    }
}

macro_rules! dispatch {
    ($self:ident, $writer:ident => $call:expr) => {
        match $self {
            TraceWriter::Replay($writer) => $call,
            TraceWriter::Raw($writer) => $call,
            TraceWriter::Text($writer) => $call,
        }
    };
}

impl<W: Write> LogWriter for TraceWriter<W> {
    fn add_sof(&mut self, frame: u16, speed: Speed) -> io::Result<()> {
        dispatch!(self, writer => writer.add_sof(frame, speed))
    }

    fn add_reset(&mut self, active: bool, cycle_delta: u32, speed: Speed) -> io::Result<()> {
        dispatch!(self, writer => writer.add_reset(active, cycle_delta, speed))
    }

    fn add_token(&mut self, pid: PID, device: u8, endpoint: u8, cycle_delta: u32)
        -> io::Result<()>
    {
        dispatch!(self, writer => writer.add_token(pid, device, endpoint, cycle_delta))
    }

    fn add_handshake(&mut self, pid: PID, cycle_delta: u32) -> io::Result<()> {
        dispatch!(self, writer => writer.add_handshake(pid, cycle_delta))
    }

    fn add_data(&mut self, pid: PID, bytes: &[u8], cycle_delta: u32) -> io::Result<()> {
        dispatch!(self, writer => writer.add_data(pid, bytes, cycle_delta))
    }

    fn close(&mut self) -> io::Result<()> {
        dispatch!(self, writer => writer.close())
    }
}

/// Output stream shared by the writers. Writes after close are dropped.
pub(crate) struct Sink<W: Write> {
    inner: Option<W>,
    warned: bool,
}

impl<W: Write> Sink<W> {
    pub(crate) fn new(inner: W) -> Sink<W> {
        Sink {
            inner: Some(inner),
            warned: false,
        }
    }

    pub(crate) fn close(&mut self) -> io::Result<()> {
        match self.inner.take() {
            Some(mut inner) => inner.flush(),
            None => Ok(()),
        }
    }

    pub(crate) fn into_inner(self) -> Option<W> {
        self.inner
    }
}

impl<W: Write> Write for Sink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Some(inner) => inner.write(buf),
            None => {
                if !self.warned {
                    warn!("Discarding trace output written after close");
                    self.warned = true;
                }
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}
